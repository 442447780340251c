//! Schema props: the typed description of a component's inputs.
//!
//! Every prop kind is a closed variant carrying only its own fields. JSON
//! uses the `type` discriminator; type names that are not built in are read
//! as [`SchemaPropKind::Custom`] and later bound to `Config::types` by the
//! registry.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::{TOKENS_COLORS, TOKENS_FONTS, TOKENS_ICONS, TOKENS_SPACE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectOption {
    Simple(String),
    Full {
        value: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl SelectOption {
    pub fn value(&self) -> &str {
        match self {
            Self::Simple(v) => v,
            Self::Full { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaPropKind {
    String {
        default_value: Option<Value>,
        responsive: bool,
    },
    Number {
        default_value: Option<Value>,
        responsive: bool,
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean {
        default_value: Option<Value>,
        responsive: bool,
    },
    Select {
        options: Vec<SelectOption>,
        default_value: Option<Value>,
        responsive: bool,
    },
    RadioGroup {
        options: Vec<SelectOption>,
        default_value: Option<Value>,
        responsive: bool,
    },
    Color {
        default_value: Option<Value>,
    },
    Space {
        default_value: Option<Value>,
        auto_constant: Option<f64>,
        prefix: Option<String>,
    },
    Font {
        default_value: Option<Value>,
    },
    StringToken {
        /// Token table the values come from (`aspectRatios`, `boxShadows`, ...).
        token_id: String,
        extra_values: Vec<Value>,
        default_value: Option<Value>,
    },
    Icon {
        default_value: Option<Value>,
    },
    Text {
        default_value: Option<Value>,
    },
    Position {
        default_value: Option<Value>,
    },
    Component {
        accepts: Vec<String>,
        required: bool,
        no_inline: bool,
    },
    ComponentCollection {
        accepts: Vec<String>,
        item_fields: Vec<SchemaProp>,
        no_inline: bool,
    },
    ComponentCollectionLocalised {
        accepts: Vec<String>,
        item_fields: Vec<SchemaProp>,
        no_inline: bool,
    },
    External {
        type_name: String,
        params: Option<Map<String, Value>>,
        optional: bool,
        responsive: bool,
    },
    Local {
        type_name: String,
        default_value: Option<Value>,
        responsive: bool,
    },
    Token {
        type_name: String,
        token: String,
        default_value: Option<Value>,
        extra_values: Vec<Value>,
        responsive: bool,
    },
    /// A type name not known to the schema layer; bound by the registry.
    Custom {
        type_name: String,
        default_value: Option<Value>,
        params: Option<Map<String, Value>>,
        optional: bool,
        responsive: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaProp {
    pub prop: String,
    pub kind: SchemaPropKind,
    pub label: Option<String>,
    pub group: Option<String>,
    pub description: Option<String>,
    pub visible: Option<bool>,
    pub build_only: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTORS
// ═══════════════════════════════════════════════════════════════════════════════

impl SchemaProp {
    pub fn new(prop: &str, kind: SchemaPropKind) -> Self {
        Self {
            prop: prop.to_string(),
            kind,
            label: None,
            group: None,
            description: None,
            visible: None,
            build_only: false,
        }
    }

    pub fn string(prop: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::String {
                default_value: None,
                responsive: false,
            },
        )
    }

    pub fn number(prop: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Number {
                default_value: None,
                responsive: false,
                min: None,
                max: None,
            },
        )
    }

    pub fn boolean(prop: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Boolean {
                default_value: None,
                responsive: false,
            },
        )
    }

    pub fn select(prop: &str, options: &[&str]) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Select {
                options: options
                    .iter()
                    .map(|o| SelectOption::Simple(o.to_string()))
                    .collect(),
                default_value: None,
                responsive: false,
            },
        )
    }

    pub fn color(prop: &str) -> Self {
        Self::new(prop, SchemaPropKind::Color { default_value: None })
    }

    pub fn space(prop: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Space {
                default_value: None,
                auto_constant: None,
                prefix: None,
            },
        )
    }

    pub fn font(prop: &str) -> Self {
        Self::new(prop, SchemaPropKind::Font { default_value: None })
    }

    pub fn icon(prop: &str) -> Self {
        Self::new(prop, SchemaPropKind::Icon { default_value: None })
    }

    pub fn string_token(prop: &str, table: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::StringToken {
                token_id: table.to_string(),
                extra_values: vec![],
                default_value: None,
            },
        )
    }

    pub fn text(prop: &str) -> Self {
        Self::new(prop, SchemaPropKind::Text { default_value: None })
    }

    pub fn position(prop: &str) -> Self {
        Self::new(prop, SchemaPropKind::Position { default_value: None })
    }

    pub fn component(prop: &str, accepts: &[&str]) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Component {
                accepts: accepts.iter().map(|s| s.to_string()).collect(),
                required: false,
                no_inline: false,
            },
        )
    }

    pub fn collection(prop: &str, accepts: &[&str]) -> Self {
        Self::new(
            prop,
            SchemaPropKind::ComponentCollection {
                accepts: accepts.iter().map(|s| s.to_string()).collect(),
                item_fields: vec![],
                no_inline: false,
            },
        )
    }

    pub fn localised_collection(prop: &str, accepts: &[&str]) -> Self {
        Self::new(
            prop,
            SchemaPropKind::ComponentCollectionLocalised {
                accepts: accepts.iter().map(|s| s.to_string()).collect(),
                item_fields: vec![],
                no_inline: false,
            },
        )
    }

    pub fn external(prop: &str, type_name: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::External {
                type_name: type_name.to_string(),
                params: None,
                optional: false,
                responsive: false,
            },
        )
    }

    /// A prop of a type registered in `Config::types`.
    pub fn custom(prop: &str, type_name: &str) -> Self {
        Self::new(
            prop,
            SchemaPropKind::Custom {
                type_name: type_name.to_string(),
                default_value: None,
                params: None,
                optional: false,
                responsive: false,
            },
        )
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Some(false);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        if let Some(slot) = self.kind.default_value_mut() {
            *slot = Some(value);
        }
        self
    }

    /// Allows per-device values on kinds where responsiveness is optional.
    pub fn responsive(mut self) -> Self {
        match &mut self.kind {
            SchemaPropKind::String { responsive, .. }
            | SchemaPropKind::Number { responsive, .. }
            | SchemaPropKind::Boolean { responsive, .. }
            | SchemaPropKind::Select { responsive, .. }
            | SchemaPropKind::RadioGroup { responsive, .. }
            | SchemaPropKind::External { responsive, .. }
            | SchemaPropKind::Local { responsive, .. }
            | SchemaPropKind::Token { responsive, .. }
            | SchemaPropKind::Custom { responsive, .. } => *responsive = true,
            _ => {}
        }
        self
    }

    pub fn with_params(mut self, value: Map<String, Value>) -> Self {
        match &mut self.kind {
            SchemaPropKind::External { params, .. } | SchemaPropKind::Custom { params, .. } => {
                *params = Some(value)
            }
            _ => {}
        }
        self
    }

    pub fn with_item_fields(mut self, fields: Vec<SchemaProp>) -> Self {
        match &mut self.kind {
            SchemaPropKind::ComponentCollection { item_fields, .. }
            | SchemaPropKind::ComponentCollectionLocalised { item_fields, .. } => {
                *item_fields = fields
            }
            _ => {}
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

impl SchemaPropKind {
    pub fn type_name(&self) -> &str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Boolean { .. } => "boolean",
            Self::Select { .. } => "select",
            Self::RadioGroup { .. } => "radio-group",
            Self::Color { .. } => "color",
            Self::Space { .. } => "space",
            Self::Font { .. } => "font",
            Self::StringToken { .. } => "stringToken",
            Self::Icon { .. } => "icon",
            Self::Text { .. } => "text",
            Self::Position { .. } => "position",
            Self::Component { .. } => "component",
            Self::ComponentCollection { .. } => "component-collection",
            Self::ComponentCollectionLocalised { .. } => "component-collection-localised",
            Self::External { type_name, .. }
            | Self::Local { type_name, .. }
            | Self::Token { type_name, .. }
            | Self::Custom { type_name, .. } => type_name,
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        match self {
            Self::String { default_value, .. }
            | Self::Number { default_value, .. }
            | Self::Boolean { default_value, .. }
            | Self::Select { default_value, .. }
            | Self::RadioGroup { default_value, .. }
            | Self::Color { default_value }
            | Self::Space { default_value, .. }
            | Self::Font { default_value }
            | Self::StringToken { default_value, .. }
            | Self::Icon { default_value }
            | Self::Text { default_value }
            | Self::Position { default_value }
            | Self::Local { default_value, .. }
            | Self::Token { default_value, .. }
            | Self::Custom { default_value, .. } => default_value.as_ref(),
            Self::Component { .. }
            | Self::ComponentCollection { .. }
            | Self::ComponentCollectionLocalised { .. }
            | Self::External { .. } => None,
        }
    }

    fn default_value_mut(&mut self) -> Option<&mut Option<Value>> {
        match self {
            Self::String { default_value, .. }
            | Self::Number { default_value, .. }
            | Self::Boolean { default_value, .. }
            | Self::Select { default_value, .. }
            | Self::RadioGroup { default_value, .. }
            | Self::Color { default_value }
            | Self::Space { default_value, .. }
            | Self::Font { default_value }
            | Self::StringToken { default_value, .. }
            | Self::Icon { default_value }
            | Self::Text { default_value }
            | Self::Position { default_value }
            | Self::Local { default_value, .. }
            | Self::Token { default_value, .. }
            | Self::Custom { default_value, .. } => Some(default_value),
            _ => None,
        }
    }

    /// Token-valued kinds store `{ value, tokenId? }`.
    pub fn is_token(&self) -> bool {
        matches!(
            self,
            Self::Color { .. }
                | Self::Space { .. }
                | Self::Font { .. }
                | Self::StringToken { .. }
                | Self::Icon { .. }
                | Self::Token { .. }
        )
    }

    /// Token table consulted for `tokenId` lookups.
    pub fn token_table(&self) -> Option<&str> {
        match self {
            Self::Color { .. } => Some(TOKENS_COLORS),
            Self::Space { .. } => Some(TOKENS_SPACE),
            Self::Font { .. } => Some(TOKENS_FONTS),
            Self::Icon { .. } => Some(TOKENS_ICONS),
            Self::StringToken { token_id, .. } => Some(token_id),
            Self::Token { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(
            self,
            Self::Component { .. }
                | Self::ComponentCollection { .. }
                | Self::ComponentCollectionLocalised { .. }
        )
    }

    pub fn accepts(&self) -> &[String] {
        match self {
            Self::Component { accepts, .. }
            | Self::ComponentCollection { accepts, .. }
            | Self::ComponentCollectionLocalised { accepts, .. } => accepts,
            _ => &[],
        }
    }

    pub fn item_fields(&self) -> &[SchemaProp] {
        match self {
            Self::ComponentCollection { item_fields, .. }
            | Self::ComponentCollectionLocalised { item_fields, .. } => item_fields,
            _ => &[],
        }
    }

    /// Whether a stored value may vary per device.
    pub fn allows_responsive(&self) -> bool {
        match self {
            Self::Color { .. }
            | Self::Space { .. }
            | Self::Font { .. }
            | Self::StringToken { .. }
            | Self::Position { .. } => true,
            Self::String { responsive, .. }
            | Self::Number { responsive, .. }
            | Self::Boolean { responsive, .. }
            | Self::Select { responsive, .. }
            | Self::RadioGroup { responsive, .. }
            | Self::External { responsive, .. }
            | Self::Local { responsive, .. }
            | Self::Token { responsive, .. }
            | Self::Custom { responsive, .. } => *responsive,
            Self::Icon { .. }
            | Self::Text { .. }
            | Self::Component { .. }
            | Self::ComponentCollection { .. }
            | Self::ComponentCollectionLocalised { .. } => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

fn take_bool(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn take_strings(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn take_params(map: &Map<String, Value>) -> Option<Map<String, Value>> {
    map.get("params").and_then(Value::as_object).cloned()
}

fn take_options(map: &Map<String, Value>) -> Result<Vec<SelectOption>, String> {
    let options = take_params(map)
        .and_then(|p| p.get("options").cloned())
        .or_else(|| map.get("options").cloned())
        .unwrap_or(Value::Array(vec![]));
    serde_json::from_value(options).map_err(|e| format!("invalid options: {}", e))
}

fn take_item_fields(map: &Map<String, Value>) -> Result<Vec<SchemaProp>, String> {
    match map.get("itemFields") {
        None | Some(Value::Null) => Ok(vec![]),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| format!("invalid itemFields: {}", e))
        }
    }
}

impl TryFrom<&Value> for SchemaProp {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let map = value
            .as_object()
            .ok_or_else(|| "schema prop must be an object".to_string())?;
        let prop = map
            .get("prop")
            .and_then(Value::as_str)
            .ok_or_else(|| "schema prop is missing 'prop'".to_string())?;
        let type_name = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("schema prop '{}' is missing 'type'", prop))?;

        let default_value = map.get("defaultValue").cloned();
        let responsive = take_bool(map, "responsive");
        let params = take_params(map);

        let kind = match type_name {
            "string" => SchemaPropKind::String {
                default_value,
                responsive,
            },
            "number" => SchemaPropKind::Number {
                default_value,
                responsive,
                min: params.as_ref().and_then(|p| p.get("min")).and_then(Value::as_f64),
                max: params.as_ref().and_then(|p| p.get("max")).and_then(Value::as_f64),
            },
            "boolean" => SchemaPropKind::Boolean {
                default_value,
                responsive,
            },
            "select" => SchemaPropKind::Select {
                options: take_options(map)?,
                default_value,
                responsive,
            },
            "radio-group" => SchemaPropKind::RadioGroup {
                options: take_options(map)?,
                default_value,
                responsive,
            },
            "color" => SchemaPropKind::Color { default_value },
            "space" => SchemaPropKind::Space {
                default_value,
                auto_constant: params
                    .as_ref()
                    .and_then(|p| p.get("autoConstant"))
                    .and_then(Value::as_f64),
                prefix: params
                    .as_ref()
                    .and_then(|p| p.get("prefix"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "font" => SchemaPropKind::Font { default_value },
            "stringToken" => {
                let params = params.unwrap_or_default();
                SchemaPropKind::StringToken {
                    token_id: params
                        .get("tokenId")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            format!("stringToken prop '{}' is missing params.tokenId", prop)
                        })?
                        .to_string(),
                    extra_values: params
                        .get("extraValues")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    default_value,
                }
            }
            "icon" => SchemaPropKind::Icon { default_value },
            "text" => SchemaPropKind::Text { default_value },
            "position" => SchemaPropKind::Position { default_value },
            "component" => SchemaPropKind::Component {
                accepts: take_strings(map, "accepts"),
                required: take_bool(map, "required"),
                no_inline: take_bool(map, "noInline"),
            },
            "component-collection" => SchemaPropKind::ComponentCollection {
                accepts: take_strings(map, "accepts"),
                item_fields: take_item_fields(map)?,
                no_inline: take_bool(map, "noInline"),
            },
            "component-collection-localised" => SchemaPropKind::ComponentCollectionLocalised {
                accepts: take_strings(map, "accepts"),
                item_fields: take_item_fields(map)?,
                no_inline: take_bool(map, "noInline"),
            },
            other => SchemaPropKind::Custom {
                type_name: other.to_string(),
                default_value,
                params,
                optional: take_bool(map, "optional"),
                responsive,
            },
        };

        Ok(SchemaProp {
            prop: prop.to_string(),
            kind,
            label: map.get("label").and_then(Value::as_str).map(str::to_string),
            group: map.get("group").and_then(Value::as_str).map(str::to_string),
            description: map
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            visible: map.get("visible").and_then(Value::as_bool),
            build_only: take_bool(map, "buildOnly"),
        })
    }
}

impl SchemaProp {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("prop".into(), Value::String(self.prop.clone()));
        map.insert("type".into(), Value::String(self.kind.type_name().to_string()));

        if let Some(label) = &self.label {
            map.insert("label".into(), Value::String(label.clone()));
        }
        if let Some(group) = &self.group {
            map.insert("group".into(), Value::String(group.clone()));
        }
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(visible) = self.visible {
            map.insert("visible".into(), Value::Bool(visible));
        }
        if self.build_only {
            map.insert("buildOnly".into(), Value::Bool(true));
        }
        if let Some(default) = self.kind.default_value() {
            map.insert("defaultValue".into(), default.clone());
        }
        if self.kind.allows_responsive() {
            map.insert("responsive".into(), Value::Bool(true));
        }

        let accepts = |list: &[String]| {
            Value::Array(list.iter().cloned().map(Value::String).collect())
        };

        match &self.kind {
            SchemaPropKind::Number { min, max, .. } => {
                let mut params = Map::new();
                if let Some(min) = min {
                    params.insert("min".into(), Value::from(*min));
                }
                if let Some(max) = max {
                    params.insert("max".into(), Value::from(*max));
                }
                if !params.is_empty() {
                    map.insert("params".into(), Value::Object(params));
                }
            }
            SchemaPropKind::Select { options, .. } | SchemaPropKind::RadioGroup { options, .. } => {
                let mut params = Map::new();
                params.insert(
                    "options".into(),
                    serde_json::to_value(options).unwrap_or(Value::Null),
                );
                map.insert("params".into(), Value::Object(params));
            }
            SchemaPropKind::Space {
                auto_constant,
                prefix,
                ..
            } => {
                let mut params = Map::new();
                if let Some(c) = auto_constant {
                    params.insert("autoConstant".into(), Value::from(*c));
                }
                if let Some(p) = prefix {
                    params.insert("prefix".into(), Value::String(p.clone()));
                }
                if !params.is_empty() {
                    map.insert("params".into(), Value::Object(params));
                }
            }
            SchemaPropKind::StringToken {
                token_id,
                extra_values,
                ..
            } => {
                let mut params = Map::new();
                params.insert("tokenId".into(), Value::String(token_id.clone()));
                if !extra_values.is_empty() {
                    params.insert("extraValues".into(), Value::Array(extra_values.clone()));
                }
                map.insert("params".into(), Value::Object(params));
            }
            SchemaPropKind::Component {
                accepts: list,
                required,
                no_inline,
            } => {
                map.insert("accepts".into(), accepts(list));
                if *required {
                    map.insert("required".into(), Value::Bool(true));
                }
                if *no_inline {
                    map.insert("noInline".into(), Value::Bool(true));
                }
            }
            SchemaPropKind::ComponentCollection {
                accepts: list,
                item_fields,
                no_inline,
            }
            | SchemaPropKind::ComponentCollectionLocalised {
                accepts: list,
                item_fields,
                no_inline,
            } => {
                map.insert("accepts".into(), accepts(list));
                if !item_fields.is_empty() {
                    map.insert(
                        "itemFields".into(),
                        Value::Array(item_fields.iter().map(SchemaProp::to_json).collect()),
                    );
                }
                if *no_inline {
                    map.insert("noInline".into(), Value::Bool(true));
                }
            }
            SchemaPropKind::External {
                params, optional, ..
            }
            | SchemaPropKind::Custom {
                params, optional, ..
            } => {
                if let Some(params) = params {
                    map.insert("params".into(), Value::Object(params.clone()));
                }
                if *optional {
                    map.insert("optional".into(), Value::Bool(true));
                }
            }
            SchemaPropKind::Token { extra_values, .. } if !extra_values.is_empty() => {
                let mut params = Map::new();
                params.insert("extraValues".into(), Value::Array(extra_values.clone()));
                map.insert("params".into(), Value::Object(params));
            }
            _ => {}
        }

        Value::Object(map)
    }
}

impl Serialize for SchemaProp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SchemaProp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        SchemaProp::try_from(&raw).map_err(D::Error::custom)
    }
}
