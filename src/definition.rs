//! Component definitions and the inputs/outputs of their functions.
//!
//! A definition is immutable once registered. Its functions are plain
//! closures returning `anyhow::Result`; a failing function never aborts a
//! compile pass (see `invoke.rs`).

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::config::{DeviceRange, Devices};
use crate::schema::SchemaProp;

pub type StylesFn = Arc<dyn Fn(&StylesInput) -> anyhow::Result<StylesOutput> + Send + Sync>;
pub type AutoFn = Arc<dyn Fn(&AutoInput) -> anyhow::Result<Map<String, Value>> + Send + Sync>;
pub type EditingFn = Arc<dyn Fn(&EditingInput) -> anyhow::Result<EditingOutput> + Send + Sync>;
pub type ChangeFn =
    Arc<dyn Fn(&ChangeInput) -> anyhow::Result<Option<Map<String, Value>>> + Send + Sync>;

pub const TYPE_ACTION: &str = "action";
pub const TYPE_LINK: &str = "link";
pub const TYPE_TEXT_MODIFIER: &str = "textModifier";

/// Metadata bucket a definition lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Component,
    Action,
    Link,
    TextModifier,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "one_or_many")]
    pub types: Vec<String>,
    #[serde(default)]
    pub schema: Vec<SchemaProp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip)]
    pub styles: Option<StylesFn>,
    #[serde(skip)]
    pub editing: Option<EditingFn>,
    #[serde(skip)]
    pub auto: Option<AutoFn>,
    #[serde(skip)]
    pub change: Option<ChangeFn>,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => vec![],
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("schema", &self.schema.iter().map(|p| &p.prop).collect::<Vec<_>>())
            .field("styles", &self.styles.is_some())
            .field("editing", &self.editing.is_some())
            .field("auto", &self.auto.is_some())
            .field("change", &self.change.is_some())
            .finish()
    }
}

impl ComponentDefinition {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: None,
            types: vec![],
            schema: vec![],
            thumbnail: None,
            styles: None,
            editing: None,
            auto: None,
            change: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_type(mut self, ty: &str) -> Self {
        self.types.push(ty.to_string());
        self
    }

    pub fn with_prop(mut self, prop: SchemaProp) -> Self {
        self.schema.push(prop);
        self
    }

    pub fn with_styles<F>(mut self, f: F) -> Self
    where
        F: Fn(&StylesInput) -> anyhow::Result<StylesOutput> + Send + Sync + 'static,
    {
        self.styles = Some(Arc::new(f));
        self
    }

    pub fn with_editing<F>(mut self, f: F) -> Self
    where
        F: Fn(&EditingInput) -> anyhow::Result<EditingOutput> + Send + Sync + 'static,
    {
        self.editing = Some(Arc::new(f));
        self
    }

    pub fn with_auto<F>(mut self, f: F) -> Self
    where
        F: Fn(&AutoInput) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        self.auto = Some(Arc::new(f));
        self
    }

    pub fn with_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChangeInput) -> anyhow::Result<Option<Map<String, Value>>> + Send + Sync + 'static,
    {
        self.change = Some(Arc::new(f));
        self
    }

    pub fn kind(&self) -> DefinitionKind {
        if self.has_type(TYPE_ACTION) {
            DefinitionKind::Action
        } else if self.has_type(TYPE_LINK) {
            DefinitionKind::Link
        } else if self.has_type(TYPE_TEXT_MODIFIER) {
            DefinitionKind::TextModifier
        } else {
            DefinitionKind::Component
        }
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }

    pub fn schema_prop(&self, prop: &str) -> Option<&SchemaProp> {
        self.schema.iter().find(|p| p.prop == prop)
    }

    /// True when `accepts` names this definition's id or one of its types.
    /// An empty list accepts anything.
    pub fn is_accepted_by(&self, accepts: &[String]) -> bool {
        accepts.is_empty() || accepts.iter().any(|a| *a == self.id || self.has_type(a))
    }
}

/// The data half of a definition, as shipped in compilation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedComponentDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    pub schema: Vec<SchemaProp>,
}

impl From<&ComponentDefinition> for SerializedComponentDefinition {
    fn from(def: &ComponentDefinition) -> Self {
        Self {
            id: def.id.clone(),
            label: def.label.clone(),
            types: def.types.clone(),
            schema: def.schema.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STYLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-device input: values and params are already resolved for `device`.
#[derive(Debug, Clone)]
pub struct StylesInput {
    pub values: Map<String, Value>,
    pub params: Map<String, Value>,
    pub device: DeviceRange,
    pub is_editing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyledOutput {
    Single(Map<String, Value>),
    Collection(Vec<Map<String, Value>>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStylesOutput {
    /// One style object per collection item. Only valid on collection props.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_props: Option<Vec<Map<String, Value>>>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StylesOutput {
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub components: IndexMap<String, ComponentStylesOutput>,
    #[serde(default)]
    pub styled: IndexMap<String, StyledOutput>,
}

impl StylesOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prop(mut self, key: &str, value: Value) -> Self {
        self.props.insert(key.to_string(), value);
        self
    }

    pub fn with_styled(mut self, key: &str, style: Map<String, Value>) -> Self {
        self.styled.insert(key.to_string(), StyledOutput::Single(style));
        self
    }

    pub fn with_item_props(mut self, prop: &str, items: Vec<Map<String, Value>>) -> Self {
        self.components.entry(prop.to_string()).or_default().item_props = Some(items);
        self
    }

    pub fn with_component_param(mut self, prop: &str, key: &str, value: Value) -> Self {
        self.components
            .entry(prop.to_string())
            .or_default()
            .params
            .insert(key.to_string(), value);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUTO / CHANGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Whole-tree-of-devices input: every value is a full responsive map.
#[derive(Debug, Clone)]
pub struct AutoInput {
    pub values: Map<String, Value>,
    pub params: Map<String, Value>,
    pub devices: Devices,
}

#[derive(Debug, Clone)]
pub struct ChangeInput {
    pub new_value: Value,
    pub prop: String,
    pub values: Map<String, Value>,
    pub values_after_auto: Map<String, Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EDITING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingField {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Unset in `editing` output means "keep the inherited visibility".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl EditingField {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            label: None,
            group: None,
            visible: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Some(false);
        self
    }

    pub fn shown(mut self) -> Self {
        self.visible = Some(true);
        self
    }

    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(true)
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<String>>,
}

/// Portal pulling a child component's fields into this node's sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditingComponentFields {
    pub path: String,
    #[serde(default)]
    pub filters: FieldFilters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnyEditingField {
    Field(EditingField),
    Fields(EditingComponentFields),
}

impl AnyEditingField {
    pub fn path(&self) -> &str {
        match self {
            Self::Field(f) => &f.path,
            Self::Fields(f) => &f.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarOrCollection<T> {
    Scalar(T),
    Collection(Vec<T>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildComponentEditingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub fields: Vec<AnyEditingField>,
}

/// Editing info handed to and returned by `editing`. Paths are relative to
/// the node being compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditingInfo {
    pub fields: Vec<AnyEditingField>,
    pub components: IndexMap<String, ScalarOrCollection<ChildComponentEditingInfo>>,
}

#[derive(Debug, Clone)]
pub struct EditingInput {
    pub values: Map<String, Value>,
    pub params: Map<String, Value>,
    pub editing_info: EditingInfo,
    pub device: DeviceRange,
}

/// Overrides returned by `editing`; merged into the inherited info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditingOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<AnyEditingField>>,
    #[serde(default)]
    pub components: IndexMap<String, ScalarOrCollection<ChildComponentEditingInfo>>,
}

/// Child editing info as stored on a compiled node; field paths are absolute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledChildEditing {
    #[serde(default)]
    pub no_inline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EditingField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledEditingInfo {
    pub fields: Vec<EditingField>,
    pub components: IndexMap<String, ScalarOrCollection<CompiledChildEditing>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_parses_single_type() {
        let def: ComponentDefinition = serde_json::from_value(json!({
            "id": "OpenLink",
            "type": "action",
            "schema": [{ "prop": "url", "type": "string" }]
        }))
        .unwrap();
        assert_eq!(def.types, vec!["action".to_string()]);
        assert_eq!(def.kind(), DefinitionKind::Action);
        assert!(def.styles.is_none());
    }

    #[test]
    fn test_accepts_matches_id_or_type() {
        let def = ComponentDefinition::new("Card").with_type("item");
        assert!(def.is_accepted_by(&["Card".to_string()]));
        assert!(def.is_accepted_by(&["item".to_string()]));
        assert!(def.is_accepted_by(&[]));
        assert!(!def.is_accepted_by(&["Button".to_string()]));
    }

    #[test]
    fn test_styles_output_shape() {
        let out: StylesOutput = serde_json::from_value(json!({
            "styled": { "root": { "display": "flex" }, "cells": [{}, { "gap": 2 }] },
            "components": { "items": { "itemProps": [{ "a": 1 }], "direction": "row" } }
        }))
        .unwrap();
        assert!(matches!(out.styled["root"], StyledOutput::Single(_)));
        assert!(matches!(out.styled["cells"], StyledOutput::Collection(ref v) if v.len() == 2));
        let items = &out.components["items"];
        assert_eq!(items.item_props.as_ref().map(Vec::len), Some(1));
        assert_eq!(items.params.get("direction"), Some(&json!("row")));
    }

    #[test]
    fn test_editing_fields_are_tagged() {
        let fields: Vec<AnyEditingField> = serde_json::from_value(json!([
            { "type": "field", "path": "title", "visible": false },
            { "type": "fields", "path": "button", "filters": { "group": ["Style"] } }
        ]))
        .unwrap();
        assert!(matches!(&fields[0], AnyEditingField::Field(f) if !f.is_visible()));
        assert_eq!(fields[1].path(), "button");
    }
}
