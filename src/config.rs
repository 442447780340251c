//! Configuration surface: devices, locales, tokens, custom types, templates
//! and the per-call compile options.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::definition::ComponentDefinition;
use crate::error::{CompileError, Result};

/// Upper bound on fetch iterations in `build_entry` unless overridden.
pub const DEFAULT_MAX_FETCH_ITERATIONS: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════════
// DEVICES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRange {
    pub id: String,
    #[serde(default)]
    pub w: u32,
    #[serde(default)]
    pub h: Option<u32>,
    /// Upper pixel bound (exclusive). `None` on the largest device.
    #[serde(default)]
    pub breakpoint: Option<u32>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub is_main: bool,
}

impl DeviceRange {
    pub fn new(id: &str, w: u32, breakpoint: Option<u32>) -> Self {
        Self {
            id: id.to_string(),
            w,
            h: None,
            breakpoint,
            hidden: false,
            label: None,
            is_main: false,
        }
    }

    pub fn main(mut self) -> Self {
        self.is_main = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Ordered device list, largest first. The order is taken verbatim from the
/// config; numeric breakpoints are never re-sorted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Devices(Vec<DeviceRange>);

impl Devices {
    pub fn new(devices: Vec<DeviceRange>) -> Result<Self> {
        if devices.is_empty() {
            return Err(CompileError::invalid_config("device list is empty"));
        }
        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.id.as_str()) {
                return Err(CompileError::invalid_config(format!(
                    "device id '{}' is registered twice",
                    device.id
                )));
            }
        }
        if devices.iter().filter(|d| d.is_main).count() > 1 {
            return Err(CompileError::invalid_config(
                "more than one device is flagged as main",
            ));
        }
        Ok(Self(devices))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRange> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[DeviceRange] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, device_id: &str) -> Option<usize> {
        self.0.iter().position(|d| d.id == device_id)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRange> {
        self.0.iter().find(|d| d.id == device_id)
    }

    /// The device flagged `is_main`, or the largest one. `None` only for an
    /// empty list, which `new` rejects.
    pub fn main(&self) -> Option<&DeviceRange> {
        self.0.iter().find(|d| d.is_main).or_else(|| self.0.first())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|d| d.id.as_str())
    }

    /// Stable fingerprint of the device set, used in cache keys.
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        for device in &self.0 {
            hasher.update(device.id.as_bytes());
            hasher.update(device.w.to_le_bytes());
            hasher.update(device.h.unwrap_or(0).to_le_bytes());
            hasher.update(device.breakpoint.map(|b| b as i64).unwrap_or(-1).to_le_bytes());
            hasher.update([device.hidden as u8, device.is_main as u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl<'a> IntoIterator for &'a Devices {
    type Item = &'a DeviceRange;
    type IntoIter = std::slice::Iter<'a, DeviceRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub fn default_devices() -> Vec<DeviceRange> {
    vec![
        DeviceRange::new("2xl", 1920, None),
        DeviceRange::new("xl", 1600, Some(1920)),
        DeviceRange::new("lg", 1280, Some(1600)).main(),
        DeviceRange::new("md", 1024, Some(1280)),
        DeviceRange::new("sm", 768, Some(1024)),
        DeviceRange::new("xs", 375, Some(768)),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCALES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locale {
    pub code: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Locale {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            is_default: false,
            fallback: None,
        }
    }

    pub fn default_locale(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }
}

/// Lookup order for localized content: the locale itself, its fallback
/// chain, then the default locale.
pub fn locale_chain(locales: &[Locale], code: &str) -> Vec<String> {
    let mut chain = vec![code.to_string()];
    let mut current = code.to_string();

    while let Some(next) = locales
        .iter()
        .find(|l| l.code == current)
        .and_then(|l| l.fallback.clone())
    {
        if chain.contains(&next) {
            break;
        }
        chain.push(next.clone());
        current = next;
    }

    if let Some(default) = locales.iter().find(|l| l.is_default) {
        if !chain.contains(&default.code) {
            chain.push(default.code.clone());
        }
    }

    chain
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTokenValue {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// May itself be a responsive value.
    pub value: Value,
    #[serde(default)]
    pub is_default: bool,
}

impl ConfigTokenValue {
    pub fn new(id: &str, value: Value) -> Self {
        Self {
            id: id.to_string(),
            label: None,
            value,
            is_default: false,
        }
    }

    pub fn default_token(mut self) -> Self {
        self.is_default = true;
        self
    }
}

pub const TOKENS_COLORS: &str = "colors";
pub const TOKENS_SPACE: &str = "space";
pub const TOKENS_FONTS: &str = "fonts";
pub const TOKENS_ICONS: &str = "icons";

/// Theme token tables keyed by table name (`colors`, `space`, ...).
pub type TokenTables = IndexMap<String, Vec<ConfigTokenValue>>;

// ═══════════════════════════════════════════════════════════════════════════════
// CUSTOM TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Responsiveness {
    Always,
    Optional,
    #[default]
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    pub label: String,
}

impl Widget {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineTypeDefinition {
    pub widget: Widget,
    #[serde(default)]
    pub responsiveness: Responsiveness,
    pub default_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTypeDefinition {
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default)]
    pub responsiveness: Responsiveness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTypeDefinition {
    #[serde(default)]
    pub widget: Option<Widget>,
    #[serde(default)]
    pub responsiveness: Responsiveness,
    /// Name of the token table the type draws from.
    pub token: String,
    pub default_value: Value,
    #[serde(default)]
    pub extra_values: Vec<Value>,
    #[serde(default)]
    pub allow_custom: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CustomTypeDefinition {
    Inline(InlineTypeDefinition),
    External(ExternalTypeDefinition),
    Token(TokenTypeDefinition),
}

impl CustomTypeDefinition {
    pub fn responsiveness(&self) -> Responsiveness {
        match self {
            Self::Inline(d) => d.responsiveness,
            Self::External(d) => d.responsiveness,
            Self::Token(d) => d.responsiveness,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    pub entry: Value,
    #[serde(default)]
    pub is_user_defined: bool,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub width_auto: Option<bool>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub components: Vec<ComponentDefinition>,
    #[serde(default)]
    pub devices: Option<Vec<DeviceRange>>,
    #[serde(default)]
    pub locales: Vec<Locale>,
    #[serde(default)]
    pub types: IndexMap<String, CustomTypeDefinition>,
    #[serde(default)]
    pub tokens: TokenTables,
    #[serde(default)]
    pub templates: Vec<Template>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, definition: ComponentDefinition) -> Self {
        self.components.push(definition);
        self
    }

    pub fn with_devices(mut self, devices: Vec<DeviceRange>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locales.push(locale);
        self
    }

    pub fn with_tokens(mut self, table: &str, values: Vec<ConfigTokenValue>) -> Self {
        self.tokens.insert(table.to_string(), values);
        self
    }

    pub fn with_type(mut self, name: &str, definition: CustomTypeDefinition) -> Self {
        self.types.insert(name.to_string(), definition);
        self
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    pub fn devices(&self) -> Result<Devices> {
        Devices::new(self.devices.clone().unwrap_or_else(default_devices))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    pub locale: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextParams {
    pub fn new(locale: &str) -> Self {
        Self {
            locale: locale.to_string(),
            extra: Map::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Compile for the editor: runs `editing` functions and emits `__editing`.
    pub is_editing: bool,
}

impl CompileOptions {
    pub fn editing() -> Self {
        Self { is_editing: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub compile: CompileOptions,
    pub max_fetch_iterations: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compile: CompileOptions::default(),
            max_fetch_iterations: DEFAULT_MAX_FETCH_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_devices_reject_duplicates() {
        let err = Devices::new(vec![
            DeviceRange::new("lg", 1200, None),
            DeviceRange::new("lg", 800, Some(1200)),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_flagged_main_device_wins_and_empty_list_is_rejected() {
        let devices = Devices::new(vec![
            DeviceRange::new("lg", 1200, None),
            DeviceRange::new("md", 800, Some(1200)).main(),
        ])
        .unwrap();
        assert_eq!(devices.main().map(|d| d.id.as_str()), Some("md"));

        let err = Devices::new(vec![]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_main_device_defaults_to_largest() {
        let devices = Devices::new(vec![
            DeviceRange::new("lg", 1200, Some(1200)),
            DeviceRange::new("sm", 400, None),
        ])
        .unwrap();
        assert_eq!(devices.main().map(|d| d.id.as_str()), Some("lg"));
    }

    #[test]
    fn test_default_devices_main_is_lg() {
        let devices = Config::new().devices().unwrap();
        assert_eq!(devices.len(), 6);
        assert_eq!(devices.main().map(|d| d.id.as_str()), Some("lg"));
        assert_eq!(devices.position("xs"), Some(5));
    }

    #[test]
    fn test_device_version_changes_with_widths() {
        let a = Devices::new(vec![DeviceRange::new("lg", 1200, None)]).unwrap();
        let b = Devices::new(vec![DeviceRange::new("lg", 1300, None)]).unwrap();
        assert_ne!(a.version(), b.version());
        assert_eq!(a.version(), a.clone().version());
    }

    #[test]
    fn test_locale_chain_follows_fallbacks_then_default() {
        let locales = vec![
            Locale::new("en").default_locale(),
            Locale::new("de").with_fallback("de-AT"),
            Locale::new("de-AT").with_fallback("de"),
        ];
        assert_eq!(locale_chain(&locales, "de"), vec!["de", "de-AT", "en"]);
        assert_eq!(locale_chain(&locales, "en"), vec!["en"]);
    }

    #[test]
    fn test_custom_type_deserialization() {
        let def: CustomTypeDefinition = serde_json::from_value(json!({
            "type": "token",
            "token": "aspectRatios",
            "defaultValue": { "tokenId": "square" },
            "responsiveness": "always"
        }))
        .unwrap();
        assert_eq!(def.responsiveness(), Responsiveness::Always);
        assert!(matches!(def, CustomTypeDefinition::Token(ref t) if t.token == "aspectRatios"));
    }

    #[test]
    fn test_context_params_flatten_extra() {
        let params: ContextParams =
            serde_json::from_value(json!({ "locale": "en", "currency": "EUR" })).unwrap();
        assert_eq!(params.locale, "en");
        assert_eq!(params.extra.get("currency"), Some(&json!("EUR")));
    }
}
