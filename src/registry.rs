//! Definition registry and the per-session compilation context.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{
    locale_chain, Config, ContextParams, CustomTypeDefinition, Devices, Locale, Responsiveness,
    Template, TokenTables,
};
use crate::definition::{ChangeInput, ComponentDefinition};
use crate::error::{CompileError, Result};
use crate::invoke::invoke_change;
use crate::schema::{SchemaProp, SchemaPropKind};
use crate::validate::Warnings;

/// Lookup table of component definitions, built once from a [`Config`].
///
/// Custom schema types are bound here, so every prop the compiler sees is one
/// of the closed [`SchemaPropKind`] variants other than `Custom`.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: IndexMap<String, Arc<ComponentDefinition>>,
}

impl DefinitionRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut definitions = IndexMap::new();

        for definition in &config.components {
            if definitions.contains_key(&definition.id) {
                return Err(CompileError::invalid_config(format!(
                    "component '{}' is registered twice",
                    definition.id
                )));
            }
            let mut definition = definition.clone();
            bind_custom_types(&mut definition.schema, &config.types, &definition.id)?;
            check_schema(&definition)?;
            definitions.insert(definition.id.clone(), Arc::new(definition));
        }

        tracing::debug!(count = definitions.len(), "definition registry built");
        Ok(Self { definitions })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ComponentDefinition>> {
        self.definitions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComponentDefinition>> {
        self.definitions.values()
    }
}

fn bind_custom_types(
    schema: &mut [SchemaProp],
    types: &IndexMap<String, CustomTypeDefinition>,
    owner: &str,
) -> Result<()> {
    for prop in schema.iter_mut() {
        let bound = match &prop.kind {
            SchemaPropKind::Custom {
                type_name,
                default_value,
                params,
                optional,
                responsive,
            } => {
                let custom = types.get(type_name).ok_or_else(|| {
                    CompileError::invalid_config(format!(
                        "component '{}' prop '{}' uses unknown type '{}'",
                        owner, prop.prop, type_name
                    ))
                })?;
                let responsive = match custom.responsiveness() {
                    Responsiveness::Always => true,
                    Responsiveness::Optional => *responsive,
                    Responsiveness::Never => false,
                };
                Some(match custom {
                    CustomTypeDefinition::Inline(def) => SchemaPropKind::Local {
                        type_name: type_name.clone(),
                        default_value: default_value
                            .clone()
                            .or_else(|| Some(def.default_value.clone())),
                        responsive,
                    },
                    CustomTypeDefinition::External(_) => SchemaPropKind::External {
                        type_name: type_name.clone(),
                        params: params.clone(),
                        optional: *optional,
                        responsive,
                    },
                    CustomTypeDefinition::Token(def) => SchemaPropKind::Token {
                        type_name: type_name.clone(),
                        token: def.token.clone(),
                        default_value: default_value
                            .clone()
                            .or_else(|| Some(def.default_value.clone())),
                        extra_values: def.extra_values.clone(),
                        responsive,
                    },
                })
            }
            SchemaPropKind::ComponentCollection { .. }
            | SchemaPropKind::ComponentCollectionLocalised { .. } => None,
            _ => continue,
        };

        match bound {
            Some(kind) => prop.kind = kind,
            None => {
                if let SchemaPropKind::ComponentCollection { item_fields, .. }
                | SchemaPropKind::ComponentCollectionLocalised { item_fields, .. } = &mut prop.kind
                {
                    bind_custom_types(item_fields, types, owner)?;
                }
            }
        }
    }
    Ok(())
}

fn check_schema(definition: &ComponentDefinition) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for prop in &definition.schema {
        if prop.prop.starts_with('_') {
            return Err(CompileError::invalid_config(format!(
                "component '{}' prop '{}' uses the reserved '_' prefix",
                definition.id, prop.prop
            )));
        }
        if !seen.insert(prop.prop.as_str()) {
            return Err(CompileError::invalid_config(format!(
                "component '{}' declares prop '{}' twice",
                definition.id, prop.prop
            )));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILATION CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only inputs of a compile session: one per (config, locale, root
/// component). Cloning is cheap; the registry is shared.
#[derive(Debug, Clone)]
pub struct CompilationContext {
    pub devices: Devices,
    pub device_version: String,
    pub registry: Arc<DefinitionRegistry>,
    pub tokens: Arc<TokenTables>,
    pub locales: Vec<Locale>,
    pub locale_chain: Vec<String>,
    pub params: ContextParams,
    pub root_component_id: String,
    pub templates: Vec<Template>,
}

impl CompilationContext {
    pub fn new(config: &Config, params: ContextParams, root_component_id: &str) -> Result<Self> {
        let devices = config.devices()?;
        let registry = DefinitionRegistry::from_config(config)?;

        if !registry.contains(root_component_id) {
            return Err(CompileError::invalid_config(format!(
                "root component '{}' is not registered",
                root_component_id
            )));
        }

        Self::check_locale(&config.locales, &params.locale)?;

        Ok(Self {
            device_version: devices.version(),
            devices,
            registry: Arc::new(registry),
            tokens: Arc::new(config.tokens.clone()),
            locale_chain: locale_chain(&config.locales, &params.locale),
            locales: config.locales.clone(),
            params,
            root_component_id: root_component_id.to_string(),
            templates: config.templates.clone(),
        })
    }

    fn check_locale(locales: &[Locale], locale: &str) -> Result<()> {
        if !locales.is_empty() && !locales.iter().any(|l| l.code == locale) {
            return Err(CompileError::invalid_config(format!(
                "locale '{}' is not configured",
                locale
            )));
        }
        Ok(())
    }

    /// Same session inputs, different locale.
    pub fn with_locale(&self, locale: &str) -> Result<Self> {
        Self::check_locale(&self.locales, locale)?;
        let mut next = self.clone();
        next.params.locale = locale.to_string();
        next.locale_chain = locale_chain(&self.locales, locale);
        Ok(next)
    }

    pub fn locale(&self) -> &str {
        &self.params.locale
    }

    pub fn definition(&self, id: &str) -> Option<&Arc<ComponentDefinition>> {
        self.registry.get(id)
    }

    /// Runs a definition's `change` function for an edit of `input.prop`.
    /// The patch is returned verbatim; a failing function yields `None`.
    pub fn run_change(
        &self,
        component_id: &str,
        input: &ChangeInput,
    ) -> Result<Option<Map<String, Value>>> {
        let definition = self.definition(component_id).ok_or_else(|| {
            CompileError::invalid_input(format!("component '{}' is not registered", component_id))
        })?;
        let mut warnings = Warnings::new();
        Ok(invoke_change(definition, input, &mut warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalTypeDefinition, TokenTypeDefinition, Widget};
    use serde_json::json;

    fn config() -> Config {
        Config::new()
            .with_type(
                "image",
                CustomTypeDefinition::External(ExternalTypeDefinition {
                    widgets: vec![Widget::new("media", "Media")],
                    responsiveness: Responsiveness::Optional,
                }),
            )
            .with_type(
                "aspectRatio",
                CustomTypeDefinition::Token(TokenTypeDefinition {
                    widget: None,
                    responsiveness: Responsiveness::Always,
                    token: "aspectRatios".to_string(),
                    default_value: json!({ "tokenId": "square" }),
                    extra_values: vec![],
                    allow_custom: false,
                }),
            )
            .with_component(
                ComponentDefinition::new("Image")
                    .with_prop(SchemaProp::custom("image", "image").responsive())
                    .with_prop(SchemaProp::custom("ratio", "aspectRatio")),
            )
    }

    #[test]
    fn test_custom_types_are_bound() {
        let registry = DefinitionRegistry::from_config(&config()).unwrap();
        let image = registry.get("Image").unwrap();
        assert!(matches!(
            image.schema[0].kind,
            SchemaPropKind::External { responsive: true, .. }
        ));
        match &image.schema[1].kind {
            SchemaPropKind::Token {
                token,
                default_value,
                responsive,
                ..
            } => {
                assert_eq!(token, "aspectRatios");
                assert_eq!(default_value, &Some(json!({ "tokenId": "square" })));
                assert!(*responsive);
            }
            other => panic!("expected token kind, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_custom_type_is_config_error() {
        let config = Config::new().with_component(
            ComponentDefinition::new("Video").with_prop(SchemaProp::custom("video", "video")),
        );
        let err = DefinitionRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown type 'video'"));
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let config = Config::new()
            .with_component(ComponentDefinition::new("A"))
            .with_component(ComponentDefinition::new("A"));
        assert!(DefinitionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_context_requires_registered_root() {
        let err = CompilationContext::new(&config(), ContextParams::new("en"), "Page").unwrap_err();
        assert!(matches!(err, CompileError::InvalidConfig { .. }));
    }

    #[test]
    fn test_context_locale_switch() {
        let config = config()
            .with_locale(Locale::new("en").default_locale())
            .with_locale(Locale::new("de"));
        let ctx = CompilationContext::new(&config, ContextParams::new("de"), "Image").unwrap();
        assert_eq!(ctx.locale_chain, vec!["de", "en"]);
        let en = ctx.with_locale("en").unwrap();
        assert_eq!(en.locale(), "en");
        assert!(Arc::ptr_eq(&en.registry, &ctx.registry));
        assert!(ctx.with_locale("fr").is_err());
    }

    #[test]
    fn test_run_change_returns_patch_verbatim() {
        let config = Config::new().with_component(
            ComponentDefinition::new("Sum")
                .with_prop(SchemaProp::number("a"))
                .with_prop(SchemaProp::number("total"))
                .with_change(|input| {
                    let n = input.new_value.as_f64().unwrap_or(0.0);
                    let mut patch = Map::new();
                    patch.insert("total".into(), json!(n * 2.0));
                    Ok(Some(patch))
                }),
        );
        let ctx = CompilationContext::new(&config, ContextParams::new("en"), "Sum").unwrap();
        let patch = ctx
            .run_change(
                "Sum",
                &ChangeInput {
                    new_value: json!(3),
                    prop: "a".to_string(),
                    values: Map::new(),
                    values_after_auto: Map::new(),
                },
            )
            .unwrap();
        assert_eq!(patch.unwrap().get("total"), Some(&json!(6.0)));
    }
}
