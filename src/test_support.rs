//! Shared fixtures for the scenario tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::CompilationCache;
use crate::compiler::{compile, CompileOutput};
use crate::config::{
    CompileOptions, Config, ConfigTokenValue, ContextParams, CustomTypeDefinition, DeviceRange,
    ExternalTypeDefinition, Locale, Responsiveness, Widget,
};
use crate::definition::ComponentDefinition;
use crate::externals::{ExternalDataStore, FetchOutputResources, RequestedExternalData};
use crate::orchestrator::ExternalDataFetcher;
use crate::registry::CompilationContext;
use crate::schema::SchemaProp;
use crate::validate::CompilerWarning;

pub(crate) fn devices() -> Vec<DeviceRange> {
    vec![
        DeviceRange::new("lg", 1200, Some(1200)).main(),
        DeviceRange::new("sm", 600, None),
    ]
}

pub(crate) fn page() -> ComponentDefinition {
    ComponentDefinition::new("Page")
        .with_prop(SchemaProp::string("title").responsive())
        .with_prop(SchemaProp::component("hero", &["Banner"]))
        .with_prop(
            SchemaProp::collection("items", &["item"])
                .with_item_fields(vec![SchemaProp::number("span").with_default(serde_json::json!(1))]),
        )
}

pub(crate) fn card() -> ComponentDefinition {
    ComponentDefinition::new("Card")
        .with_type("item")
        .with_prop(SchemaProp::string("label"))
        .with_prop(SchemaProp::color("color"))
        .with_prop(SchemaProp::space("gap"))
}

pub(crate) fn banner() -> ComponentDefinition {
    ComponentDefinition::new("Banner")
        .with_prop(SchemaProp::text("headline").with_group("Content"))
        .with_prop(SchemaProp::custom("image", "image"))
}

pub(crate) fn stack() -> ComponentDefinition {
    ComponentDefinition::new("Stack").with_prop(SchemaProp::collection("children", &[]))
}

pub(crate) fn frame() -> ComponentDefinition {
    ComponentDefinition::new("Frame")
        .with_prop(SchemaProp::custom("content", "section"))
        .with_prop(SchemaProp::string("tag"))
}

/// Types, tokens, locales and devices, without components.
pub(crate) fn base_config() -> Config {
    Config::new()
        .with_devices(devices())
        .with_locale(Locale::new("en").default_locale())
        .with_locale(Locale::new("de").with_fallback("en"))
        .with_tokens(
            "colors",
            vec![
                ConfigTokenValue::new("brand", serde_json::json!("#f00")).default_token(),
                ConfigTokenValue::new("ink", serde_json::json!({ "$res": true, "lg": "#000", "sm": "#111" })),
            ],
        )
        .with_tokens("space", vec![ConfigTokenValue::new("s", serde_json::json!(8)).default_token()])
        .with_type(
            "image",
            CustomTypeDefinition::External(ExternalTypeDefinition {
                widgets: vec![Widget::new("media", "Media")],
                responsiveness: Responsiveness::Optional,
            }),
        )
        .with_type(
            "section",
            CustomTypeDefinition::External(ExternalTypeDefinition {
                widgets: vec![Widget::new("cms", "CMS")],
                responsiveness: Responsiveness::Never,
            }),
        )
}

/// `base_config` with the given definitions; standard ones fill the gaps.
pub(crate) fn config_with(definitions: Vec<ComponentDefinition>) -> Config {
    let mut config = base_config();
    for standard in [page(), card(), banner(), stack(), frame()] {
        if !definitions.iter().any(|d| d.id == standard.id) {
            config = config.with_component(standard);
        }
    }
    for definition in definitions {
        config = config.with_component(definition);
    }
    config
}

pub(crate) fn context_for(config: &Config, locale: &str) -> CompilationContext {
    CompilationContext::new(config, ContextParams::new(locale), "Page").unwrap()
}

pub(crate) fn context() -> CompilationContext {
    context_for(&config_with(vec![]), "en")
}

/// One pass with a fresh cache and empty store.
pub(crate) fn compile_once(entry: &Value, ctx: &CompilationContext) -> CompileOutput {
    compile(
        entry,
        ctx,
        &mut CompilationCache::new(),
        &ExternalDataStore::new(),
        CompileOptions::default(),
    )
    .unwrap()
}

pub(crate) fn codes(warnings: &[CompilerWarning]) -> Vec<&str> {
    warnings.iter().map(|w| w.code.as_str()).collect()
}

pub(crate) fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

type Respond =
    Box<dyn Fn(&RequestedExternalData) -> anyhow::Result<FetchOutputResources> + Send + Sync>;

/// Fetcher answering from a closure and counting its calls.
pub(crate) struct FnFetcher {
    respond: Respond,
    calls: AtomicUsize,
}

impl FnFetcher {
    pub(crate) fn new<F>(respond: F) -> Self
    where
        F: Fn(&RequestedExternalData) -> anyhow::Result<FetchOutputResources> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalDataFetcher for FnFetcher {
    async fn fetch(
        &self,
        requested: &RequestedExternalData,
        _params: &ContextParams,
    ) -> anyhow::Result<FetchOutputResources> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(requested)
    }
}
