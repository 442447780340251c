//! JSON bridge for a JavaScript host.
//!
//! Definitions cross the bridge as data only: `styles`, `auto`, `editing`
//! and `change` stay unset, so nodes compile from their resolved values.

use napi_derive::napi;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::CompilationCache;
use crate::compiler::{compile, CompiledComponentConfig};
use crate::config::{CompileOptions, Config, ContextParams};
use crate::externals::{find_externals, ExternalData, ExternalDataStore, ExternalReference, RequestedExternalData};
use crate::meta::CompilationMetadata;
use crate::registry::CompilationContext;
use crate::validate::{validate, CompilerWarning};

fn reason(message: impl ToString) -> napi::Error {
    napi::Error::from_reason(message.to_string())
}

fn context(config: Value, params: Value, root_component: &str) -> napi::Result<CompilationContext> {
    let config: Config =
        serde_json::from_value(config).map_err(|e| reason(format!("Invalid config: {}", e)))?;
    let params: ContextParams =
        serde_json::from_value(params).map_err(|e| reason(format!("Invalid params: {}", e)))?;
    CompilationContext::new(&config, params, root_component).map_err(reason)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NativeCompileOutput {
    compiled: Arc<CompiledComponentConfig>,
    config_after_auto: Value,
    meta: CompilationMetadata,
    warnings: Vec<CompilerWarning>,
    requested_external_data: RequestedExternalData,
}

#[napi]
pub fn compile_native(
    entry: Value,
    config: Value,
    params: Value,
    root_component: String,
    external_data: Option<Value>,
    is_editing: Option<bool>,
    requested_external_data: Option<Value>,
) -> napi::Result<Value> {
    let ctx = context(config, params, &root_component)?;
    let store = match external_data {
        Some(data) => {
            let data: ExternalData = serde_json::from_value(data)
                .map_err(|e| reason(format!("Invalid external data: {}", e)))?;
            match requested_external_data {
                Some(requested) => {
                    let requested: RequestedExternalData = serde_json::from_value(requested)
                        .map_err(|e| reason(format!("Invalid requested external data: {}", e)))?;
                    ExternalDataStore::seed(data, &requested)
                }
                None => ExternalDataStore::from(data),
            }
        }
        None => ExternalDataStore::new(),
    };
    let options = CompileOptions {
        is_editing: is_editing.unwrap_or(false),
    };

    let mut cache = CompilationCache::new();
    let output = compile(&entry, &ctx, &mut cache, &store, options).map_err(reason)?;

    serde_json::to_value(NativeCompileOutput {
        compiled: output.compiled,
        config_after_auto: output.config_after_auto,
        meta: output.meta,
        warnings: output.warnings,
        requested_external_data: output.requested,
    })
    .map_err(|e| reason(format!("Serialize error: {}", e)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NativeExternal {
    id: String,
    external_reference: ExternalReference,
    prop: String,
    entry_id: String,
    path: String,
}

#[napi]
pub fn find_externals_native(
    entry: Value,
    config: Value,
    params: Value,
    root_component: String,
) -> napi::Result<Value> {
    let ctx = context(config, params, &root_component)?;
    let found: Vec<NativeExternal> = find_externals(&entry, &ctx)
        .into_iter()
        .map(|e| NativeExternal {
            id: e.id,
            external_reference: e.external_reference,
            prop: e.schema_prop.prop,
            entry_id: e.entry_id,
            path: e.path,
        })
        .collect();
    serde_json::to_value(found).map_err(|e| reason(format!("Serialize error: {}", e)))
}

#[napi(object)]
pub struct NativeValidationResult {
    pub is_valid: bool,
    pub reason: Option<String>,
}

#[napi]
pub fn validate_native(input: Value) -> NativeValidationResult {
    let result = validate(&input);
    NativeValidationResult {
        is_valid: result.is_valid,
        reason: result.reason,
    }
}
