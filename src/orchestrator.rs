//! The external-data fixed point and the entry points built on top of one
//! compile pass.
//!
//! `build_entry` alternates compile passes and fetches until a pass requests
//! nothing new. Each iteration awaits the fetcher exactly once; there is no
//! retry. A superseded build is simply dropped by the caller.

use async_trait::async_trait;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde_json::Value;
use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::CompilationCache;
use crate::compiler::{compile, CompileOutput, CompiledComponentConfig};
use crate::config::{BuildOptions, CompileOptions, ContextParams};
use crate::error::{CompileError, Result};
use crate::externals::{ExternalData, ExternalDataStore, FetchOutputResources, RequestedExternalData};
use crate::meta::CompilationMetadata;
use crate::registry::CompilationContext;
use crate::validate::CompilerWarning;

/// Resolves requested external references. Ids left out of the response
/// are treated as rejected; an `Err` aborts the whole build.
#[async_trait]
pub trait ExternalDataFetcher: Send + Sync {
    async fn fetch(
        &self,
        requested: &RequestedExternalData,
        params: &ContextParams,
    ) -> anyhow::Result<FetchOutputResources>;
}

#[derive(Debug, Clone)]
pub struct BuildEntryResult {
    pub compiled: Arc<CompiledComponentConfig>,
    pub config_after_auto: Value,
    pub meta: CompilationMetadata,
    pub warnings: Vec<CompilerWarning>,
    /// Everything the store holds after the last pass.
    pub external_data: ExternalData,
    /// Number of fetch round-trips.
    pub iterations: usize,
}

pub async fn build_entry(
    entry: &Value,
    ctx: &CompilationContext,
    cache: &mut CompilationCache,
    store: &mut ExternalDataStore,
    fetcher: &dyn ExternalDataFetcher,
    options: BuildOptions,
) -> Result<BuildEntryResult> {
    let mut meta: Option<CompilationMetadata> = None;
    let mut iterations = 0;

    loop {
        let output = compile(entry, ctx, cache, store, options.compile)?;
        let merged = match meta.take() {
            Some(mut previous) => {
                previous.merge(&output.meta);
                previous
            }
            None => output.meta.clone(),
        };

        if output.requested.is_empty() {
            tracing::debug!(iterations, "external data reached a fixed point");
            return Ok(BuildEntryResult {
                compiled: output.compiled,
                config_after_auto: output.config_after_auto,
                meta: merged,
                warnings: output.warnings,
                external_data: store.to_external_data(),
                iterations,
            });
        }

        if iterations >= options.max_fetch_iterations {
            return Err(CompileError::ExternalResolutionDiverged {
                iterations,
                pending: output.requested.keys().cloned().collect(),
            });
        }

        iterations += 1;
        tracing::debug!(
            iteration = iterations,
            requested = output.requested.len(),
            "fetching external data"
        );
        let fetched = fetcher
            .fetch(&output.requested, &ctx.params)
            .await
            .map_err(|e| CompileError::ExternalDataFetch {
                message: format!("{:#}", e),
            })?;
        store.merge(&output.requested, fetched);
        meta = Some(merged);
    }
}

/// Loads a document through the backend, then builds its entry.
pub async fn build_document(
    backend: &dyn Backend,
    document_id: &str,
    ctx: &CompilationContext,
    cache: &mut CompilationCache,
    store: &mut ExternalDataStore,
    fetcher: &dyn ExternalDataFetcher,
    options: BuildOptions,
) -> Result<BuildEntryResult> {
    let document = backend
        .get_document(document_id, Some(ctx.locale()))
        .await
        .map_err(|e| CompileError::Backend {
            message: format!("{:#}", e),
        })?;
    tracing::debug!(document = %document.id, version = document.version, "loaded document");
    build_entry(&document.entry, ctx, cache, store, fetcher, options).await
}

/// Compiles the same entry for several locales in parallel. Every locale
/// gets its own context and cache; the store is only read.
pub fn compile_locales(
    entry: &Value,
    ctx: &CompilationContext,
    locales: &[String],
    store: &ExternalDataStore,
    options: CompileOptions,
) -> Result<IndexMap<String, CompileOutput>> {
    let outputs = locales
        .par_iter()
        .map(|locale| {
            let ctx = ctx.with_locale(locale)?;
            let mut cache = CompilationCache::new();
            let output = compile(entry, &ctx, &mut cache, store, options)?;
            Ok((locale.clone(), output))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(outputs.into_iter().collect())
}
