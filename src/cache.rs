use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::{validated_entry, CompiledComponentConfig};
use crate::externals::ExternalDataStore;
use crate::normalize::normalize;
use crate::registry::CompilationContext;
use crate::validate::CompilerWarning;
use crate::visitor::{AncestorFinder, EntryVisitor};

/// Everything that distinguishes two compilations of the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub locale: String,
    pub device_version: String,
    pub is_editing: bool,
}

impl CacheKey {
    pub fn new(ctx: &CompilationContext, is_editing: bool) -> Self {
        Self {
            locale: ctx.locale().to_string(),
            device_version: ctx.device_version.clone(),
            is_editing,
        }
    }
}

/// A compiled subtree plus what it was compiled from.
#[derive(Debug, Clone)]
pub struct CachedNode {
    pub compiled: Arc<CompiledComponentConfig>,
    pub config_after_auto: Value,
    /// Store versions of every external request id the subtree read.
    pub slice: IndexMap<String, Option<u64>>,
    /// Definition ids used anywhere in the subtree.
    pub definitions: Vec<String>,
    pub warnings: Vec<CompilerWarning>,
    pub path: String,
}

impl CachedNode {
    fn is_fresh(&self, path: &str, store: &ExternalDataStore) -> bool {
        self.path == path
            && self
                .slice
                .iter()
                .all(|(request_id, version)| store.version(request_id) == *version)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// In-memory compiled-subtree cache, keyed by entry id then by [`CacheKey`].
///
/// Entries are never invalidated by content: the caller removes the changed
/// entry and its ancestors (see [`remove_ancestors`](Self::remove_ancestors))
/// before recompiling. Changes to fetched data are picked up automatically
/// through each node's slice versions.
#[derive(Debug, Default)]
pub struct CompilationCache {
    nodes: HashMap<String, HashMap<CacheKey, CachedNode>>,
    mode: Option<(bool, String)>,
    hits: u64,
    misses: u64,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything when the editing flag or the device set changed
    /// since the previous pass.
    pub fn ensure_mode(&mut self, is_editing: bool, device_version: &str) {
        let unchanged = self
            .mode
            .as_ref()
            .map_or(false, |(e, v)| *e == is_editing && v == device_version);
        if unchanged {
            return;
        }
        if self.mode.is_some() {
            tracing::debug!(is_editing, device_version, "compilation mode changed, clearing cache");
            self.clear();
        }
        self.mode = Some((is_editing, device_version.to_string()));
    }

    pub fn get(
        &mut self,
        entry_id: &str,
        key: &CacheKey,
        path: &str,
        store: &ExternalDataStore,
    ) -> Option<&CachedNode> {
        let fresh = self
            .nodes
            .get(entry_id)
            .and_then(|variants| variants.get(key))
            .map(|node| node.is_fresh(path, store));

        match fresh {
            Some(true) => {
                self.hits += 1;
                tracing::trace!(entry_id, path, "cache hit");
                self.nodes.get(entry_id).and_then(|variants| variants.get(key))
            }
            Some(false) => {
                self.misses += 1;
                tracing::trace!(entry_id, path, "cache entry outdated");
                if let Some(variants) = self.nodes.get_mut(entry_id) {
                    variants.remove(key);
                }
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn set(&mut self, entry_id: &str, key: CacheKey, node: CachedNode) {
        self.nodes
            .entry(entry_id.to_string())
            .or_default()
            .insert(key, node);
    }

    /// Removes every variant cached for `entry_id`.
    pub fn remove(&mut self, entry_id: &str) -> bool {
        self.nodes.remove(entry_id).is_some()
    }

    /// Removes `changed_id` and every entry above it in `root`. Returns the
    /// removed ids, root first; empty when `changed_id` is not in the tree.
    ///
    /// `root` is the same input `compile` takes. It is walked after
    /// normalization, so derived and repaired ids match the cached ones.
    pub fn remove_ancestors(
        &mut self,
        root: &Value,
        ctx: &CompilationContext,
        changed_id: &str,
    ) -> Vec<String> {
        let entry = match validated_entry(root, ctx) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(changed_id, error = %err, "nothing to invalidate");
                return vec![];
            }
        };
        let (normalized, _) = normalize(&entry, ctx);
        let mut finder = AncestorFinder::new(changed_id);
        finder.visit_entry(ctx, &normalized, "");
        let chain = finder.chain.unwrap_or_default();
        for id in &chain {
            self.remove(id);
        }
        tracing::debug!(changed_id, removed = chain.len(), "invalidated ancestors");
        chain
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.nodes.values().map(HashMap::len).sum(),
        }
    }
}
