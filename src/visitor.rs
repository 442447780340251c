use serde_json::{Map, Value};

use crate::definition::ComponentDefinition;
use crate::registry::CompilationContext;
use crate::schema::{SchemaProp, SchemaPropKind};

/// Joins a dotted entry path. The root entry has the empty path.
pub fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

/// The item list of a localised collection for the context's locale,
/// following the fallback chain. Returns the locale actually used.
pub fn localised_items<'v, 'c>(
    value: &'v Value,
    locale_chain: &'c [String],
) -> Option<(&'c str, &'v Vec<Value>)> {
    let map = value.as_object()?;
    locale_chain.iter().find_map(|locale| {
        map.get(locale)
            .and_then(Value::as_array)
            .map(|items| (locale.as_str(), items))
    })
}

/// Child entries held by a component-kind prop, with their paths.
pub fn child_entries<'v>(
    prop: &SchemaProp,
    value: &'v Value,
    path: &str,
    locale_chain: &[String],
) -> Vec<(String, &'v Value)> {
    let prop_path = join_path(path, &prop.prop);
    match &prop.kind {
        SchemaPropKind::Component { .. } | SchemaPropKind::ComponentCollection { .. } => value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (join_path(&prop_path, &i.to_string()), item))
                    .collect()
            })
            .unwrap_or_default(),
        SchemaPropKind::ComponentCollectionLocalised { .. } => {
            match localised_items(value, locale_chain) {
                Some((locale, items)) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (format!("{}.{}.{}", prop_path, locale, i), item))
                    .collect(),
                None => vec![],
            }
        }
        _ => vec![],
    }
}

/// Read-only traversal of a normalized entry tree.
///
/// Rules:
/// 1. Entries are visited parent first, children in schema order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers call the matching `walk_*` function to keep descending;
///    not calling it prunes the subtree.
pub trait EntryVisitor {
    fn visit_entry(&mut self, ctx: &CompilationContext, entry: &Value, path: &str) {
        walk_entry(self, ctx, entry, path);
    }

    fn visit_prop(
        &mut self,
        ctx: &CompilationContext,
        entry: &Map<String, Value>,
        prop: &SchemaProp,
        value: &Value,
        path: &str,
    ) {
        walk_prop(self, ctx, entry, prop, value, path);
    }

    /// Entries whose `_component` is not registered. Leaf by default.
    fn visit_unknown(&mut self, _entry: &Value, _path: &str) {}
}

pub fn walk_entry<V: EntryVisitor + ?Sized>(
    visitor: &mut V,
    ctx: &CompilationContext,
    entry: &Value,
    path: &str,
) {
    let Some(map) = entry.as_object() else {
        visitor.visit_unknown(entry, path);
        return;
    };
    let definition: Option<&ComponentDefinition> = map
        .get("_component")
        .and_then(Value::as_str)
        .and_then(|id| ctx.definition(id))
        .map(|d| d.as_ref());

    let Some(definition) = definition else {
        visitor.visit_unknown(entry, path);
        return;
    };

    for prop in &definition.schema {
        if let Some(value) = map.get(&prop.prop) {
            visitor.visit_prop(ctx, map, prop, value, path);
        }
    }
}

pub fn walk_prop<V: EntryVisitor + ?Sized>(
    visitor: &mut V,
    ctx: &CompilationContext,
    _entry: &Map<String, Value>,
    prop: &SchemaProp,
    value: &Value,
    path: &str,
) {
    for (child_path, child) in child_entries(prop, value, path, &ctx.locale_chain) {
        visitor.visit_entry(ctx, child, &child_path);
    }
}

/// Finds the chain of entry ids from the root down to `target_id`.
pub struct AncestorFinder<'t> {
    target_id: &'t str,
    stack: Vec<String>,
    pub chain: Option<Vec<String>>,
}

impl<'t> AncestorFinder<'t> {
    pub fn new(target_id: &'t str) -> Self {
        Self {
            target_id,
            stack: vec![],
            chain: None,
        }
    }
}

impl EntryVisitor for AncestorFinder<'_> {
    fn visit_entry(&mut self, ctx: &CompilationContext, entry: &Value, path: &str) {
        if self.chain.is_some() {
            return;
        }
        let Some(id) = entry.get("_id").and_then(Value::as_str) else {
            return;
        };
        self.stack.push(id.to_string());
        if id == self.target_id {
            self.chain = Some(self.stack.clone());
        } else {
            walk_entry(self, ctx, entry, path);
        }
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "items"), "items");
        assert_eq!(join_path("items.0", "button"), "items.0.button");
    }

    #[test]
    fn test_localised_items_follow_chain() {
        let value = json!({ "en": [{ "_component": "A" }], "de": [] });
        let chain = vec!["fr".to_string(), "en".to_string()];
        let (locale, items) = localised_items(&value, &chain).unwrap();
        assert_eq!(locale, "en");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_child_entries_paths() {
        let prop = SchemaProp::collection("items", &[]);
        let value = json!([{ "_id": "a" }, { "_id": "b" }]);
        let children = child_entries(&prop, &value, "hero.0", &[]);
        assert_eq!(children[1].0, "hero.0.items.1");
    }
}
