//! Entry normalization: stable ids, schema-shaped props, defaults.
//!
//! Normalization never fails. Anything it cannot make sense of is reported
//! as a [`CompilerWarning`] and replaced by the prop's default, or left for
//! the compiler to turn into a sentinel node.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::externals::{LOCAL_TEXT_PREFIX, LOCAL_TEXT_WIDGET_ID};
use crate::registry::CompilationContext;
use crate::responsive::{is_trulyresponsive, ResponsiveValue};
use crate::schema::{SchemaProp, SchemaPropKind};
use crate::tokens::{default_token, token_reference};
use crate::validate::{
    json_type_name, CompilerWarning, Warnings, W_DUPLICATE_ID, W_INVALID_PROP_VALUE,
    W_MALFORMED_ENTRY, W_MISSING_COMPONENT,
};
use crate::visitor::join_path;

pub const POSITIONS: [&str; 9] = [
    "top-left",
    "top-center",
    "top-right",
    "center-left",
    "center-center",
    "center-right",
    "bottom-left",
    "bottom-center",
    "bottom-right",
];

/// Deterministic id for a structural position in the tree.
pub fn derive_id(seed: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

/// Normalizes a root entry.
pub fn normalize(entry: &Value, ctx: &CompilationContext) -> (Value, Warnings) {
    let mut normalizer = Normalizer::new(ctx, false);
    let component = entry
        .get("_component")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let value = normalizer.entry(entry, &format!("root:{}", component), "");
    (value, normalizer.warnings)
}

/// Normalizes an entry delivered as external data. Every id is re-derived
/// from `request_id`, so the same fetched entry embedded twice never yields
/// colliding ids.
pub fn normalize_embedded(
    entry: &Value,
    ctx: &CompilationContext,
    request_id: &str,
    path: &str,
) -> (Value, Warnings) {
    let mut normalizer = Normalizer::new(ctx, true);
    let value = normalizer.entry(entry, &format!("embedded:{}", request_id), path);
    (value, normalizer.warnings)
}

struct Normalizer<'a> {
    ctx: &'a CompilationContext,
    force_ids: bool,
    seen: HashSet<String>,
    warnings: Warnings,
}

impl<'a> Normalizer<'a> {
    fn new(ctx: &'a CompilationContext, force_ids: bool) -> Self {
        Self {
            ctx,
            force_ids,
            seen: HashSet::new(),
            warnings: Warnings::new(),
        }
    }

    fn entry(&mut self, raw: &Value, seed: &str, path: &str) -> Value {
        let Value::Object(map) = raw else {
            self.warnings.push(CompilerWarning::new(
                W_MALFORMED_ENTRY,
                format!("expected an entry object, got {}", json_type_name(raw)),
                None,
                path,
            ));
            return raw.clone();
        };

        let id = self.assign_id(map.get("_id"), seed, path);
        let component = map
            .get("_component")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty());

        let Some(component) = component else {
            self.warnings.push(CompilerWarning::new(
                W_MALFORMED_ENTRY,
                "entry has no '_component'",
                Some(&id),
                path,
            ));
            let mut out = map.clone();
            out.insert("_id".into(), Value::String(id));
            return Value::Object(out);
        };

        let mut out = Map::new();
        out.insert("_component".into(), Value::String(component.to_string()));
        out.insert("_id".into(), Value::String(id.clone()));

        let Some(definition) = self.ctx.definition(component).cloned() else {
            self.warnings.push(CompilerWarning::new(
                W_MISSING_COMPONENT,
                format!("component '{}' is not registered", component),
                Some(&id),
                path,
            ));
            for (key, value) in map {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
            return Value::Object(out);
        };

        for prop in &definition.schema {
            let value = self.prop(prop, map.get(&prop.prop), &id, path);
            out.insert(prop.prop.clone(), value);
        }

        for (key, value) in map {
            if key.starts_with('_') && !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }

        Value::Object(out)
    }

    fn assign_id(&mut self, existing: Option<&Value>, seed: &str, path: &str) -> String {
        let existing = existing
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty() && !self.force_ids);
        let candidate = existing.map(str::to_string).unwrap_or_else(|| derive_id(seed));

        if self.seen.insert(candidate.clone()) {
            return candidate;
        }

        let mut attempt = 1;
        let repaired = loop {
            let next = derive_id(&format!("{}#dup{}:{}", seed, attempt, candidate));
            if self.seen.insert(next.clone()) {
                break next;
            }
            attempt += 1;
        };
        self.warnings.push(CompilerWarning::new(
            W_DUPLICATE_ID,
            format!("duplicate id '{}' regenerated as '{}'", candidate, repaired),
            Some(&repaired),
            path,
        ));
        repaired
    }

    fn prop(&mut self, prop: &SchemaProp, raw: Option<&Value>, node_id: &str, path: &str) -> Value {
        let prop_path = join_path(path, &prop.prop);
        match &prop.kind {
            SchemaPropKind::Component { .. } => {
                let items: Vec<&Value> = match raw {
                    Some(Value::Array(items)) => items.iter().collect(),
                    Some(entry @ Value::Object(_)) => vec![entry],
                    _ => vec![],
                };
                if items.len() > 1 {
                    self.invalid(node_id, &prop_path, "single component prop holds several entries; extra ones dropped");
                }
                Value::Array(
                    items
                        .into_iter()
                        .take(1)
                        .map(|item| {
                            self.entry(
                                item,
                                &format!("{}/{}/0", node_id, prop.prop),
                                &join_path(&prop_path, "0"),
                            )
                        })
                        .collect(),
                )
            }
            SchemaPropKind::ComponentCollection { item_fields, .. } => {
                let items: &[Value] = match raw {
                    Some(Value::Array(items)) => items.as_slice(),
                    Some(Value::Null) | None => &[],
                    Some(other) => {
                        self.invalid(
                            node_id,
                            &prop_path,
                            &format!("expected a list of entries, got {}", json_type_name(other)),
                        );
                        &[]
                    }
                };
                Value::Array(self.items(
                    items,
                    item_fields,
                    &format!("{}/{}", node_id, prop.prop),
                    &prop_path,
                ))
            }
            SchemaPropKind::ComponentCollectionLocalised { item_fields, .. } => {
                let mut out = Map::new();
                if let Some(Value::Object(per_locale)) = raw {
                    for (locale, items) in per_locale {
                        let Some(items) = items.as_array() else {
                            continue;
                        };
                        let normalized = self.items(
                            items,
                            item_fields,
                            &format!("{}/{}/{}", node_id, prop.prop, locale),
                            &join_path(&prop_path, locale),
                        );
                        out.insert(locale.clone(), Value::Array(normalized));
                    }
                }
                Value::Object(out)
            }
            _ => self.value(prop, raw, node_id, &prop_path),
        }
    }

    fn items(
        &mut self,
        items: &[Value],
        item_fields: &[SchemaProp],
        seed: &str,
        path: &str,
    ) -> Vec<Value> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let item_path = join_path(path, &i.to_string());
                let mut normalized = self.entry(item, &format!("{}/{}", seed, i), &item_path);
                if let Value::Object(map) = &mut normalized {
                    let item_id = map
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let raw_props = item.get("_itemProps").and_then(Value::as_object);
                    let mut props = Map::new();
                    for field in item_fields.iter().filter(|f| !f.kind.is_component()) {
                        let value = self.value(
                            field,
                            raw_props.and_then(|p| p.get(&field.prop)),
                            &item_id,
                            &join_path(&item_path, &format!("_itemProps.{}", field.prop)),
                        );
                        props.insert(field.prop.clone(), value);
                    }
                    map.insert("_itemProps".into(), Value::Object(props));
                }
                normalized
            })
            .collect()
    }

    fn value(&mut self, prop: &SchemaProp, raw: Option<&Value>, node_id: &str, path: &str) -> Value {
        match raw.filter(|v| !v.is_null()) {
            Some(raw) => match self.shape(prop, raw, node_id) {
                Ok(value) => value,
                Err(reason) => {
                    self.invalid(node_id, path, &format!("{}; default used", reason));
                    self.default_value(prop, node_id)
                }
            },
            None => self.default_value(prop, node_id),
        }
    }

    fn invalid(&mut self, node_id: &str, path: &str, message: &str) {
        self.warnings.push(CompilerWarning::new(
            W_INVALID_PROP_VALUE,
            message.to_string(),
            Some(node_id),
            path,
        ));
    }

    fn shape(&self, prop: &SchemaProp, raw: &Value, node_id: &str) -> Result<Value, String> {
        let mismatch = |value: &Value| {
            format!(
                "expected a '{}' value, got {}",
                prop.kind.type_name(),
                json_type_name(value)
            )
        };

        if !is_trulyresponsive(raw) {
            return self.conform(prop, raw, node_id).ok_or_else(|| mismatch(raw));
        }

        let devices = &self.ctx.devices;
        let ResponsiveValue::Responsive(entries) = ResponsiveValue::from(raw) else {
            return Err(mismatch(raw));
        };

        if !prop.kind.allows_responsive() {
            let responsive = ResponsiveValue::Responsive(entries);
            let collapsed = devices
                .main()
                .and_then(|main| responsive.resolve(devices, &main.id))
                .cloned()
                .ok_or_else(|| "responsive value has no entry for the main device".to_string())?;
            tracing::debug!(prop = %prop.prop, "collapsed responsive value on non-responsive prop");
            return self.conform(prop, &collapsed, node_id).ok_or_else(|| mismatch(&collapsed));
        }

        let mut out = IndexMap::new();
        for (device, value) in entries {
            if devices.position(&device).is_none() {
                continue;
            }
            let shaped = self.conform(prop, &value, node_id).ok_or_else(|| mismatch(&value))?;
            out.insert(device, shaped);
        }
        if out.is_empty() {
            return Err("responsive value has no entry for a configured device".to_string());
        }
        Ok(Value::from(ResponsiveValue::Responsive(out)))
    }

    /// Checks a single (non-responsive) value against the prop kind.
    fn conform(&self, prop: &SchemaProp, value: &Value, node_id: &str) -> Option<Value> {
        match &prop.kind {
            SchemaPropKind::String { .. } => value.is_string().then(|| value.clone()),
            SchemaPropKind::Number { min, max, .. } => value
                .as_f64()
                .filter(|n| min.map_or(true, |m| *n >= m) && max.map_or(true, |m| *n <= m))
                .map(|_| value.clone()),
            SchemaPropKind::Boolean { .. } => value.is_boolean().then(|| value.clone()),
            SchemaPropKind::Select { options, .. } | SchemaPropKind::RadioGroup { options, .. } => {
                let selected = value.as_str()?;
                options
                    .iter()
                    .any(|o| o.value() == selected)
                    .then(|| value.clone())
            }
            SchemaPropKind::Color { .. }
            | SchemaPropKind::Space { .. }
            | SchemaPropKind::Font { .. }
            | SchemaPropKind::StringToken { .. }
            | SchemaPropKind::Icon { .. }
            | SchemaPropKind::Token { .. } => wrap_token(value),
            SchemaPropKind::Text { .. } => self.text(value, &prop.prop, node_id),
            SchemaPropKind::Position { .. } => value
                .as_str()
                .filter(|p| POSITIONS.contains(p))
                .map(|_| value.clone()),
            SchemaPropKind::External { .. } => {
                let map = value.as_object()?;
                (map.contains_key("id") && map.get("widgetId").map_or(false, Value::is_string))
                    .then(|| value.clone())
            }
            SchemaPropKind::Local { type_name, .. } => match value {
                Value::Object(map) if map.contains_key("value") => {
                    let mut map = map.clone();
                    map.entry("widgetId")
                        .or_insert_with(|| Value::String(type_name.clone()));
                    Some(Value::Object(map))
                }
                other => Some(json!({ "value": other, "widgetId": type_name })),
            },
            SchemaPropKind::Custom { .. }
            | SchemaPropKind::Component { .. }
            | SchemaPropKind::ComponentCollection { .. }
            | SchemaPropKind::ComponentCollectionLocalised { .. } => Some(value.clone()),
        }
    }

    fn text(&self, value: &Value, prop: &str, node_id: &str) -> Option<Value> {
        match value {
            Value::String(s) => {
                let mut localized = Map::new();
                localized.insert(self.ctx.locale().to_string(), Value::String(s.clone()));
                Some(self.local_text(prop, node_id, localized))
            }
            Value::Object(map) => {
                let widget_id = map.get("widgetId").and_then(Value::as_str)?;
                if widget_id != LOCAL_TEXT_WIDGET_ID {
                    return map.contains_key("id").then(|| value.clone());
                }
                let localized = map.get("value").and_then(Value::as_object)?;
                let has_id = map
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or(false, |id| id.starts_with(LOCAL_TEXT_PREFIX));
                if has_id {
                    Some(value.clone())
                } else {
                    Some(self.local_text(prop, node_id, localized.clone()))
                }
            }
            _ => None,
        }
    }

    fn local_text(&self, prop: &str, node_id: &str, localized: Map<String, Value>) -> Value {
        json!({
            "id": format!("{}{}", LOCAL_TEXT_PREFIX, derive_id(&format!("{}/{}/text", node_id, prop))),
            "value": localized,
            "widgetId": LOCAL_TEXT_WIDGET_ID,
        })
    }

    fn default_value(&self, prop: &SchemaProp, node_id: &str) -> Value {
        if let Some(default) = prop.kind.default_value() {
            if let Ok(value) = self.shape(prop, default, node_id) {
                return value;
            }
        }

        match &prop.kind {
            SchemaPropKind::String { .. } => Value::String(String::new()),
            SchemaPropKind::Number { min, .. } => min.map(|m| json!(m)).unwrap_or(json!(0)),
            SchemaPropKind::Boolean { .. } => Value::Bool(false),
            SchemaPropKind::Select { options, .. } | SchemaPropKind::RadioGroup { options, .. } => {
                options
                    .first()
                    .map(|o| Value::String(o.value().to_string()))
                    .unwrap_or(Value::Null)
            }
            SchemaPropKind::Color { .. }
            | SchemaPropKind::Space { .. }
            | SchemaPropKind::Font { .. }
            | SchemaPropKind::StringToken { .. }
            | SchemaPropKind::Icon { .. }
            | SchemaPropKind::Token { .. } => prop
                .kind
                .token_table()
                .and_then(|table| default_token(&self.ctx.tokens, table))
                .map(token_reference)
                .unwrap_or_else(|| json!({ "value": null })),
            SchemaPropKind::Text { .. } => self.local_text(&prop.prop, node_id, Map::new()),
            SchemaPropKind::Position { .. } => Value::String(POSITIONS[0].to_string()),
            SchemaPropKind::External { type_name, .. } => {
                json!({ "id": null, "widgetId": type_name })
            }
            SchemaPropKind::Local { type_name, .. } => {
                json!({ "value": null, "widgetId": type_name })
            }
            SchemaPropKind::Custom { .. } => Value::Null,
            SchemaPropKind::Component { .. } | SchemaPropKind::ComponentCollection { .. } => {
                Value::Array(vec![])
            }
            SchemaPropKind::ComponentCollectionLocalised { .. } => Value::Object(Map::new()),
        }
    }
}

/// Token values are always `{ value, tokenId? }`.
fn wrap_token(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) if map.contains_key("tokenId") || map.contains_key("value") => {
            let mut out = Map::new();
            for key in ["value", "tokenId", "widgetId"] {
                if let Some(v) = map.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
            Some(Value::Object(out))
        }
        Value::Object(_) => None,
        other => Some(json!({ "value": other })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigTokenValue, ContextParams};
    use crate::definition::ComponentDefinition;
    use crate::validate::W_MISSING_COMPONENT;

    fn ctx() -> CompilationContext {
        let config = Config::new()
            .with_tokens(
                "colors",
                vec![ConfigTokenValue::new("black", json!("#000")).default_token()],
            )
            .with_component(
                ComponentDefinition::new("Stack")
                    .with_prop(SchemaProp::string("title").with_default(json!("Hello")))
                    .with_prop(SchemaProp::color("background"))
                    .with_prop(SchemaProp::select("align", &["left", "right"]))
                    .with_prop(
                        SchemaProp::collection("items", &[])
                            .with_item_fields(vec![SchemaProp::number("span").with_default(json!(1))]),
                    ),
            )
            .with_component(
                ComponentDefinition::new("Text").with_prop(SchemaProp::text("value")),
            );
        CompilationContext::new(&config, ContextParams::new("en"), "Stack").unwrap()
    }

    #[test]
    fn test_defaults_and_stripping() {
        let (entry, warnings) = normalize(
            &json!({ "_id": "a", "_component": "Stack", "junk": 1, "_extra": true }),
            &ctx(),
        );
        assert!(warnings.is_empty());
        assert_eq!(entry["title"], "Hello");
        assert_eq!(entry["background"], json!({ "value": "#000", "tokenId": "black" }));
        assert_eq!(entry["align"], "left");
        assert_eq!(entry["items"], json!([]));
        assert!(entry.get("junk").is_none());
        assert_eq!(entry["_extra"], true);
    }

    #[test]
    fn test_ids_are_deterministic() {
        let raw = json!({ "_component": "Stack", "items": [{ "_component": "Text" }] });
        let (a, _) = normalize(&raw, &ctx());
        let (b, _) = normalize(&raw, &ctx());
        assert_eq!(a["_id"], b["_id"]);
        assert_eq!(a["items"][0]["_id"], b["items"][0]["_id"]);
        assert_ne!(a["_id"], a["items"][0]["_id"]);
    }

    #[test]
    fn test_duplicate_ids_are_repaired() {
        let raw = json!({
            "_id": "a",
            "_component": "Stack",
            "items": [{ "_id": "x", "_component": "Text" }, { "_id": "x", "_component": "Text" }]
        });
        let (entry, warnings) = normalize(&raw, &ctx());
        assert_eq!(entry["items"][0]["_id"], "x");
        assert_ne!(entry["items"][1]["_id"], "x");
        assert_eq!(warnings.as_slice()[0].code, W_DUPLICATE_ID);
    }

    #[test]
    fn test_item_props_filled() {
        let raw = json!({
            "_id": "a",
            "_component": "Stack",
            "items": [{ "_id": "t", "_component": "Text", "_itemProps": { "span": 3 } }, { "_id": "u", "_component": "Text" }]
        });
        let (entry, _) = normalize(&raw, &ctx());
        assert_eq!(entry["items"][0]["_itemProps"], json!({ "span": 3 }));
        assert_eq!(entry["items"][1]["_itemProps"], json!({ "span": 1 }));
    }

    #[test]
    fn test_invalid_value_replaced_by_default() {
        let (entry, warnings) =
            normalize(&json!({ "_id": "a", "_component": "Stack", "align": "middle" }), &ctx());
        assert_eq!(entry["align"], "left");
        assert_eq!(warnings.as_slice()[0].code, W_INVALID_PROP_VALUE);
        assert_eq!(warnings.as_slice()[0].path, "align");
    }

    #[test]
    fn test_plain_string_text_becomes_local_text() {
        let (entry, _) = normalize(
            &json!({ "_id": "a", "_component": "Stack", "items": [{ "_id": "t", "_component": "Text", "value": "Hi" }] }),
            &ctx(),
        );
        let text = &entry["items"][0]["value"];
        assert_eq!(text["widgetId"], LOCAL_TEXT_WIDGET_ID);
        assert_eq!(text["value"], json!({ "en": "Hi" }));
        assert!(text["id"].as_str().unwrap().starts_with(LOCAL_TEXT_PREFIX));
    }

    #[test]
    fn test_unknown_component_is_kept_and_reported() {
        let (entry, warnings) =
            normalize(&json!({ "_id": "a", "_component": "Unknown", "x": 1 }), &ctx());
        assert_eq!(entry["x"], 1);
        assert_eq!(warnings.as_slice()[0].code, W_MISSING_COMPONENT);
    }

    #[test]
    fn test_token_values_are_wrapped() {
        let (entry, _) = normalize(
            &json!({ "_id": "a", "_component": "Stack", "background": { "$res": true, "lg": "#fff", "sm": { "tokenId": "black" } } }),
            &ctx(),
        );
        assert_eq!(
            entry["background"],
            json!({ "$res": true, "lg": { "value": "#fff" }, "sm": { "tokenId": "black" } })
        );
    }

    #[test]
    fn test_embedded_ids_are_forced() {
        let raw = json!({ "_id": "fixed", "_component": "Text" });
        let (a, _) = normalize_embedded(&raw, &ctx(), "$.content", "content");
        let (b, _) = normalize_embedded(&raw, &ctx(), "x.content", "content");
        assert_ne!(a["_id"], "fixed");
        assert_ne!(a["_id"], b["_id"]);
    }
}
