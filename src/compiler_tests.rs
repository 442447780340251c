//! Compile pass scenarios: responsive cascade, tokens, styles fitting,
//! external values, sentinels and determinism.

#[cfg(test)]
mod tests {
    use crate::cache::CompilationCache;
    use crate::compiler::{compile, MISSING_COMPONENT_ID};
    use crate::config::CompileOptions;
    use crate::definition::StylesOutput;
    use crate::error::CompileError;
    use crate::externals::{ExternalDataStore, FetchResourceResult, LOCAL_TEXT_WIDGET_ID};
    use crate::test_support::*;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn page_with_cards(count: usize) -> Value {
        let items: Vec<Value> = (0..count)
            .map(|i| {
                let mut item = json!({ "_component": "Card", "label": format!("card {}", i) });
                if i == 0 {
                    item["_itemProps"] = json!({ "span": 2 });
                }
                item
            })
            .collect();
        json!({ "_id": "page", "_component": "Page", "items": items })
    }

    #[test]
    fn test_cascade_fills_smaller_devices_and_squashes() {
        let ctx = context();
        let out = compile_once(&json!({ "_component": "Page", "title": { "$res": true, "lg": "red" } }), &ctx);
        assert_eq!(out.compiled.props["title"], json!("red"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_value_missing_on_larger_device_stays_responsive() {
        let ctx = context();
        let out = compile_once(&json!({ "_component": "Page", "title": { "$res": true, "sm": "blue" } }), &ctx);
        assert_eq!(out.compiled.props["title"], json!({ "$res": true, "sm": "blue" }));

        assert_eq!(codes(&out.warnings), vec!["NC003"]);
        assert_eq!(out.warnings[0].path, "title");
        assert!(out.warnings[0].message.contains("'lg'"));
    }

    #[test]
    fn test_token_missing_on_larger_device_is_reported() {
        let ctx = context();
        let entry = json!({
            "_component": "Stack",
            "children": [{ "_id": "a", "_component": "Card", "color": { "$res": true, "sm": { "tokenId": "brand" } } }]
        });
        let out = compile_once(&entry, &ctx);

        assert_eq!(out.compiled.find("a").unwrap().props["color"], json!({ "$res": true, "sm": "#f00" }));
        let unresolved: Vec<_> = out.warnings.iter().filter(|w| w.code == "NC003").collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].entry_id.as_deref(), Some("a"));
        assert!(unresolved[0].message.contains("'lg'"));
    }

    #[test]
    fn test_tokens_resolve_per_device() {
        let ctx = context();
        let entry = json!({
            "_component": "Stack",
            "children": [
                { "_id": "a", "_component": "Card", "color": { "tokenId": "ink" }, "gap": { "tokenId": "s" } },
                { "_id": "b", "_component": "Card", "gap": 12 }
            ]
        });
        let out = compile_once(&entry, &ctx);

        let a = out.compiled.find("a").unwrap();
        assert_eq!(a.props["color"], json!({ "$res": true, "lg": "#000", "sm": "#111" }));
        assert_eq!(a.props["gap"], json!("8px"));

        let b = out.compiled.find("b").unwrap();
        assert_eq!(b.props["color"], json!("#f00"));
        assert_eq!(b.props["gap"], json!("12px"));
    }

    #[test]
    fn test_unknown_token_uses_inline_value() {
        let ctx = context();
        let entry = json!({
            "_component": "Stack",
            "children": [{ "_id": "a", "_component": "Card", "color": { "tokenId": "nope", "value": "#abc" } }]
        });
        let out = compile_once(&entry, &ctx);
        assert_eq!(out.compiled.find("a").unwrap().props["color"], json!("#abc"));
        let unknown: Vec<_> = out.warnings.iter().filter(|w| w.code == "NC002").collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].entry_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_local_text_follows_locale_fallback() {
        let config = config_with(vec![]);
        let entry = json!({
            "_component": "Page",
            "hero": [{
                "_id": "hero",
                "_component": "Banner",
                "headline": { "widgetId": LOCAL_TEXT_WIDGET_ID, "value": { "en": "Hello" } }
            }]
        });
        let out = compile_once(&entry, &context_for(&config, "de"));
        assert_eq!(out.compiled.find("hero").unwrap().props["headline"], json!("Hello"));
    }

    #[test]
    fn test_item_props_are_padded_to_collection_length() {
        let page = page().with_styles(|input| {
            let items = input.values["items"].as_array().cloned().unwrap_or_default();
            let styled = items
                .iter()
                .take(2)
                .map(|item| obj(json!({ "width": item["span"] })))
                .collect();
            Ok(StylesOutput::new().with_item_props("items", styled))
        });
        let ctx = context_for(&config_with(vec![page]), "en");
        let out = compile_once(&page_with_cards(3), &ctx);

        assert_eq!(out.compiled.components["items"].len(), 3);
        assert_eq!(out.compiled.styled["items"], json!([{ "width": 2 }, { "width": 1 }, {}]));
        assert_eq!(codes(&out.warnings), vec!["NC004"]);
    }

    #[test]
    fn test_item_props_on_single_component_are_rejected() {
        let page = page().with_styles(|_| {
            Ok(StylesOutput::new().with_item_props("hero", vec![obj(json!({ "x": 1 }))]))
        });
        let ctx = context_for(&config_with(vec![page]), "en");
        let out = compile_once(&json!({ "_component": "Page" }), &ctx);
        assert!(out.compiled.styled.get("hero").is_none());
        assert!(codes(&out.warnings).contains(&"NC004"));
    }

    #[test]
    fn test_styles_props_and_component_params() {
        let page = page().with_styles(|input| {
            Ok(StylesOutput::new()
                .with_prop("wide", json!(input.device.w > 1000))
                .with_styled("root", obj(json!({ "display": "grid" })))
                .with_component_param("hero", "size", json!("large")))
        });
        let ctx = context_for(&config_with(vec![page]), "en");
        let out = compile_once(&json!({ "_component": "Page" }), &ctx);

        assert_eq!(out.compiled.props["wide"], json!({ "$res": true, "lg": true, "sm": false }));
        assert_eq!(out.compiled.styled["root"], json!({ "display": "grid" }));
        assert_eq!(out.compiled.component_params["hero"]["size"], json!("large"));
    }

    #[test]
    fn test_auto_sees_full_maps_and_patches_values() {
        let page = page().with_auto(|input| {
            let sm = input.values["title"]["sm"].as_str().unwrap_or("missing").to_string();
            Ok(obj(json!({ "title": format!("{}!", sm), "hero": [] })))
        });
        let ctx = context_for(&config_with(vec![page]), "en");
        let out = compile_once(&json!({ "_component": "Page", "title": { "$res": true, "lg": "red" } }), &ctx);

        assert_eq!(out.compiled.props["title"], json!("red!"));
        assert_eq!(out.config_after_auto["title"], json!("red!"));
        assert!(codes(&out.warnings).contains(&"NC008"));
    }

    #[test]
    fn test_failing_styles_is_reported_once() {
        let card = card().with_styles(|_| anyhow::bail!("boom"));
        let ctx = context_for(&config_with(vec![card]), "en");
        let out = compile_once(&page_with_cards(1), &ctx);

        let child = &out.compiled.components["items"][0];
        assert_eq!(child.props["label"], json!("card 0"));
        assert_eq!(codes(&out.warnings), vec!["NC005"]);
    }

    #[test]
    fn test_rejected_child_is_compiled_and_reported() {
        let ctx = context();
        let entry = json!({ "_component": "Page", "items": [{ "_id": "b", "_component": "Banner" }] });
        let out = compile_once(&entry, &ctx);
        assert_eq!(out.compiled.components["items"][0].component, "Banner");
        assert_eq!(codes(&out.warnings), vec!["NC009"]);
    }

    #[test]
    fn test_unknown_component_becomes_sentinel() {
        let ctx = context();
        let entry = json!({
            "_component": "Stack",
            "children": [{ "_id": "ghost", "_component": "Ghost" }, { "_id": "c", "_component": "Card" }]
        });
        let out = compile_once(&entry, &ctx);

        let ghost = &out.compiled.components["children"][0];
        assert_eq!(ghost.component, MISSING_COMPONENT_ID);
        assert!(ghost.disabled);
        assert_eq!(ghost.props["originalComponent"], json!("Ghost"));
        assert_eq!(out.compiled.components["children"][1].component, "Card");
        assert!(codes(&out.warnings).contains(&"NC001"));
        assert!(!out.meta.contains(MISSING_COMPONENT_ID));
    }

    #[test]
    fn test_external_values_follow_the_store() {
        let ctx = context();
        let entry = json!({
            "_component": "Page",
            "hero": [{ "_id": "hero", "_component": "Banner", "image": { "id": "img-1", "widgetId": "media" } }]
        });

        let pending = compile_once(&entry, &ctx);
        assert_eq!(pending.requested["hero.image"].id, json!("img-1"));
        assert_eq!(pending.requested["hero.image"].widget_id, "media");

        let mut store = ExternalDataStore::new();
        store.insert(
            "hero.image",
            Some("img-1".into()),
            FetchResourceResult::resolved("image", json!({ "url": "/a.png" })),
        );
        let out = compile(&entry, &ctx, &mut CompilationCache::new(), &store, CompileOptions::default()).unwrap();
        let image = &out.compiled.find("hero").unwrap().props["image"];
        assert_eq!(image["value"], json!({ "url": "/a.png" }));
        assert_eq!(image["type"], json!("image"));
        assert!(out.requested.is_empty());
    }

    #[test]
    fn test_rejected_external_is_final() {
        let ctx = context();
        let entry = json!({
            "_component": "Page",
            "hero": [{ "_id": "hero", "_component": "Banner", "image": { "id": "img-1", "widgetId": "media" } }]
        });
        let mut store = ExternalDataStore::new();
        store.insert("hero.image", Some("img-1".into()), FetchResourceResult::rejected("not found"));

        let out = compile(&entry, &ctx, &mut CompilationCache::new(), &store, CompileOptions::default()).unwrap();
        assert_eq!(out.compiled.find("hero").unwrap().props["image"]["error"], json!("not found"));
        assert!(out.requested.is_empty());
        let failed: Vec<_> = out.warnings.iter().filter(|w| w.code == "NC006").collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].entry_id.as_deref(), Some("hero"));
    }

    #[test]
    fn test_changed_reference_is_requested_again() {
        let ctx = context();
        let entry = json!({
            "_component": "Page",
            "hero": [{ "_id": "hero", "_component": "Banner", "image": { "id": "img-2", "widgetId": "media" } }]
        });
        let mut store = ExternalDataStore::new();
        store.insert("hero.image", Some("img-1".into()), FetchResourceResult::resolved("image", json!("old")));

        let out = compile(&entry, &ctx, &mut CompilationCache::new(), &store, CompileOptions::default()).unwrap();
        assert_eq!(out.requested["hero.image"].id, json!("img-2"));
        assert!(out.compiled.find("hero").unwrap().props["image"].get("value").is_none());
    }

    #[test]
    fn test_metadata_lists_used_definitions() {
        let ctx = context();
        let out = compile_once(&page_with_cards(2), &ctx);
        assert!(out.meta.contains("Page"));
        assert!(out.meta.contains("Card"));
        assert!(!out.meta.contains("Frame"));
        assert_eq!(out.meta.vars.locale, "en");
        assert_eq!(out.meta.vars.devices.len(), 2);
    }

    #[test]
    fn test_repeated_pass_reuses_compiled_tree() {
        let ctx = context();
        let entry = page_with_cards(2);
        let store = ExternalDataStore::new();
        let mut cache = CompilationCache::new();

        let first = compile(&entry, &ctx, &mut cache, &store, CompileOptions::default()).unwrap();
        let second = compile(&entry, &ctx, &mut cache, &store, CompileOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&first.compiled, &second.compiled));
        assert_eq!(first.warnings, second.warnings);

        let fresh = compile_once(&entry, &ctx);
        assert_eq!(*fresh.compiled, *first.compiled);
        assert_eq!(fresh.config_after_auto, first.config_after_auto);
    }

    #[test]
    fn test_null_input_compiles_root_component() {
        let ctx = context();
        let out = compile_once(&Value::Null, &ctx);
        assert_eq!(out.compiled.component, "Page");
        assert!(!out.compiled.disabled);
    }

    #[test]
    fn test_invalid_input_is_an_error() {
        let ctx = context();
        let err = compile(
            &json!(42),
            &ctx,
            &mut CompilationCache::new(),
            &ExternalDataStore::new(),
            CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidInput { .. }));
    }

    #[test]
    fn test_document_input_compiles_its_entry() {
        let ctx = context();
        let out = compile_once(
            &json!({ "id": "doc-1", "version": 3, "entry": { "_id": "root", "_component": "Stack" } }),
            &ctx,
        );
        assert_eq!(out.compiled.id, "root");
        assert_eq!(out.compiled.component, "Stack");
    }
}
