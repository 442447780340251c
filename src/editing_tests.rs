//! Editing info produced by a full compile pass.

#[cfg(test)]
mod tests {
    use crate::cache::CompilationCache;
    use crate::compiler::compile;
    use crate::config::CompileOptions;
    use crate::definition::{
        AnyEditingField, ChildComponentEditingInfo, Direction, EditingComponentFields,
        EditingField, EditingOutput, FieldFilters, ScalarOrCollection,
    };
    use crate::externals::ExternalDataStore;
    use crate::schema::SchemaProp;
    use crate::test_support::*;
    use indexmap::IndexMap;
    use serde_json::{json, Value};

    fn entry() -> Value {
        json!({
            "_id": "page",
            "_component": "Page",
            "title": "Welcome",
            "hero": [{ "_id": "hero", "_component": "Banner", "headline": "Hi" }],
            "items": [{ "_id": "c1", "_component": "Card" }, { "_id": "c2", "_component": "Card" }]
        })
    }

    fn editing_page() -> crate::definition::ComponentDefinition {
        page().with_editing(|input| {
            assert_eq!(input.device.id, "lg");
            let mut components = IndexMap::new();
            components.insert(
                "items".to_string(),
                ScalarOrCollection::Collection(vec![ChildComponentEditingInfo {
                    selectable: Some(false),
                    direction: Some(Direction::Horizontal),
                    fields: vec![],
                }]),
            );
            Ok(EditingOutput {
                fields: Some(vec![
                    AnyEditingField::Field(EditingField::new("title").with_label("Heading")),
                    AnyEditingField::Fields(EditingComponentFields {
                        path: "hero".to_string(),
                        filters: FieldFilters {
                            group: Some(vec!["Content".to_string()]),
                        },
                    }),
                ]),
                components,
            })
        })
    }

    #[test]
    fn test_editing_pass_builds_absolute_fields_and_portals() {
        let ctx = context_for(&config_with(vec![editing_page()]), "en");
        let out = compile(
            &entry(),
            &ctx,
            &mut CompilationCache::new(),
            &ExternalDataStore::new(),
            CompileOptions::editing(),
        )
        .unwrap();

        let editing = out.compiled.editing.as_ref().unwrap();
        let paths: Vec<&str> = editing.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["title", "hero.0.headline"]);
        assert_eq!(editing.fields[0].label.as_deref(), Some("Heading"));

        match &editing.components["items"] {
            ScalarOrCollection::Collection(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].selectable, Some(false));
                assert_eq!(items[0].direction, Some(Direction::Horizontal));
                assert_eq!(items[0].fields[0].path, "items.0._itemProps.span");
                assert_eq!(items[1].selectable, None);
                assert_eq!(items[1].fields[0].path, "items.1._itemProps.span");
            }
            other => panic!("expected collection, got {:?}", other),
        }

        let hero = out.compiled.find("hero").unwrap().editing.as_ref().unwrap();
        let hero_paths: Vec<&str> = hero.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(hero_paths, vec!["hero.0.headline", "hero.0.image"]);
    }

    #[test]
    fn test_hidden_schema_props_are_invisible() {
        let card = card().with_prop(SchemaProp::string("internal").hidden());
        let ctx = context_for(&config_with(vec![card]), "en");
        let out = compile(
            &entry(),
            &ctx,
            &mut CompilationCache::new(),
            &ExternalDataStore::new(),
            CompileOptions::editing(),
        )
        .unwrap();

        let card = out.compiled.find("c2").unwrap().editing.as_ref().unwrap();
        let internal = card.fields.iter().find(|f| f.path == "items.1.internal").unwrap();
        assert!(!internal.is_visible());
        assert!(card.fields.iter().any(|f| f.path == "items.1.label" && f.is_visible()));
    }

    #[test]
    fn test_label_override_keeps_schema_visibility() {
        let card = card()
            .with_prop(SchemaProp::string("internal").hidden())
            .with_editing(|_| {
                Ok(EditingOutput {
                    fields: Some(vec![
                        AnyEditingField::Field(EditingField::new("internal").with_label("Internal")),
                        AnyEditingField::Field(EditingField::new("color").hidden()),
                        AnyEditingField::Field(EditingField::new("gap").with_group("Layout")),
                    ]),
                    components: IndexMap::new(),
                })
            });
        let ctx = context_for(&config_with(vec![card]), "en");
        let out = compile(
            &entry(),
            &ctx,
            &mut CompilationCache::new(),
            &ExternalDataStore::new(),
            CompileOptions::editing(),
        )
        .unwrap();

        let card = out.compiled.find("c1").unwrap().editing.as_ref().unwrap();
        let field = |path: &str| card.fields.iter().find(|f| f.path == path).unwrap();
        assert_eq!(field("items.0.internal").label.as_deref(), Some("Internal"));
        assert_eq!(field("items.0.internal").visible, Some(false));
        assert_eq!(field("items.0.color").visible, Some(false));
        assert_eq!(field("items.0.gap").visible, Some(true));
        assert_eq!(field("items.0.gap").group.as_deref(), Some("Layout"));
    }

    #[test]
    fn test_no_editing_info_outside_editing_mode() {
        let ctx = context_for(&config_with(vec![editing_page()]), "en");
        let out = compile_once(&entry(), &ctx);
        assert!(out.compiled.editing.is_none());
        assert!(out.compiled.find("hero").unwrap().editing.is_none());

        let json = serde_json::to_value(&*out.compiled).unwrap();
        assert!(json.get("__editing").is_none());
    }

    #[test]
    fn test_failing_editing_keeps_defaults() {
        let page = page().with_editing(|_| anyhow::bail!("no sidebar"));
        let ctx = context_for(&config_with(vec![page]), "en");
        let out = compile(
            &entry(),
            &ctx,
            &mut CompilationCache::new(),
            &ExternalDataStore::new(),
            CompileOptions::editing(),
        )
        .unwrap();

        let editing = out.compiled.editing.as_ref().unwrap();
        assert_eq!(editing.fields[0].path, "title");
        assert_eq!(editing.fields[0].label.as_deref(), Some("title"));
        assert!(codes(&out.warnings).contains(&"NC005"));
    }
}
