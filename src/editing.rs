//! Editing info: derived from the schema, refined by the definition's
//! `editing` function, then made absolute for the compiled node.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::compiler::CompiledComponentConfig;
use crate::definition::{
    AnyEditingField, ChildComponentEditingInfo, CompiledChildEditing, CompiledEditingInfo,
    ComponentDefinition, EditingComponentFields, EditingField, EditingInfo, EditingOutput,
    ScalarOrCollection,
};
use crate::schema::{SchemaProp, SchemaPropKind};
use crate::visitor::join_path;

/// One field per value prop and one child entry per compiled child.
/// `children` holds each component prop's child paths relative to the node.
pub fn default_editing_info(
    definition: &ComponentDefinition,
    children: &IndexMap<String, Vec<String>>,
) -> EditingInfo {
    let mut info = EditingInfo::default();

    for prop in &definition.schema {
        match &prop.kind {
            SchemaPropKind::Component { .. } => {
                info.components.insert(
                    prop.prop.clone(),
                    ScalarOrCollection::Scalar(ChildComponentEditingInfo::default()),
                );
            }
            SchemaPropKind::ComponentCollection { item_fields, .. }
            | SchemaPropKind::ComponentCollectionLocalised { item_fields, .. } => {
                let items = children
                    .get(&prop.prop)
                    .map(|paths| {
                        paths
                            .iter()
                            .map(|item_path| ChildComponentEditingInfo {
                                selectable: None,
                                direction: None,
                                fields: item_fields
                                    .iter()
                                    .filter(|f| !f.kind.is_component())
                                    .map(|f| {
                                        AnyEditingField::Field(field_for(
                                            f,
                                            &format!("{}._itemProps.{}", item_path, f.prop),
                                        ))
                                    })
                                    .collect(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                info.components
                    .insert(prop.prop.clone(), ScalarOrCollection::Collection(items));
            }
            _ => info
                .fields
                .push(AnyEditingField::Field(field_for(prop, &prop.prop))),
        }
    }

    info
}

fn field_for(prop: &SchemaProp, path: &str) -> EditingField {
    EditingField {
        path: path.to_string(),
        label: Some(prop.label.clone().unwrap_or_else(|| prop.prop.clone())),
        group: prop.group.clone(),
        visible: Some(prop.visible.unwrap_or(true) && !prop.build_only),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MERGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Applies `editing` output on top of the inherited info. Fields override by
/// path (unset attributes are kept); unknown paths are appended.
pub fn merge_editing_info(base: EditingInfo, output: EditingOutput) -> EditingInfo {
    let fields = match output.fields {
        Some(overrides) => merge_fields(base.fields, overrides),
        None => base.fields,
    };

    let mut components = base.components;
    for (prop, over) in output.components {
        let merged = match components.shift_remove(&prop) {
            Some(current) => merge_child_info(current, over),
            None => over,
        };
        components.insert(prop, merged);
    }

    EditingInfo { fields, components }
}

fn merge_fields(base: Vec<AnyEditingField>, overrides: Vec<AnyEditingField>) -> Vec<AnyEditingField> {
    let mut out = base;
    for over in overrides {
        let slot = out.iter_mut().find(|f| {
            f.path() == over.path()
                && matches!(
                    (&**f, &over),
                    (AnyEditingField::Field(_), AnyEditingField::Field(_))
                        | (AnyEditingField::Fields(_), AnyEditingField::Fields(_))
                )
        });
        match slot {
            Some(AnyEditingField::Field(current)) => {
                if let AnyEditingField::Field(over) = over {
                    *current = EditingField {
                        label: over.label.or_else(|| current.label.take()),
                        group: over.group.or_else(|| current.group.take()),
                        path: over.path,
                        visible: over.visible.or(current.visible),
                    };
                }
            }
            Some(slot) => *slot = over,
            None => out.push(over),
        }
    }
    out
}

fn merge_child(
    base: ChildComponentEditingInfo,
    over: ChildComponentEditingInfo,
) -> ChildComponentEditingInfo {
    ChildComponentEditingInfo {
        selectable: over.selectable.or(base.selectable),
        direction: over.direction.or(base.direction),
        fields: merge_fields(base.fields, over.fields),
    }
}

fn merge_child_info(
    base: ScalarOrCollection<ChildComponentEditingInfo>,
    over: ScalarOrCollection<ChildComponentEditingInfo>,
) -> ScalarOrCollection<ChildComponentEditingInfo> {
    match (base, over) {
        (ScalarOrCollection::Scalar(b), ScalarOrCollection::Scalar(o)) => {
            ScalarOrCollection::Scalar(merge_child(b, o))
        }
        (ScalarOrCollection::Collection(b), ScalarOrCollection::Collection(o)) => {
            let mut over = o.into_iter();
            ScalarOrCollection::Collection(
                b.into_iter()
                    .map(|item| match over.next() {
                        Some(o) => merge_child(item, o),
                        None => item,
                    })
                    .collect(),
            )
        }
        (_, over) => over,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites relative paths as absolute ones and expands `fields` portals
/// from the already compiled children.
pub fn compile_editing_info(
    info: &EditingInfo,
    definition: &ComponentDefinition,
    node_path: &str,
    components: &IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
) -> CompiledEditingInfo {
    let fields = compile_fields(&info.fields, node_path, components);

    let compiled_components = info
        .components
        .iter()
        .map(|(prop, child)| {
            let no_inline = definition
                .schema_prop(prop)
                .map_or(false, |p| match &p.kind {
                    SchemaPropKind::Component { no_inline, .. }
                    | SchemaPropKind::ComponentCollection { no_inline, .. }
                    | SchemaPropKind::ComponentCollectionLocalised { no_inline, .. } => *no_inline,
                    _ => false,
                });
            let compile_child = |c: &ChildComponentEditingInfo| CompiledChildEditing {
                no_inline,
                selectable: c.selectable,
                direction: c.direction,
                fields: compile_fields(&c.fields, node_path, components),
            };
            let compiled = match child {
                ScalarOrCollection::Scalar(c) => ScalarOrCollection::Scalar(compile_child(c)),
                ScalarOrCollection::Collection(items) => {
                    ScalarOrCollection::Collection(items.iter().map(compile_child).collect())
                }
            };
            (prop.clone(), compiled)
        })
        .collect();

    CompiledEditingInfo {
        fields,
        components: compiled_components,
    }
}

fn compile_fields(
    fields: &[AnyEditingField],
    node_path: &str,
    components: &IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
) -> Vec<EditingField> {
    let mut out = Vec::new();
    for field in fields {
        match field {
            AnyEditingField::Field(f) => out.push(EditingField {
                path: join_path(node_path, &f.path),
                visible: Some(f.is_visible()),
                ..f.clone()
            }),
            AnyEditingField::Fields(portal) => out.extend(expand_portal(portal, components)),
        }
    }
    out
}

/// `path` names a child as `<prop>` (first child) or `<prop>.<index>`
/// (a localised collection may put its locale in between).
fn expand_portal(
    portal: &EditingComponentFields,
    components: &IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
) -> Vec<EditingField> {
    let mut segments = portal.path.split('.');
    let Some(prop) = segments.next() else {
        return vec![];
    };
    let index = segments
        .filter_map(|s| s.parse::<usize>().ok())
        .last()
        .unwrap_or(0);

    let Some(child) = components.get(prop).and_then(|children| children.get(index)) else {
        tracing::debug!(path = %portal.path, "fields portal points at no compiled child");
        return vec![];
    };
    let Some(editing) = &child.editing else {
        return vec![];
    };

    editing
        .fields
        .iter()
        .filter(|f| match &portal.filters.group {
            Some(groups) => f.group.as_ref().map_or(false, |g| groups.contains(g)),
            None => true,
        })
        .cloned()
        .collect()
}
