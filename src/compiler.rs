//! One compile pass: a normalized entry tree in, a compiled tree out.
//!
//! Children are compiled before their parent runs any definition function.
//! Every node is either served whole from the [`CompilationCache`] or goes
//! through `auto`, then `styles` once per device, then (in editing mode)
//! `editing`. Nothing here fails after input validation: problems are
//! recorded as warnings next to the compiled tree.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::cache::{CacheKey, CachedNode, CompilationCache};
use crate::config::{CompileOptions, DeviceRange, Devices};
use crate::definition::{
    AutoInput, CompiledEditingInfo, ComponentDefinition, EditingInput, StyledOutput, StylesInput,
};
use crate::editing::{compile_editing_info, default_editing_info, merge_editing_info};
use crate::error::{CompileError, Result};
use crate::externals::{
    collect, embedded_entry, prop_references, reference_for_device, request_id,
    requested_external_data, ExternalDataStore, ExternalReference, ExternalResolution,
    ExternalWithSchemaProp, RequestedExternalData, EXTERNAL_ENTRY_TYPE,
};
use crate::invoke::{fit_collection, invoke_auto, invoke_editing, invoke_styles, InvokeSite};
use crate::meta::CompilationMetadata;
use crate::normalize::{derive_id, normalize};
use crate::registry::CompilationContext;
use crate::responsive::{is_trulyresponsive, resolve_value, ResponsiveValue, RESPONSIVE_MARKER};
use crate::schema::{SchemaProp, SchemaPropKind};
use crate::tokens::{format_space, resolve_token};
use crate::validate::{
    json_type_name, validate, CompilerWarning, ValidatedInput, Warnings,
    W_COMPONENT_NOT_ACCEPTED, W_EXTERNAL_FETCH_FAILED, W_INVALID_PROP_VALUE, W_MALFORMED_ENTRY,
    W_MISSING_COMPONENT, W_STYLES_COLLECTION_LENGTH, W_UNKNOWN_TOKEN, W_UNRESOLVED_CASCADE,
};
use crate::visitor::{child_entries, join_path, localised_items};

/// `_component` of the node standing in for an entry that cannot be compiled.
pub const MISSING_COMPONENT_ID: &str = "$MissingComponent";

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// A render-ready node. Produced once and never mutated; unchanged subtrees
/// are shared between passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledComponentConfig {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_component")]
    pub component: String,
    pub disabled: bool,
    pub props: Map<String, Value>,
    pub components: IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
    #[serde(rename = "componentParams", default, skip_serializing_if = "IndexMap::is_empty")]
    pub component_params: IndexMap<String, Map<String, Value>>,
    pub styled: IndexMap<String, Value>,
    #[serde(rename = "__editing", default, skip_serializing_if = "Option::is_none")]
    pub editing: Option<CompiledEditingInfo>,
}

impl CompiledComponentConfig {
    /// Sentinel for an entry whose component is unknown or malformed.
    pub fn missing(id: &str, original_component: &str, message: &str) -> Self {
        let mut props = Map::new();
        props.insert("error".into(), Value::String(message.to_string()));
        props.insert(
            "originalComponent".into(),
            Value::String(original_component.to_string()),
        );
        Self {
            id: id.to_string(),
            component: MISSING_COMPONENT_ID.to_string(),
            disabled: true,
            props,
            components: IndexMap::new(),
            component_params: IndexMap::new(),
            styled: IndexMap::new(),
            editing: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.component == MISSING_COMPONENT_ID
    }

    /// Depth-first lookup by `_id`, starting with this node.
    pub fn find(&self, id: &str) -> Option<&CompiledComponentConfig> {
        if self.id == id {
            return Some(self);
        }
        self.components
            .values()
            .flatten()
            .find_map(|child| child.find(id))
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub compiled: Arc<CompiledComponentConfig>,
    /// The normalized entry with every `auto` patch applied.
    pub config_after_auto: Value,
    pub meta: CompilationMetadata,
    pub warnings: Vec<CompilerWarning>,
    /// Every reference in the tree, including embedded entries known so far.
    pub externals: Vec<ExternalWithSchemaProp>,
    /// References still missing from (or stale in) the store.
    pub requested: RequestedExternalData,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs one synchronous compile pass.
///
/// Accepts a document, a bare entry, or `null` (compiled as an empty root
/// component). Only invalid input is an error.
pub fn compile(
    input: &Value,
    ctx: &CompilationContext,
    cache: &mut CompilationCache,
    store: &ExternalDataStore,
    options: CompileOptions,
) -> Result<CompileOutput> {
    let entry = validated_entry(input, ctx)?;
    cache.ensure_mode(options.is_editing, &ctx.device_version);

    let (normalized, normalize_warnings) = normalize(&entry, ctx);

    let mut pass = Pass {
        ctx,
        cache,
        store,
        key: CacheKey::new(ctx, options.is_editing),
        is_editing: options.is_editing,
    };
    let root = pass.compile_entry(&normalized, "");

    let mut warnings = normalize_warnings;
    warnings.extend(root.warnings);

    let mut meta = CompilationMetadata::new(ctx);
    for id in &root.definitions {
        if let Some(definition) = ctx.definition(id) {
            meta.record(definition);
        }
    }

    let externals = collect(&normalized, ctx, Some(store));
    let requested = requested_external_data(&externals, store);

    tracing::debug!(
        root = %root.compiled.id,
        locale = ctx.locale(),
        warnings = warnings.len(),
        requested = requested.len(),
        "compile pass finished"
    );

    Ok(CompileOutput {
        compiled: root.compiled,
        config_after_auto: root.config_after_auto,
        meta,
        warnings: warnings.into_vec(),
        externals,
        requested,
    })
}

pub(crate) fn validated_entry(input: &Value, ctx: &CompilationContext) -> Result<Value> {
    let result = validate(input);
    if !result.is_valid {
        return Err(CompileError::invalid_input(
            result.reason.unwrap_or_else(|| "input rejected".to_string()),
        ));
    }
    Ok(match result.input {
        Some(ValidatedInput::Document(document)) => document.entry,
        Some(ValidatedInput::Entry(entry)) => entry,
        Some(ValidatedInput::Empty) | None => json!({ "_component": ctx.root_component_id }),
    })
}

fn warn_unresolved(acc: &mut Subtree, prop: &str, owner_id: &str, prop_path: &str, device: &DeviceRange) {
    acc.warn(
        W_UNRESOLVED_CASCADE,
        format!(
            "'{}' has no value for device '{}' or any larger one",
            prop, device.id
        ),
        owner_id,
        prop_path,
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS
// ═══════════════════════════════════════════════════════════════════════════════

/// What a subtree accumulated while compiling.
struct Subtree {
    slice: IndexMap<String, Option<u64>>,
    definitions: Vec<String>,
    warnings: Warnings,
}

impl Subtree {
    fn new(definition_id: &str) -> Self {
        Self {
            slice: IndexMap::new(),
            definitions: vec![definition_id.to_string()],
            warnings: Warnings::new(),
        }
    }

    fn read(&mut self, store: &ExternalDataStore, request_id: &str) {
        self.slice
            .insert(request_id.to_string(), store.version(request_id));
    }

    fn absorb(&mut self, node: CachedNode) -> (Arc<CompiledComponentConfig>, Value) {
        self.slice.extend(node.slice);
        for id in node.definitions {
            if !self.definitions.contains(&id) {
                self.definitions.push(id);
            }
        }
        self.warnings.extend(node.warnings);
        (node.compiled, node.config_after_auto)
    }

    fn warn(&mut self, code: &str, message: String, entry_id: &str, path: &str) {
        self.warnings
            .push(CompilerWarning::new(code, message, Some(entry_id), path));
    }
}

struct Pass<'a> {
    ctx: &'a CompilationContext,
    cache: &'a mut CompilationCache,
    store: &'a ExternalDataStore,
    key: CacheKey,
    is_editing: bool,
}

impl Pass<'_> {
    fn compile_entry(&mut self, entry: &Value, path: &str) -> CachedNode {
        let Some(map) = entry.as_object() else {
            let message = format!("expected an entry object, got {}", json_type_name(entry));
            return self.sentinel(entry, &derive_id(path), None, path, W_MALFORMED_ENTRY, message);
        };
        let id = map
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| derive_id(path));
        let Some(component) = map.get("_component").and_then(Value::as_str).filter(|c| !c.is_empty())
        else {
            let message = "entry has no '_component'".to_string();
            return self.sentinel(entry, &id, Some(&id), path, W_MALFORMED_ENTRY, message);
        };
        let Some(definition) = self.ctx.definition(component).cloned() else {
            let message = format!("component '{}' is not registered", component);
            return self.sentinel(entry, &id, Some(&id), path, W_MISSING_COMPONENT, message);
        };

        if let Some(hit) = self.cache.get(&id, &self.key, path, self.store) {
            return hit.clone();
        }

        let node = self.compile_node(map, &id, &definition, path);
        self.cache.set(&id, self.key.clone(), node.clone());
        node
    }

    fn sentinel(
        &self,
        entry: &Value,
        id: &str,
        warning_entry: Option<&str>,
        path: &str,
        code: &str,
        message: String,
    ) -> CachedNode {
        let original = entry
            .get("_component")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut compiled = CompiledComponentConfig::missing(id, original, &message);
        if self.is_editing {
            compiled.editing = Some(CompiledEditingInfo::default());
        }
        CachedNode {
            compiled: Arc::new(compiled),
            config_after_auto: entry.clone(),
            slice: IndexMap::new(),
            definitions: vec![],
            warnings: vec![CompilerWarning::new(code, message, warning_entry, path)],
            path: path.to_string(),
        }
    }

    fn compile_node(
        &mut self,
        map: &Map<String, Value>,
        id: &str,
        definition: &ComponentDefinition,
        path: &str,
    ) -> CachedNode {
        let ctx = self.ctx;
        let devices = &ctx.devices;
        let site = InvokeSite { entry_id: id, path };
        let mut acc = Subtree::new(&definition.id);

        // Children first.
        let mut components: IndexMap<String, Vec<Arc<CompiledComponentConfig>>> = IndexMap::new();
        let mut child_paths: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut children_after_auto = Map::new();
        for prop in definition.schema.iter().filter(|p| p.kind.is_component()) {
            let value = map.get(&prop.prop).unwrap_or(&Value::Null);
            let mut compiled = Vec::new();
            let mut after_auto = Vec::new();
            let mut relative_paths = Vec::new();
            for (relative, child) in child_entries(prop, value, "", &ctx.locale_chain) {
                let child_path = join_path(path, &relative);
                self.check_accepts(prop, child, id, &child_path, &mut acc);
                let node = self.compile_entry(child, &child_path);
                let (child_compiled, child_after_auto) = acc.absorb(node);
                compiled.push(child_compiled);
                after_auto.push(child_after_auto);
                relative_paths.push(relative);
            }
            children_after_auto.insert(prop.prop.clone(), rebuild_children(prop, value, after_auto, &ctx.locale_chain));
            components.insert(prop.prop.clone(), compiled);
            child_paths.insert(prop.prop.clone(), relative_paths);
        }

        // Entries delivered as external data compile as the prop's children.
        for prop in &definition.schema {
            if !matches!(prop.kind, SchemaPropKind::External { .. }) {
                continue;
            }
            let Some(value) = map.get(&prop.prop) else {
                continue;
            };
            let prop_path = join_path(path, &prop.prop);
            let mut embedded = Vec::new();
            for (device, reference) in prop_references(value, devices) {
                let request = request_id(id, path.is_empty(), &prop.prop, device.as_deref());
                acc.read(self.store, &request);
                let child_path = join_path(&prop_path, &embedded.len().to_string());
                if let Some(child) = embedded_entry(ctx, self.store, &request, &reference, &child_path) {
                    let node = self.compile_entry(&child, &child_path);
                    embedded.push(acc.absorb(node).0);
                }
            }
            if !embedded.is_empty() {
                components.insert(prop.prop.clone(), embedded);
            }
        }

        // auto sees every device at once.
        let auto_input = AutoInput {
            values: full_values(definition, map, devices),
            params: auto_params(devices),
            devices: devices.clone(),
        };
        let patch = invoke_auto(definition, &auto_input, site, &mut acc.warnings);
        let mut working = map.clone();
        for (key, value) in patch {
            match definition.schema_prop(&key) {
                Some(prop) if !prop.kind.is_component() => {
                    working.insert(key, value);
                }
                _ => acc.warn(
                    W_INVALID_PROP_VALUE,
                    format!("auto patched '{}' which is not a value prop of '{}'; ignored", key, definition.id),
                    id,
                    path,
                ),
            }
        }
        let mut config_after_auto = working.clone();
        config_after_auto.extend(children_after_auto);

        // styles, once per device.
        let mut props_by_device: IndexMap<String, IndexMap<String, Value>> = IndexMap::new();
        let mut styled_by_device: IndexMap<String, IndexMap<String, Value>> = IndexMap::new();
        let mut params_by_device: IndexMap<String, IndexMap<String, IndexMap<String, Value>>> =
            IndexMap::new();
        let mut main_values = Map::new();

        for device in devices.iter() {
            let values = self.device_values(definition, &working, id, path, device, &components, &mut acc);
            let input = StylesInput {
                values: values.clone(),
                params: device_params(device),
                device: device.clone(),
                is_editing: self.is_editing,
            };
            let output = invoke_styles(definition, &input, site, &mut acc.warnings);

            for (key, value) in &values {
                let is_component = definition
                    .schema_prop(key)
                    .map_or(false, |p| p.kind.is_component());
                if !is_component {
                    props_by_device
                        .entry(key.clone())
                        .or_default()
                        .insert(device.id.clone(), value.clone());
                }
            }
            for (key, value) in output.props {
                props_by_device
                    .entry(key)
                    .or_default()
                    .insert(device.id.clone(), value);
            }

            for (name, styled) in output.styled {
                let value = match styled {
                    StyledOutput::Single(style) => Value::Object(style),
                    StyledOutput::Collection(items) => match collection_len(definition, &components, &name) {
                        Some(len) => collection_value(fit_collection(items, len, &name, site, &mut acc.warnings)),
                        None => collection_value(items),
                    },
                };
                styled_by_device
                    .entry(name)
                    .or_default()
                    .insert(device.id.clone(), value);
            }

            for (prop, output) in output.components {
                if let Some(items) = output.item_props {
                    match collection_len(definition, &components, &prop) {
                        Some(len) => {
                            let items = fit_collection(items, len, &prop, site, &mut acc.warnings);
                            styled_by_device
                                .entry(prop.clone())
                                .or_default()
                                .insert(device.id.clone(), collection_value(items));
                        }
                        None => acc.warn(
                            W_STYLES_COLLECTION_LENGTH,
                            format!("styles returned itemProps for '{}' which is not a collection", prop),
                            id,
                            path,
                        ),
                    }
                }
                for (key, value) in output.params {
                    params_by_device
                        .entry(prop.clone())
                        .or_default()
                        .entry(key)
                        .or_default()
                        .insert(device.id.clone(), value);
                }
            }

            if devices.main().map_or(false, |main| main.id == device.id) {
                main_values = values;
            }
        }

        let squash = |per_device: IndexMap<String, Value>| -> Value {
            Value::from(ResponsiveValue::squash(per_device, devices))
        };
        let props: Map<String, Value> = props_by_device
            .into_iter()
            .map(|(key, per_device)| (key, squash(per_device)))
            .collect();
        let styled: IndexMap<String, Value> = styled_by_device
            .into_iter()
            .map(|(key, per_device)| (key, squash(per_device)))
            .collect();
        let component_params: IndexMap<String, Map<String, Value>> = params_by_device
            .into_iter()
            .map(|(prop, params)| {
                let params = params
                    .into_iter()
                    .map(|(key, per_device)| (key, squash(per_device)))
                    .collect();
                (prop, params)
            })
            .collect();

        let main = devices.main().filter(|_| self.is_editing);
        let editing = if let Some(main) = main {
            let info = default_editing_info(definition, &child_paths);
            let input = EditingInput {
                values: main_values,
                params: device_params(main),
                editing_info: info.clone(),
                device: main.clone(),
            };
            let info = match invoke_editing(definition, &input, site, &mut acc.warnings) {
                Some(output) => merge_editing_info(info, output),
                None => info,
            };
            Some(compile_editing_info(&info, definition, path, &components))
        } else {
            None
        };

        let compiled = CompiledComponentConfig {
            id: id.to_string(),
            component: definition.id.clone(),
            disabled: false,
            props,
            components,
            component_params,
            styled,
            editing,
        };

        CachedNode {
            compiled: Arc::new(compiled),
            config_after_auto: Value::Object(config_after_auto),
            slice: acc.slice,
            definitions: acc.definitions,
            warnings: acc.warnings.into_vec(),
            path: path.to_string(),
        }
    }

    fn check_accepts(
        &self,
        prop: &SchemaProp,
        child: &Value,
        parent_id: &str,
        child_path: &str,
        acc: &mut Subtree,
    ) {
        let Some(definition) = child
            .get("_component")
            .and_then(Value::as_str)
            .and_then(|c| self.ctx.definition(c))
        else {
            return;
        };
        if !definition.is_accepted_by(prop.kind.accepts()) {
            acc.warn(
                W_COMPONENT_NOT_ACCEPTED,
                format!("'{}' is not accepted by prop '{}'", definition.id, prop.prop),
                parent_id,
                child_path,
            );
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Per-device values
    // ───────────────────────────────────────────────────────────────────────────

    /// Values handed to `styles` for one device. Component props carry one
    /// map of resolved item props per child.
    #[allow(clippy::too_many_arguments)]
    fn device_values(
        &self,
        definition: &ComponentDefinition,
        working: &Map<String, Value>,
        id: &str,
        path: &str,
        device: &DeviceRange,
        components: &IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
        acc: &mut Subtree,
    ) -> Map<String, Value> {
        let mut values = Map::new();
        for prop in &definition.schema {
            let raw = working.get(&prop.prop).unwrap_or(&Value::Null);
            match &prop.kind {
                SchemaPropKind::Component { .. } => {
                    let count = components.get(&prop.prop).map_or(0, Vec::len);
                    values.insert(
                        prop.prop.clone(),
                        Value::Array(vec![Value::Object(Map::new()); count]),
                    );
                }
                SchemaPropKind::ComponentCollection { item_fields, .. }
                | SchemaPropKind::ComponentCollectionLocalised { item_fields, .. } => {
                    let items = child_entries(prop, raw, path, &self.ctx.locale_chain)
                        .into_iter()
                        .map(|(item_path, item)| {
                            Value::Object(self.item_values(item_fields, item, &item_path, device, acc))
                        })
                        .collect();
                    values.insert(prop.prop.clone(), Value::Array(items));
                }
                _ => {
                    let owner = Owner { id, is_root: path.is_empty(), path };
                    if let Some(value) = self.resolve_prop(prop, raw, owner, device, acc) {
                        values.insert(prop.prop.clone(), value);
                    }
                }
            }
        }
        values
    }

    fn item_values(
        &self,
        item_fields: &[SchemaProp],
        item: &Value,
        item_path: &str,
        device: &DeviceRange,
        acc: &mut Subtree,
    ) -> Map<String, Value> {
        let item_id = item.get("_id").and_then(Value::as_str).unwrap_or_default();
        let props = item.get("_itemProps").and_then(Value::as_object);
        let props_path = join_path(item_path, "_itemProps");
        let owner = Owner {
            id: item_id,
            is_root: false,
            path: &props_path,
        };
        item_fields
            .iter()
            .filter(|f| !f.kind.is_component())
            .filter_map(|field| {
                let raw = props.and_then(|p| p.get(&field.prop)).unwrap_or(&Value::Null);
                self.resolve_prop(field, raw, owner, device, acc)
                    .map(|v| (field.prop.clone(), v))
            })
            .collect()
    }

    /// `None` means the prop has no value on this device.
    fn resolve_prop(
        &self,
        prop: &SchemaProp,
        raw: &Value,
        owner: Owner<'_>,
        device: &DeviceRange,
        acc: &mut Subtree,
    ) -> Option<Value> {
        let devices = &self.ctx.devices;
        let prop_path = join_path(owner.path, &prop.prop);

        match &prop.kind {
            SchemaPropKind::Color { .. }
            | SchemaPropKind::Space { .. }
            | SchemaPropKind::Font { .. }
            | SchemaPropKind::StringToken { .. }
            | SchemaPropKind::Icon { .. }
            | SchemaPropKind::Token { .. } => {
                let table = prop.kind.token_table().unwrap_or_default();
                let is_space = matches!(prop.kind, SchemaPropKind::Space { .. });
                match resolve_token(raw, &self.ctx.tokens, table, devices, &device.id, &prop_path) {
                    Ok(Some(value)) => {
                        if let Some(reference) = ExternalReference::from_value(&value) {
                            let source = token_source_device(raw, devices, &device.id);
                            let request = request_id(owner.id, owner.is_root, &prop.prop, source.as_deref());
                            return Some(self.external_value(&request, &reference, owner.id, &prop_path, acc));
                        }
                        Some(if is_space { format_space(value) } else { value })
                    }
                    Ok(None) => {
                        if is_trulyresponsive(raw) || raw.get("tokenId").is_some() {
                            warn_unresolved(acc, &prop.prop, owner.id, &prop_path, device);
                        }
                        None
                    }
                    Err(e) => {
                        acc.warn(
                            W_UNKNOWN_TOKEN,
                            format!("unknown token '{}' in table '{}'", e.token_id, table),
                            owner.id,
                            &e.path,
                        );
                        let inline = resolve_value(raw, devices, &device.id)
                            .and_then(|entry| entry.get("value").cloned())
                            .unwrap_or(Value::Null);
                        Some(if is_space { format_space(inline) } else { inline })
                    }
                }
            }
            SchemaPropKind::Text { .. } => match ExternalReference::from_value(raw) {
                Some(reference) => {
                    let request = request_id(owner.id, owner.is_root, &prop.prop, None);
                    Some(self.external_value(&request, &reference, owner.id, &prop_path, acc))
                }
                None => Some(Value::String(self.local_text(raw))),
            },
            SchemaPropKind::External { .. } => match reference_for_device(raw, devices, &device.id) {
                Some((source, reference)) => {
                    let request = request_id(owner.id, owner.is_root, &prop.prop, source.as_deref());
                    Some(self.external_value(&request, &reference, owner.id, &prop_path, acc))
                }
                None => self.cascade(raw, prop, owner, &prop_path, device, acc),
            },
            SchemaPropKind::Local { .. } => self
                .cascade(raw, prop, owner, &prop_path, device, acc)
                .and_then(|local| local.get("value").cloned()),
            SchemaPropKind::Component { .. }
            | SchemaPropKind::ComponentCollection { .. }
            | SchemaPropKind::ComponentCollectionLocalised { .. } => None,
            _ => self.cascade(raw, prop, owner, &prop_path, device, acc),
        }
    }

    /// The device's value of a plain prop. A responsive value that has
    /// nothing for this device or any larger one is absent, with NC003.
    fn cascade(
        &self,
        raw: &Value,
        prop: &SchemaProp,
        owner: Owner<'_>,
        prop_path: &str,
        device: &DeviceRange,
        acc: &mut Subtree,
    ) -> Option<Value> {
        let value = resolve_value(raw, &self.ctx.devices, &device.id).filter(|v| !v.is_null());
        if value.is_none() && is_trulyresponsive(raw) {
            warn_unresolved(acc, &prop.prop, owner.id, prop_path, device);
        }
        value
    }

    /// The reference with whatever the store knows about it.
    fn external_value(
        &self,
        request: &str,
        reference: &ExternalReference,
        owner_id: &str,
        prop_path: &str,
        acc: &mut Subtree,
    ) -> Value {
        acc.read(self.store, request);
        let mut map = match reference.to_value() {
            Value::Object(map) => map,
            other => return other,
        };
        match self.store.resolve(request, reference) {
            ExternalResolution::Empty | ExternalResolution::Pending => {}
            ExternalResolution::Resolved { ty, value } => {
                if ty != EXTERNAL_ENTRY_TYPE {
                    map.insert("value".into(), value);
                }
                map.insert("type".into(), Value::String(ty));
            }
            ExternalResolution::Failed { error } => {
                acc.warn(
                    W_EXTERNAL_FETCH_FAILED,
                    format!("external data for '{}' failed: {}", request, error),
                    owner_id,
                    prop_path,
                );
                map.insert("error".into(), Value::String(error));
            }
        }
        Value::Object(map)
    }

    /// Local text for the context locale, following the fallback chain.
    fn local_text(&self, raw: &Value) -> String {
        let Some(localized) = raw.get("value").and_then(Value::as_object) else {
            return String::new();
        };
        self.ctx
            .locale_chain
            .iter()
            .find_map(|locale| localized.get(locale).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }
}

/// The entry a value belongs to, for request ids and warnings.
#[derive(Clone, Copy)]
struct Owner<'a> {
    id: &'a str,
    is_root: bool,
    path: &'a str,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn device_params(device: &DeviceRange) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("$width".into(), json!(device.w));
    params.insert("$widthAuto".into(), Value::Bool(false));
    params
}

fn auto_params(devices: &Devices) -> Map<String, Value> {
    let per_device = |f: &dyn Fn(&DeviceRange) -> Value| -> Value {
        let mut map = Map::new();
        map.insert(RESPONSIVE_MARKER.into(), Value::Bool(true));
        for device in devices.iter() {
            map.insert(device.id.clone(), f(device));
        }
        Value::Object(map)
    };
    let mut params = Map::new();
    params.insert("$width".into(), per_device(&|d| json!(d.w)));
    params.insert("$widthAuto".into(), per_device(&|_| Value::Bool(false)));
    params
}

/// Value props as full responsive maps across every device.
fn full_values(
    definition: &ComponentDefinition,
    entry: &Map<String, Value>,
    devices: &Devices,
) -> Map<String, Value> {
    definition
        .schema
        .iter()
        .filter(|p| !p.kind.is_component())
        .filter_map(|p| {
            let raw = entry.get(&p.prop)?;
            let full = ResponsiveValue::from(raw).to_full(devices);
            Some((p.prop.clone(), Value::from(full)))
        })
        .collect()
}

/// Device whose own entry supplies a cascaded token reference.
fn token_source_device(raw: &Value, devices: &Devices, device_id: &str) -> Option<String> {
    if !is_trulyresponsive(raw) {
        return None;
    }
    let position = devices.position(device_id)?;
    devices.as_slice()[..=position]
        .iter()
        .rev()
        .find(|d| raw.get(&d.id).map_or(false, |v| !v.is_null()))
        .map(|d| d.id.clone())
}

/// Number of compiled children of a collection prop; `None` for anything
/// that is not a collection.
fn collection_len(
    definition: &ComponentDefinition,
    components: &IndexMap<String, Vec<Arc<CompiledComponentConfig>>>,
    name: &str,
) -> Option<usize> {
    let prop = definition.schema_prop(name)?;
    match prop.kind {
        SchemaPropKind::ComponentCollection { .. }
        | SchemaPropKind::ComponentCollectionLocalised { .. } => {
            Some(components.get(name).map_or(0, Vec::len))
        }
        _ => None,
    }
}

fn collection_value(items: Vec<Map<String, Value>>) -> Value {
    Value::Array(items.into_iter().map(Value::Object).collect())
}

/// Puts the children's after-auto entries back into the prop's shape.
fn rebuild_children(
    prop: &SchemaProp,
    value: &Value,
    after_auto: Vec<Value>,
    locale_chain: &[String],
) -> Value {
    match prop.kind {
        SchemaPropKind::ComponentCollectionLocalised { .. } => {
            let mut out = value.clone();
            if let (Some((locale, _)), Value::Object(map)) = (localised_items(value, locale_chain), &mut out) {
                map.insert(locale.to_string(), Value::Array(after_auto));
            }
            out
        }
        _ => Value::Array(after_auto),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sentinel_shape() {
        let node = CompiledComponentConfig::missing("a", "Unknown", "component 'Unknown' is not registered");
        assert!(node.is_missing());
        assert!(node.disabled);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["_component"], MISSING_COMPONENT_ID);
        assert_eq!(json["props"]["originalComponent"], "Unknown");
        assert!(json.get("__editing").is_none());
    }

    #[test]
    fn test_auto_params_cover_every_device() {
        let devices = Devices::new(vec![
            DeviceRange::new("lg", 1200, None),
            DeviceRange::new("sm", 600, Some(1200)),
        ])
        .unwrap();
        let params = auto_params(&devices);
        assert_eq!(params["$width"]["sm"], 600);
        assert_eq!(params["$widthAuto"][RESPONSIVE_MARKER], true);
    }

    #[test]
    fn test_token_source_device_cascades() {
        let devices = Devices::new(vec![
            DeviceRange::new("lg", 1200, None),
            DeviceRange::new("md", 900, Some(1200)),
            DeviceRange::new("sm", 600, Some(900)),
        ])
        .unwrap();
        let raw = json!({ "$res": true, "lg": { "value": "a" }, "sm": { "value": "b" } });
        assert_eq!(token_source_device(&raw, &devices, "md").as_deref(), Some("lg"));
        assert_eq!(token_source_device(&raw, &devices, "sm").as_deref(), Some("sm"));
        assert_eq!(token_source_device(&json!({ "value": "x" }), &devices, "sm"), None);
    }
}
