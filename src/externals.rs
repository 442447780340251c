//! External reference tracking.
//!
//! References are discovered by walking the normalized tree, identified by a
//! stable request id derived from their position, and resolved against an
//! [`ExternalDataStore`] fed by the caller's fetcher.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Devices;
use crate::normalize::{normalize, normalize_embedded};
use crate::registry::CompilationContext;
use crate::responsive::{is_trulyresponsive, ResponsiveValue};
use crate::schema::{SchemaProp, SchemaPropKind};
use crate::visitor::{join_path, walk_prop, EntryVisitor};

pub const LOCAL_TEXT_WIDGET_ID: &str = "@easyblocks/local-text";
pub const LOCAL_TEXT_PREFIX: &str = "local.";
/// Resource type of a fetched value that is itself an entry.
pub const EXTERNAL_ENTRY_TYPE: &str = "entry";
/// Resource type of a compound result narrowed by the reference's `key`.
pub const EXTERNAL_OBJECT_TYPE: &str = "object";
/// Stands in for the root entry's id in request ids.
pub const ROOT_REQUEST_ID: &str = "$";

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    /// `None` (JSON `null`) until a resource has been picked.
    #[serde(default)]
    pub id: Option<Value>,
    pub widget_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ExternalReference {
    /// Reads a reference out of a prop value. Local text is not a reference.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if !map.contains_key("id") {
            return None;
        }
        let widget_id = map.get("widgetId").and_then(Value::as_str)?;
        if widget_id == LOCAL_TEXT_WIDGET_ID {
            return None;
        }
        Some(Self {
            id: map.get("id").cloned().filter(|id| !id.is_null()),
            widget_id: widget_id.to_string(),
            key: map.get("key").and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
    }

    /// The id as a comparable string; non-string ids use their JSON text.
    pub fn external_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), self.id.clone().unwrap_or(Value::Null));
        map.insert("widgetId".into(), Value::String(self.widget_id.clone()));
        if let Some(key) = &self.key {
            map.insert("key".into(), Value::String(key.clone()));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalWithSchemaProp {
    /// Request id, unique per prop position (and device).
    pub id: String,
    pub external_reference: ExternalReference,
    pub schema_prop: SchemaProp,
    pub entry_id: String,
    pub path: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST IDS
// ═══════════════════════════════════════════════════════════════════════════════

/// `"<entryId>.<prop>"`, with `"$"` for the root entry and `".<device>"`
/// appended for per-device references.
pub fn request_id(entry_id: &str, is_root: bool, prop: &str, device: Option<&str>) -> String {
    let owner = if is_root { ROOT_REQUEST_ID } else { entry_id };
    match device {
        Some(device) => format!("{}.{}.{}", owner, prop, device),
        None => format!("{}.{}", owner, prop),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequestId {
    /// `"$"` for the root entry.
    pub entry_id: String,
    pub prop: String,
    pub device: Option<String>,
}

/// Inverse of [`request_id`]. Entry ids containing `.` are not supported.
pub fn parse_request_id(id: &str) -> Option<ParsedRequestId> {
    let mut parts = id.splitn(3, '.');
    let entry_id = parts.next().filter(|s| !s.is_empty())?;
    let prop = parts.next().filter(|s| !s.is_empty())?;
    let device = parts.next().map(str::to_string);
    if device.as_deref().map_or(false, |d| d.is_empty() || d.contains('.')) {
        return None;
    }
    Some(ParsedRequestId {
        entry_id: entry_id.to_string(),
        prop: prop.to_string(),
        device,
    })
}

/// Reference used on `device_id`, with the device whose entry supplied it
/// (`None` for non-responsive values).
pub fn reference_for_device(
    value: &Value,
    devices: &Devices,
    device_id: &str,
) -> Option<(Option<String>, ExternalReference)> {
    if !is_trulyresponsive(value) {
        return ExternalReference::from_value(value).map(|r| (None, r));
    }
    let position = devices.position(device_id)?;
    devices.as_slice()[..=position].iter().rev().find_map(|device| {
        value
            .get(&device.id)
            .and_then(ExternalReference::from_value)
            .map(|r| (Some(device.id.clone()), r))
    })
}

/// Every reference held by an external prop value, in device order for
/// per-device values. Devices that are not configured are skipped.
pub fn prop_references(value: &Value, devices: &Devices) -> Vec<(Option<String>, ExternalReference)> {
    match ResponsiveValue::from(value) {
        ResponsiveValue::Plain(v) => ExternalReference::from_value(&v)
            .map(|r| vec![(None, r)])
            .unwrap_or_default(),
        ResponsiveValue::Responsive(per_device) => per_device
            .into_iter()
            .filter(|(device, _)| devices.position(device).is_some())
            .filter_map(|(device, v)| ExternalReference::from_value(&v).map(|r| (Some(device), r)))
            .collect(),
    }
}

/// The normalized entry a reference resolved to, if its resource is of the
/// `entry` type. Ids inside it are derived from `request_id`.
pub fn embedded_entry(
    ctx: &CompilationContext,
    store: &ExternalDataStore,
    request_id: &str,
    reference: &ExternalReference,
    child_path: &str,
) -> Option<Value> {
    match store.resolve(request_id, reference) {
        ExternalResolution::Resolved { ty, value } if ty == EXTERNAL_ENTRY_TYPE => {
            Some(normalize_embedded(&value, ctx, request_id, child_path).0)
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FETCH CONTRACT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedExternalDataValue {
    pub id: Value,
    pub widget_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl RequestedExternalDataValue {
    pub fn external_id(&self) -> Option<String> {
        ExternalReference {
            id: Some(self.id.clone()),
            widget_id: self.widget_id.clone(),
            key: None,
        }
        .external_id()
    }
}

pub type RequestedExternalData = IndexMap<String, RequestedExternalDataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchResourceResult {
    Rejected {
        error: String,
    },
    Resolved {
        #[serde(rename = "type")]
        ty: String,
        value: Value,
    },
}

impl FetchResourceResult {
    pub fn resolved(ty: &str, value: Value) -> Self {
        Self::Resolved {
            ty: ty.to_string(),
            value,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self::Rejected {
            error: error.into(),
        }
    }
}

pub type FetchOutputResources = IndexMap<String, FetchResourceResult>;
pub type ExternalData = IndexMap<String, FetchResourceResult>;

/// What a reference currently resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalResolution {
    /// No resource picked yet.
    Empty,
    /// Picked but not fetched, or fetched for a different id.
    Pending,
    Resolved { ty: String, value: Value },
    Failed { error: String },
}

/// Narrows a compound result through the reference's `key`.
pub fn narrow_resource(result: &FetchResourceResult, key: Option<&str>) -> ExternalResolution {
    match result {
        FetchResourceResult::Rejected { error } => ExternalResolution::Failed {
            error: error.clone(),
        },
        FetchResourceResult::Resolved { ty, value } if ty == EXTERNAL_OBJECT_TYPE => {
            let Some(key) = key else {
                return ExternalResolution::Resolved {
                    ty: ty.clone(),
                    value: value.clone(),
                };
            };
            match value.get(key) {
                Some(part) => match (part.get("type").and_then(Value::as_str), part.get("value")) {
                    (Some(ty), Some(value)) => ExternalResolution::Resolved {
                        ty: ty.to_string(),
                        value: value.clone(),
                    },
                    _ => ExternalResolution::Failed {
                        error: format!("compound resource entry '{}' is malformed", key),
                    },
                },
                None => ExternalResolution::Failed {
                    error: format!("compound resource has no key '{}'", key),
                },
            }
        }
        FetchResourceResult::Resolved { ty, value } => ExternalResolution::Resolved {
            ty: ty.clone(),
            value: value.clone(),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    /// External id the result was fetched for.
    pub external_id: Option<String>,
    pub result: FetchResourceResult,
    pub version: u64,
}

/// Fetched external data keyed by request id. Every write bumps a version
/// so cached subtrees can tell whether their slice changed.
#[derive(Debug, Clone, Default)]
pub struct ExternalDataStore {
    entries: IndexMap<String, StoredResource>,
    next_version: u64,
}

impl ExternalDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        request_id: &str,
        external_id: Option<String>,
        result: FetchResourceResult,
    ) {
        self.next_version += 1;
        self.entries.insert(
            request_id.to_string(),
            StoredResource {
                external_id,
                result,
                version: self.next_version,
            },
        );
    }

    /// Stores a fetch response. Requested ids the fetcher left out are
    /// recorded as rejected so they are not requested again.
    pub fn merge(&mut self, requested: &RequestedExternalData, fetched: FetchOutputResources) {
        let mut fetched = fetched;
        for (request_id, request) in requested {
            let external_id = request.external_id();
            let result = fetched
                .shift_remove(request_id)
                .unwrap_or_else(|| FetchResourceResult::rejected("no data returned for request"));
            self.insert(request_id, external_id, result);
        }
        for request_id in fetched.keys() {
            tracing::debug!(request_id = %request_id, "ignoring unrequested external data");
        }
    }

    pub fn get(&self, request_id: &str) -> Option<&StoredResource> {
        self.entries.get(request_id)
    }

    pub fn version(&self, request_id: &str) -> Option<u64> {
        self.entries.get(request_id).map(|e| e.version)
    }

    /// A stored result is stale when the reference now points elsewhere.
    pub fn is_stale(&self, request_id: &str, reference: &ExternalReference) -> bool {
        self.entries.get(request_id).map_or(false, |e| {
            e.external_id.is_some() && e.external_id != reference.external_id()
        })
    }

    pub fn resolve(&self, request_id: &str, reference: &ExternalReference) -> ExternalResolution {
        if reference.is_empty() {
            return ExternalResolution::Empty;
        }
        match self.entries.get(request_id) {
            Some(stored) if !self.is_stale(request_id, reference) => {
                narrow_resource(&stored.result, reference.key.as_deref())
            }
            _ => ExternalResolution::Pending,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_external_data(&self) -> ExternalData {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.result.clone()))
            .collect()
    }
}

impl From<ExternalData> for ExternalDataStore {
    /// Seeds a store from previously known data. The external ids those
    /// results were fetched for are unknown, so they are trusted as-is and
    /// never go stale. Use [`ExternalDataStore::seed`] when the requests
    /// that produced the data are known.
    fn from(data: ExternalData) -> Self {
        let mut store = Self::new();
        for (request_id, result) in data {
            store.insert(&request_id, None, result);
        }
        store
    }
}

impl ExternalDataStore {
    /// Seeds a store from a previous fetch. Each result remembers the
    /// external id it was requested for, so a reference that later points
    /// elsewhere is stale and requested again.
    pub fn seed(data: ExternalData, requested: &RequestedExternalData) -> Self {
        let mut store = Self::new();
        for (request_id, result) in data {
            let external_id = requested
                .get(&request_id)
                .and_then(RequestedExternalDataValue::external_id);
            store.insert(&request_id, external_id, result);
        }
        store
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects every external reference in the tree, resolved or not.
pub fn find_externals(entry: &Value, ctx: &CompilationContext) -> Vec<ExternalWithSchemaProp> {
    let (normalized, _) = normalize(entry, ctx);
    collect(&normalized, ctx, None)
}

/// Like [`find_externals`], but also walks into entries embedded by already
/// fetched data.
pub fn find_externals_with_data(
    entry: &Value,
    ctx: &CompilationContext,
    store: &ExternalDataStore,
) -> Vec<ExternalWithSchemaProp> {
    let (normalized, _) = normalize(entry, ctx);
    collect(&normalized, ctx, Some(store))
}

pub(crate) fn collect(
    normalized: &Value,
    ctx: &CompilationContext,
    store: Option<&ExternalDataStore>,
) -> Vec<ExternalWithSchemaProp> {
    let mut collector = ExternalsCollector {
        store,
        root_id: normalized
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        found: vec![],
    };
    collector.visit_entry(ctx, normalized, "");
    collector.found
}

/// References that still need a fetch: picked, and missing or stale in the
/// store. Rejected results are final and not requested again.
pub fn requested_external_data(
    found: &[ExternalWithSchemaProp],
    store: &ExternalDataStore,
) -> RequestedExternalData {
    found
        .iter()
        .filter_map(|external| {
            let reference = &external.external_reference;
            let id = reference.id.clone()?;
            let known = store.get(&external.id).is_some() && !store.is_stale(&external.id, reference);
            if known {
                return None;
            }
            let params = match &external.schema_prop.kind {
                SchemaPropKind::External { params, .. } => params.clone(),
                _ => None,
            };
            Some((
                external.id.clone(),
                RequestedExternalDataValue {
                    id,
                    widget_id: reference.widget_id.clone(),
                    params,
                },
            ))
        })
        .collect()
}

struct ExternalsCollector<'s> {
    store: Option<&'s ExternalDataStore>,
    root_id: Option<String>,
    found: Vec<ExternalWithSchemaProp>,
}

impl ExternalsCollector<'_> {
    fn push(
        &mut self,
        request_id: String,
        reference: ExternalReference,
        prop: &SchemaProp,
        entry_id: &str,
        path: &str,
    ) {
        self.found.push(ExternalWithSchemaProp {
            id: request_id,
            external_reference: reference,
            schema_prop: prop.clone(),
            entry_id: entry_id.to_string(),
            path: path.to_string(),
        });
    }

    fn embedded(
        &mut self,
        ctx: &CompilationContext,
        request_id: &str,
        reference: &ExternalReference,
        child_path: &str,
    ) -> bool {
        let Some(entry) = self
            .store
            .and_then(|store| embedded_entry(ctx, store, request_id, reference, child_path))
        else {
            return false;
        };
        self.visit_entry(ctx, &entry, child_path);
        true
    }
}

impl EntryVisitor for ExternalsCollector<'_> {
    fn visit_prop(
        &mut self,
        ctx: &CompilationContext,
        entry: &Map<String, Value>,
        prop: &SchemaProp,
        value: &Value,
        path: &str,
    ) {
        let entry_id = entry.get("_id").and_then(Value::as_str).unwrap_or_default();
        let is_root = self.root_id.as_deref() == Some(entry_id);
        let prop_path = join_path(path, &prop.prop);

        match &prop.kind {
            SchemaPropKind::External { .. } => {
                let mut embedded = 0;
                for (device, reference) in prop_references(value, &ctx.devices) {
                    let id = request_id(entry_id, is_root, &prop.prop, device.as_deref());
                    self.push(id.clone(), reference.clone(), prop, entry_id, &prop_path);
                    let child_path = join_path(&prop_path, &embedded.to_string());
                    if self.embedded(ctx, &id, &reference, &child_path) {
                        embedded += 1;
                    }
                }
            }
            SchemaPropKind::Text { .. } => {
                if let Some(reference) = ExternalReference::from_value(value) {
                    let id = request_id(entry_id, is_root, &prop.prop, None);
                    self.push(id, reference, prop, entry_id, &prop_path);
                }
            }
            SchemaPropKind::Token { .. } => {
                let inner = |v: &Value| v.get("value").and_then(ExternalReference::from_value);
                match ResponsiveValue::from(value) {
                    ResponsiveValue::Plain(v) => {
                        if let Some(reference) = inner(&v) {
                            let id = request_id(entry_id, is_root, &prop.prop, None);
                            self.push(id, reference, prop, entry_id, &prop_path);
                        }
                    }
                    ResponsiveValue::Responsive(per_device) => {
                        for (device, v) in per_device {
                            if let Some(reference) = inner(&v) {
                                let id = request_id(entry_id, is_root, &prop.prop, Some(&device));
                                self.push(id, reference, prop, entry_id, &prop_path);
                            }
                        }
                    }
                }
            }
            _ => walk_prop(self, ctx, entry, prop, value, path),
        }
    }
}
