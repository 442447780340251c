//! Responsive values and the breakpoint cascade.
//!
//! A responsive value is either a plain value or a per-device map marked
//! with `"$res": true`. Missing devices inherit from the nearest larger
//! device that has an entry; nothing is inherited upwards.

use indexmap::IndexMap;
use serde::de::{DeserializeOwned, Error as DeError};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::Devices;

pub const RESPONSIVE_MARKER: &str = "$res";

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsiveValue<T> {
    Plain(T),
    Responsive(IndexMap<String, T>),
}

impl<T> ResponsiveValue<T> {
    pub fn is_responsive(&self) -> bool {
        matches!(self, Self::Responsive(_))
    }

    /// Entry stored for exactly this device, without cascading.
    pub fn get(&self, device_id: &str) -> Option<&T> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Responsive(map) => map.get(device_id),
        }
    }

    /// Effective value for `device_id`: the device's own entry, else the
    /// nearest larger device's entry. Unknown device ids resolve to `None`
    /// for responsive values.
    pub fn resolve(&self, devices: &Devices, device_id: &str) -> Option<&T> {
        match self {
            Self::Plain(v) => Some(v),
            Self::Responsive(map) => {
                let position = devices.position(device_id)?;
                devices.as_slice()[..=position]
                    .iter()
                    .rev()
                    .find_map(|device| map.get(&device.id))
            }
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ResponsiveValue<U> {
        match self {
            Self::Plain(v) => ResponsiveValue::Plain(f(v)),
            Self::Responsive(map) => {
                ResponsiveValue::Responsive(map.into_iter().map(|(k, v)| (k, f(v))).collect())
            }
        }
    }
}

impl<T: Clone> ResponsiveValue<T> {
    /// Resolves every device, in device order. Devices with no effective
    /// value are omitted.
    pub fn fill(&self, devices: &Devices) -> IndexMap<String, T> {
        devices
            .iter()
            .filter_map(|d| self.resolve(devices, &d.id).map(|v| (d.id.clone(), v.clone())))
            .collect()
    }

    /// Same as [`fill`](Self::fill) but always in responsive form.
    pub fn to_full(&self, devices: &Devices) -> ResponsiveValue<T> {
        ResponsiveValue::Responsive(self.fill(devices))
    }
}

impl<T: Clone + PartialEq> ResponsiveValue<T> {
    /// Collapses per-device values back into a plain value when every device
    /// has the same entry.
    pub fn squash(per_device: IndexMap<String, T>, devices: &Devices) -> ResponsiveValue<T> {
        let complete = devices.iter().all(|d| per_device.contains_key(&d.id));
        if complete {
            let mut values = per_device.values();
            if let Some(first) = values.next() {
                if values.all(|v| v == first) {
                    return ResponsiveValue::Plain(first.clone());
                }
            }
        }
        let ordered = devices
            .iter()
            .filter_map(|d| per_device.get(&d.id).map(|v| (d.id.clone(), v.clone())))
            .collect();
        ResponsiveValue::Responsive(ordered)
    }
}

impl<T: Default> Default for ResponsiveValue<T> {
    fn default() -> Self {
        Self::Plain(T::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON VIEW
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_trulyresponsive(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|m| m.get(RESPONSIVE_MARKER))
        .map_or(false, |marker| marker == &Value::Bool(true))
}

impl From<&Value> for ResponsiveValue<Value> {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) if is_trulyresponsive(value) => ResponsiveValue::Responsive(
                map.iter()
                    .filter(|(k, v)| k.as_str() != RESPONSIVE_MARKER && !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => ResponsiveValue::Plain(other.clone()),
        }
    }
}

impl From<ResponsiveValue<Value>> for Value {
    fn from(value: ResponsiveValue<Value>) -> Self {
        match value {
            ResponsiveValue::Plain(v) => v,
            ResponsiveValue::Responsive(map) => {
                let mut out = Map::new();
                out.insert(RESPONSIVE_MARKER.to_string(), Value::Bool(true));
                out.extend(map);
                Value::Object(out)
            }
        }
    }
}

/// Resolves a raw JSON value that may be responsive.
pub fn resolve_value(value: &Value, devices: &Devices, device_id: &str) -> Option<Value> {
    if !is_trulyresponsive(value) {
        return Some(value.clone());
    }
    ResponsiveValue::from(value)
        .resolve(devices, device_id)
        .cloned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERDE
// ═══════════════════════════════════════════════════════════════════════════════

impl<T: Serialize> Serialize for ResponsiveValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Plain(v) => v.serialize(serializer),
            Self::Responsive(map) => {
                let mut out = serializer.serialize_map(Some(map.len() + 1))?;
                out.serialize_entry(RESPONSIVE_MARKER, &true)?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ResponsiveValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match ResponsiveValue::from(&raw) {
            ResponsiveValue::Plain(v) => serde_json::from_value(v)
                .map(ResponsiveValue::Plain)
                .map_err(D::Error::custom),
            ResponsiveValue::Responsive(map) => map
                .into_iter()
                .map(|(k, v)| serde_json::from_value(v).map(|v| (k, v)))
                .collect::<Result<IndexMap<_, _>, _>>()
                .map(ResponsiveValue::Responsive)
                .map_err(D::Error::custom),
        }
    }
}
