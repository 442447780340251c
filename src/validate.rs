use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Document;

// ═══════════════════════════════════════════════════════════════════════════════
// WARNING CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const W_MISSING_COMPONENT: &str = "NC001";
pub const W_UNKNOWN_TOKEN: &str = "NC002";
pub const W_UNRESOLVED_CASCADE: &str = "NC003";
pub const W_STYLES_COLLECTION_LENGTH: &str = "NC004";
pub const W_DEFINITION_FUNCTION_FAILED: &str = "NC005";
pub const W_EXTERNAL_FETCH_FAILED: &str = "NC006";
pub const W_DUPLICATE_ID: &str = "NC007";
pub const W_INVALID_PROP_VALUE: &str = "NC008";
pub const W_COMPONENT_NOT_ACCEPTED: &str = "NC009";
pub const W_MALFORMED_ENTRY: &str = "NC010";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        W_MISSING_COMPONENT => {
            "Unknown components compile to a sentinel node; the rest of the tree is unaffected."
        }
        W_UNKNOWN_TOKEN => "Unknown tokens compile to their inline value or null.",
        W_UNRESOLVED_CASCADE => {
            "A responsive value with no entry at or above a device resolves to null for that device."
        }
        W_STYLES_COLLECTION_LENGTH => {
            "Per-item style output always has one entry per collection item."
        }
        W_DEFINITION_FUNCTION_FAILED => {
            "A failing definition function contributes no output; compilation continues."
        }
        W_EXTERNAL_FETCH_FAILED => {
            "A failed external reference is reported on its node only and is not retried in this build."
        }
        W_DUPLICATE_ID => "Entry ids are unique across the whole tree.",
        W_INVALID_PROP_VALUE => "Every prop value conforms to its schema kind after normalization.",
        W_COMPONENT_NOT_ACCEPTED => {
            "Children outside a prop's accepted components still compile, but are reported."
        }
        W_MALFORMED_ENTRY => "Malformed entries compile to a sentinel node.",
        _ => "Unknown guarantee.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER WARNING
// ═══════════════════════════════════════════════════════════════════════════════

/// A non-fatal finding collected during normalization or compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerWarning {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub entry_id: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl CompilerWarning {
    pub fn new(code: &str, message: impl Into<String>, entry_id: Option<&str>, path: &str) -> Self {
        Self::with_hints(code, message, entry_id, path, vec![])
    }

    pub fn with_hints(
        code: &str,
        message: impl Into<String>,
        entry_id: Option<&str>,
        path: &str,
        hints: Vec<String>,
    ) -> Self {
        CompilerWarning {
            code: code.to_string(),
            message: message.into(),
            guarantee: get_guarantee(code).to_string(),
            entry_id: entry_id.map(str::to_string),
            path: path.to_string(),
            hints,
        }
    }
}

/// Collects warnings, dropping exact repeats (the same problem is usually
/// observed once per device).
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    items: Vec<CompilerWarning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: CompilerWarning) {
        if self.items.contains(&warning) {
            return;
        }
        tracing::warn!(
            code = %warning.code,
            entry_id = warning.entry_id.as_deref().unwrap_or("-"),
            path = %warning.path,
            "{}",
            warning.message
        );
        self.items.push(warning);
    }

    /// Merges warnings that were already reported; they are not logged again.
    pub fn extend(&mut self, warnings: impl IntoIterator<Item = CompilerWarning>) {
        for w in warnings {
            if !self.items.contains(&w) {
                self.items.push(w);
            }
        }
    }

    pub fn as_slice(&self) -> &[CompilerWarning] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<CompilerWarning> {
        self.items
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT VALIDATION (collaborator gate run before normalization)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedInput {
    Document(Document),
    Entry(Value),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub input: Option<ValidatedInput>,
    pub reason: Option<String>,
}

impl ValidationResult {
    fn valid(input: ValidatedInput) -> Self {
        Self {
            is_valid: true,
            input: Some(input),
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            input: None,
            reason: Some(reason.into()),
        }
    }
}

/// Accepts a document, a bare entry, or nothing at all. Anything else is
/// rejected before it reaches the compile pipeline.
pub fn validate(input: &Value) -> ValidationResult {
    match input {
        Value::Null => ValidationResult::valid(ValidatedInput::Empty),
        Value::Object(map) if map.contains_key("entry") && map.contains_key("version") => {
            match serde_json::from_value::<Document>(input.clone()) {
                Ok(document) => match check_entry_shape(&document.entry, "entry") {
                    Ok(()) => ValidationResult::valid(ValidatedInput::Document(document)),
                    Err(reason) => ValidationResult::invalid(reason),
                },
                Err(e) => ValidationResult::invalid(format!("malformed document: {}", e)),
            }
        }
        Value::Object(_) => match check_entry_shape(input, "") {
            Ok(()) => ValidationResult::valid(ValidatedInput::Entry(input.clone())),
            Err(reason) => ValidationResult::invalid(reason),
        },
        other => ValidationResult::invalid(format!(
            "expected a document or an entry object, got {}",
            json_type_name(other)
        )),
    }
}

fn check_entry_shape(value: &Value, path: &str) -> Result<(), String> {
    let map = value
        .as_object()
        .ok_or_else(|| format!("entry at '{}' is not an object", path))?;

    match map.get("_component") {
        Some(Value::String(s)) if !s.is_empty() => {}
        _ => return Err(format!("entry at '{}' has no '_component'", path)),
    }

    match map.get("_id") {
        None | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(format!(
            "entry at '{}' has a non-string '_id' ({})",
            path,
            json_type_name(other)
        )),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_entry() {
        let result = validate(&json!({ "_id": "a", "_component": "Stack" }));
        assert!(result.is_valid);
        assert!(matches!(result.input, Some(ValidatedInput::Entry(_))));
    }

    #[test]
    fn test_validate_accepts_null() {
        let result = validate(&Value::Null);
        assert!(result.is_valid);
        assert_eq!(result.input, Some(ValidatedInput::Empty));
    }

    #[test]
    fn test_validate_accepts_document() {
        let result = validate(&json!({
            "id": "doc-1",
            "version": 3,
            "entry": { "_id": "root", "_component": "Stack" }
        }));
        assert!(result.is_valid);
        match result.input {
            Some(ValidatedInput::Document(doc)) => assert_eq!(doc.version, 3),
            other => panic!("expected document, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_missing_component() {
        let result = validate(&json!({ "_id": "a" }));
        assert!(!result.is_valid);
        assert!(result.reason.unwrap().contains("_component"));
    }

    #[test]
    fn test_validate_rejects_numeric_id() {
        let result = validate(&json!({ "_id": 5, "_component": "Stack" }));
        assert!(!result.is_valid);
    }

    #[test]
    fn test_validate_rejects_scalars() {
        assert!(!validate(&json!("Stack")).is_valid);
        assert!(!validate(&json!([1, 2])).is_valid);
    }

    #[test]
    fn test_warnings_deduplicate() {
        let mut warnings = Warnings::new();
        let w = CompilerWarning::new(W_UNKNOWN_TOKEN, "unknown token", Some("a"), "a.color");
        warnings.push(w.clone());
        warnings.push(w);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings.as_slice()[0].guarantee,
            "Unknown tokens compile to their inline value or null."
        );
    }
}
