//! Invocation boundary for definition functions.
//!
//! A function that returns an error or panics contributes no output; the
//! failure becomes an NC005 warning and compilation carries on.

use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::definition::{
    AutoInput, ChangeInput, ComponentDefinition, EditingInput, EditingOutput, StylesInput,
    StylesOutput,
};
use crate::validate::{
    CompilerWarning, Warnings, W_DEFINITION_FUNCTION_FAILED, W_STYLES_COLLECTION_LENGTH,
};

/// Where a function is being invoked, for warnings.
#[derive(Debug, Clone, Copy)]
pub struct InvokeSite<'a> {
    pub entry_id: &'a str,
    pub path: &'a str,
}

fn guarded<T>(
    name: &str,
    definition: &ComponentDefinition,
    site: Option<InvokeSite<'_>>,
    warnings: &mut Warnings,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Option<T> {
    let failure = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string()),
    };
    warnings.push(CompilerWarning::new(
        W_DEFINITION_FUNCTION_FAILED,
        format!("{} function of '{}' failed: {}", name, definition.id, failure),
        site.map(|s| s.entry_id),
        site.map_or("", |s| s.path),
    ));
    None
}

/// Runs `auto`. No function, or a failing one, yields an empty patch.
pub fn invoke_auto(
    definition: &ComponentDefinition,
    input: &AutoInput,
    site: InvokeSite<'_>,
    warnings: &mut Warnings,
) -> Map<String, Value> {
    let Some(auto) = &definition.auto else {
        return Map::new();
    };
    guarded("auto", definition, Some(site), warnings, || auto(input)).unwrap_or_default()
}

pub fn invoke_styles(
    definition: &ComponentDefinition,
    input: &StylesInput,
    site: InvokeSite<'_>,
    warnings: &mut Warnings,
) -> StylesOutput {
    let Some(styles) = &definition.styles else {
        return StylesOutput::default();
    };
    guarded("styles", definition, Some(site), warnings, || styles(input)).unwrap_or_default()
}

pub fn invoke_editing(
    definition: &ComponentDefinition,
    input: &EditingInput,
    site: InvokeSite<'_>,
    warnings: &mut Warnings,
) -> Option<EditingOutput> {
    let editing = definition.editing.as_ref()?;
    guarded("editing", definition, Some(site), warnings, || editing(input))
}

pub fn invoke_change(
    definition: &ComponentDefinition,
    input: &ChangeInput,
    warnings: &mut Warnings,
) -> Option<Map<String, Value>> {
    let change = definition.change.as_ref()?;
    guarded("change", definition, None, warnings, || change(input)).flatten()
}

/// Pads with empty style objects, or truncates, so per-item style output has
/// exactly one entry per collection item.
pub fn fit_collection(
    mut items: Vec<Map<String, Value>>,
    expected: usize,
    name: &str,
    site: InvokeSite<'_>,
    warnings: &mut Warnings,
) -> Vec<Map<String, Value>> {
    if items.len() != expected {
        warnings.push(CompilerWarning::new(
            W_STYLES_COLLECTION_LENGTH,
            format!(
                "styles returned {} item entries for '{}' which has {} items",
                items.len(),
                name,
                expected
            ),
            Some(site.entry_id),
            site.path,
        ));
        items.resize_with(expected, Map::new);
    }
    items
}
