//! Token resolution against the theme's token tables.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::{ConfigTokenValue, Devices, TokenTables};
use crate::error::UnknownTokenError;
use crate::responsive::resolve_value;

lazy_static! {
    static ref BARE_NUMBER: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

/// Resolves a token-valued prop for one device.
///
/// The reference itself may be responsive, and so may the token's value in
/// the table. `Ok(None)` means nothing is defined for this device.
pub fn resolve_token(
    token_ref: &Value,
    tables: &TokenTables,
    table: &str,
    devices: &Devices,
    device_id: &str,
    path: &str,
) -> Result<Option<Value>, UnknownTokenError> {
    let entry = match resolve_value(token_ref, devices, device_id) {
        Some(Value::Null) | None => return Ok(None),
        Some(entry) => entry,
    };

    let Value::Object(entry) = entry else {
        return Ok(Some(entry));
    };

    if let Some(token_id) = entry.get("tokenId").and_then(Value::as_str) {
        let token = find_token(tables, table, token_id).ok_or_else(|| UnknownTokenError {
            token_id: token_id.to_string(),
            path: path.to_string(),
        })?;
        return Ok(resolve_value(&token.value, devices, device_id).filter(|v| !v.is_null()));
    }

    Ok(entry.get("value").cloned().filter(|v| !v.is_null()))
}

pub fn find_token<'a>(
    tables: &'a TokenTables,
    table: &str,
    token_id: &str,
) -> Option<&'a ConfigTokenValue> {
    tables.get(table)?.iter().find(|t| t.id == token_id)
}

/// The table's default token: the one flagged `isDefault`, else the first.
pub fn default_token<'a>(tables: &'a TokenTables, table: &str) -> Option<&'a ConfigTokenValue> {
    let values = tables.get(table)?;
    values.iter().find(|t| t.is_default).or_else(|| values.first())
}

/// Token reference pointing at `token`, carrying its value inline.
pub fn token_reference(token: &ConfigTokenValue) -> Value {
    let mut map = Map::new();
    map.insert("value".into(), token.value.clone());
    map.insert("tokenId".into(), Value::String(token.id.clone()));
    Value::Object(map)
}

/// Space values given as bare numbers are pixels.
pub fn format_space(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::String(format!("{}px", n)),
        Value::String(s) if BARE_NUMBER.is_match(&s) => Value::String(format!("{}px", s)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceRange;
    use serde_json::json;

    fn devices() -> Devices {
        Devices::new(vec![
            DeviceRange::new("lg", 1200, Some(1200)),
            DeviceRange::new("sm", 600, None),
        ])
        .unwrap()
    }

    fn tables() -> TokenTables {
        let mut tables = TokenTables::new();
        tables.insert(
            "colors".to_string(),
            vec![
                ConfigTokenValue::new("black", json!("#000")),
                ConfigTokenValue::new("brand", json!({ "$res": true, "lg": "#f00", "sm": "#0f0" }))
                    .default_token(),
            ],
        );
        tables
    }

    #[test]
    fn test_inline_value_without_token() {
        let value = resolve_token(
            &json!({ "value": "#abc" }),
            &tables(),
            "colors",
            &devices(),
            "sm",
            "a.color",
        )
        .unwrap();
        assert_eq!(value, Some(json!("#abc")));
    }

    #[test]
    fn test_token_value_is_itself_responsive() {
        let reference = json!({ "tokenId": "brand", "value": "#f00" });
        let lg = resolve_token(&reference, &tables(), "colors", &devices(), "lg", "a.c").unwrap();
        let sm = resolve_token(&reference, &tables(), "colors", &devices(), "sm", "a.c").unwrap();
        assert_eq!(lg, Some(json!("#f00")));
        assert_eq!(sm, Some(json!("#0f0")));
    }

    #[test]
    fn test_responsive_reference_cascades() {
        let reference = json!({ "$res": true, "lg": { "tokenId": "black" } });
        let sm = resolve_token(&reference, &tables(), "colors", &devices(), "sm", "a.c").unwrap();
        assert_eq!(sm, Some(json!("#000")));
    }

    #[test]
    fn test_unknown_token_reports_id_and_path() {
        let err = resolve_token(
            &json!({ "tokenId": "missing", "value": "#123" }),
            &tables(),
            "colors",
            &devices(),
            "lg",
            "root.background",
        )
        .unwrap_err();
        assert_eq!(err.token_id, "missing");
        assert_eq!(err.path, "root.background");
    }

    #[test]
    fn test_default_token_prefers_flag() {
        assert_eq!(default_token(&tables(), "colors").unwrap().id, "brand");
        assert!(default_token(&tables(), "space").is_none());
    }

    #[test]
    fn test_format_space() {
        assert_eq!(format_space(json!(16)), json!("16px"));
        assert_eq!(format_space(json!("8")), json!("8px"));
        assert_eq!(format_space(json!("2rem")), json!("2rem"));
    }
}
