//! Parsing of CRM response envelopes.
//!
//! Every write returns `{"data": [{"code", "status", "details", "message"}]}`.
//! A duplicate-key rejection arrives either in that multi-error shape or as a
//! single `{"code", "details"}` object; the existing record id sits at
//! `details.id` or `details.duplicate_record.id`.

use serde_json::Value;

use super::CrmError;

pub const DUPLICATE_CODE: &str = "DUPLICATE_DATA";

/// Extracts the id of the first record of a successful write.
pub fn record_id(status: u16, body: &Value) -> Result<String, CrmError> {
    let entry = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .ok_or_else(|| CrmError::Malformed("response has no `data` entries".to_string()))?;

    ensure_entry_succeeded(status, entry, body)?;

    entry
        .get("details")
        .and_then(id_from_details)
        .ok_or_else(|| CrmError::Malformed("response entry has no `details.id`".to_string()))
}

/// Fails when any entry of a write response reports an error.
pub fn ensure_succeeded(status: u16, body: &Value) -> Result<(), CrmError> {
    match body.get("data").and_then(Value::as_array) {
        Some(entries) => {
            for entry in entries {
                ensure_entry_succeeded(status, entry, body)?;
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Id of the already existing record named by a duplicate-key rejection.
pub fn duplicate_record_id(body: &Value) -> Option<String> {
    if let Some(entries) = body.get("data").and_then(Value::as_array) {
        return entries.iter().find_map(duplicate_from_entry);
    }
    duplicate_from_entry(body)
}

fn duplicate_from_entry(entry: &Value) -> Option<String> {
    let code = entry.get("code").and_then(Value::as_str)?;
    if !code.eq_ignore_ascii_case(DUPLICATE_CODE) {
        return None;
    }

    let details = entry.get("details")?;
    details.get("duplicate_record").and_then(id_from_details).or_else(|| id_from_details(details))
}

fn ensure_entry_succeeded(status: u16, entry: &Value, body: &Value) -> Result<(), CrmError> {
    let failed = entry
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|value| value.eq_ignore_ascii_case("error"));
    if failed {
        return Err(CrmError::Rejected { status, body: body.clone() });
    }
    Ok(())
}

fn id_from_details(details: &Value) -> Option<String> {
    match details.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
