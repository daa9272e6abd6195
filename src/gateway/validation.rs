//! Payload checks shared by create and update.

use crate::core::{EngineError, LogicalTable, Result, Value};
use crate::storage::ColumnValue;
use serde_json::Map;

/// Keeps only payload keys that name a declared field (exact match) and
/// converts each value for its field. Unknown keys are dropped.
pub fn project_payload(
    table: &LogicalTable,
    payload: &Map<String, serde_json::Value>,
) -> Result<Vec<ColumnValue>> {
    let mut values = Vec::with_capacity(payload.len().min(table.fields.len()));
    for field in &table.fields {
        let Some(raw) = payload.get(&field.name) else {
            continue;
        };
        values.push(ColumnValue {
            column: field.column_name(),
            column_type: field.column_type(),
            value: Value::from_json(field, raw)?,
        });
    }
    Ok(values)
}

/// Every required field must be present and non-null.
pub fn check_required_present(
    table: &LogicalTable,
    payload: &Map<String, serde_json::Value>,
) -> Result<()> {
    for field in table.fields.iter().filter(|f| f.required) {
        match payload.get(&field.name) {
            None | Some(serde_json::Value::Null) => {
                return Err(EngineError::MissingRequiredField(field.name.clone()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// A partial update may omit required fields but may not null them.
pub fn check_required_not_nulled(
    table: &LogicalTable,
    payload: &Map<String, serde_json::Value>,
) -> Result<()> {
    for field in table.fields.iter().filter(|f| f.required) {
        if let Some(serde_json::Value::Null) = payload.get(&field.name) {
            return Err(EngineError::MissingRequiredField(field.name.clone()));
        }
    }
    Ok(())
}
