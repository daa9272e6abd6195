//! Validated CRUD over tenant tables.
//!
//! The gateway never builds SQL itself: it checks the payload against the
//! table's field list, turns it into bound [`ColumnValue`]s, and hands those to
//! the transaction's [`RecordTx`]. Records come back from storage keyed by
//! column name and are presented keyed by field name.

pub mod validation;

use crate::core::naming;
use crate::core::value::format_timestamp;
use crate::core::{
    EngineError, FieldType, LogicalTable, Record, RecordPage, Result, SortDirection,
};
use crate::storage::{ColumnValue, RecordQuery, RecordTx, StorageTx};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Map;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_SORT_COLUMN: &str = "created_at";

/// Pagination and ordering requested by a caller. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, alias = "limit", alias = "pageSize")]
    pub page_size: Option<u32>,
    #[serde(default, alias = "sort_by", alias = "sortBy")]
    pub sort: Option<String>,
    #[serde(default, alias = "order", alias = "sortOrder")]
    pub direction: Option<SortDirection>,
}

impl ListQuery {
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(field.into());
        self.direction = Some(direction);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAccessGateway {
    default_page_size: u32,
    max_page_size: u32,
}

impl DataAccessGateway {
    pub fn new(default_page_size: u32, max_page_size: u32) -> Self {
        Self {
            default_page_size,
            max_page_size,
        }
    }

    /// Page number (1-based) and page size after clamping.
    pub fn resolve_page(&self, query: &ListQuery) -> (u32, u32) {
        let page = query.page.unwrap_or(1).max(1);
        let size = query
            .page_size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));
        (page, size)
    }

    /// Maps a requested sort field to a physical column. Only declared fields
    /// and system columns are accepted.
    pub fn resolve_sort_column(table: &LogicalTable, sort: Option<&str>) -> Result<String> {
        let sort = sort.unwrap_or(DEFAULT_SORT_COLUMN);
        if naming::is_system_column(sort) {
            return Ok(sort.to_string());
        }
        table
            .field(sort)
            .map(|field| field.column_name())
            .ok_or_else(|| EngineError::Validation(format!("Cannot sort by '{sort}'")))
    }

    pub async fn list(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
        query: &ListQuery,
    ) -> Result<RecordPage> {
        let sort_column = Self::resolve_sort_column(table, query.sort.as_deref())?;
        let (page, page_size) = self.resolve_page(query);
        let request = RecordQuery {
            sort_column,
            direction: query.direction.unwrap_or_default(),
            limit: page_size,
            offset: u64::from(page - 1) * u64::from(page_size),
        };
        debug!(table = %table.name, ?request, "listing records");

        let (rows, total) = tx
            .list_records(&table.physical_table, &request)
            .await
            .map_err(|err| for_table(table, err))?;
        let total_pages = u32::try_from(total.div_ceil(u64::from(page_size))).unwrap_or(u32::MAX);
        Ok(RecordPage {
            records: rows.into_iter().map(|row| present(table, row)).collect(),
            page,
            page_size,
            total,
            total_pages,
        })
    }

    pub async fn get(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
        id: Uuid,
    ) -> Result<Record> {
        tx.get_record(&table.physical_table, id)
            .await
            .map_err(|err| for_table(table, err))?
            .map(|row| present(table, row))
            .ok_or_else(|| EngineError::RecordNotFound(id.to_string()))
    }

    pub async fn create(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
        payload: &Map<String, serde_json::Value>,
    ) -> Result<Record> {
        validation::check_required_present(table, payload)?;
        let values = non_empty(validation::project_payload(table, payload)?)?;

        let row = tx
            .insert_record(&table.physical_table, &values)
            .await
            .map_err(|err| for_table(table, err))?;
        info!(table = %table.name, record_id = %row.id, "record created");
        Ok(present(table, row))
    }

    /// Partial update; `updated_at` is refreshed by the statement itself.
    pub async fn update(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
        id: Uuid,
        payload: &Map<String, serde_json::Value>,
    ) -> Result<Record> {
        validation::check_required_not_nulled(table, payload)?;
        let values = non_empty(validation::project_payload(table, payload)?)?;

        let row = tx
            .update_record(&table.physical_table, id, &values)
            .await
            .map_err(|err| for_table(table, err))?
            .ok_or_else(|| EngineError::RecordNotFound(id.to_string()))?;
        info!(table = %table.name, record_id = %id, "record updated");
        Ok(present(table, row))
    }

    pub async fn delete(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
        id: Uuid,
    ) -> Result<Uuid> {
        let deleted = tx
            .delete_record(&table.physical_table, id)
            .await
            .map_err(|err| for_table(table, err))?;
        if !deleted {
            return Err(EngineError::RecordNotFound(id.to_string()));
        }
        info!(table = %table.name, record_id = %id, "record deleted");
        Ok(id)
    }
}

impl Default for DataAccessGateway {
    fn default() -> Self {
        Self::new(20, 100)
    }
}

/// Names the logical table in storage errors that refer to its storage.
fn for_table(table: &LogicalTable, err: EngineError) -> EngineError {
    match err {
        EngineError::TableNotFound(_) => EngineError::TableNotFound(table.name.clone()),
        other => other,
    }
}

fn non_empty(values: Vec<ColumnValue>) -> Result<Vec<ColumnValue>> {
    if values.is_empty() {
        Err(EngineError::NoValidFields)
    } else {
        Ok(values)
    }
}

/// Rekeys a stored row by field name. Every declared field is present in the
/// result, `null` when the column holds no value.
fn present(table: &LogicalTable, mut row: Record) -> Record {
    let mut fields = Map::with_capacity(table.fields.len());
    for field in &table.fields {
        let value = row
            .fields
            .remove(&field.column_name())
            .unwrap_or(serde_json::Value::Null);
        let value = match (field.field_type, value) {
            (FieldType::Datetime, serde_json::Value::String(text)) => {
                serde_json::Value::String(normalize_timestamp(text))
            }
            (_, value) => value,
        };
        fields.insert(field.name.clone(), value);
    }
    row.fields = fields;
    row
}

fn normalize_timestamp(text: String) -> String {
    match DateTime::parse_from_rfc3339(&text) {
        Ok(ts) => format_timestamp(&ts.with_timezone(&Utc)),
        Err(_) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldDefinition;

    fn table() -> LogicalTable {
        LogicalTable::new(
            Uuid::new_v4(),
            "visits",
            vec![
                FieldDefinition::new("Reason", FieldType::Text),
                FieldDefinition::new("at", FieldType::Datetime),
            ],
        )
    }

    #[test]
    fn test_page_resolution_clamps() {
        let gateway = DataAccessGateway::new(20, 100);
        assert_eq!(gateway.resolve_page(&ListQuery::default()), (1, 20));
        assert_eq!(
            gateway.resolve_page(&ListQuery::default().page(0).page_size(0)),
            (1, 1)
        );
        assert_eq!(
            gateway.resolve_page(&ListQuery::default().page(3).page_size(5000)),
            (3, 100)
        );
    }

    #[test]
    fn test_sort_column_must_be_known() {
        let table = table();
        assert_eq!(
            DataAccessGateway::resolve_sort_column(&table, None).unwrap(),
            "created_at"
        );
        assert_eq!(
            DataAccessGateway::resolve_sort_column(&table, Some("Reason")).unwrap(),
            "reason"
        );
        assert!(matches!(
            DataAccessGateway::resolve_sort_column(&table, Some("reason; DROP TABLE x")),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_storage_errors_name_the_logical_table() {
        let table = table();
        assert_eq!(
            for_table(&table, EngineError::TableNotFound("t_0123_visits".into())),
            EngineError::TableNotFound("visits".into())
        );
        assert_eq!(
            for_table(&table, EngineError::MissingRequiredField("at".into())),
            EngineError::MissingRequiredField("at".into())
        );
    }

    #[test]
    fn test_present_rekeys_by_field_name() {
        let table = table();
        let mut stored = Map::new();
        stored.insert("reason".into(), serde_json::json!("checkup"));
        stored.insert(
            "at".into(),
            serde_json::json!("2024-03-01T09:30:00+00:00"),
        );
        let now = Utc::now();
        let record = present(
            &table,
            Record {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                fields: stored,
            },
        );
        assert_eq!(record.get("Reason"), Some(&serde_json::json!("checkup")));
        assert_eq!(
            record.get("at"),
            Some(&serde_json::json!("2024-03-01T09:30:00.000000Z"))
        );
        assert!(record.get("reason").is_none());
    }
}
