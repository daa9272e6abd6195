use crate::core::naming::{self, SYSTEM_COLUMNS};
use crate::core::{ColumnInfo, ColumnType, ConsistencyReport, FieldDefinition, LogicalTable, Result};
use crate::storage::{ColumnSpec, DdlTx, PhysicalTableSpec, StorageTx};
use tracing::info;
use uuid::Uuid;

/// Sole authority over the shape of tenant tables.
///
/// Every method runs inside the caller's transaction; none of them commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysicalTableManager;

impl PhysicalTableManager {
    pub fn new() -> Self {
        Self
    }

    pub fn column_spec(field: &FieldDefinition) -> ColumnSpec {
        ColumnSpec {
            name: field.column_name(),
            column_type: field.column_type(),
            not_null: field.required,
        }
    }

    pub fn table_spec(
        project_id: Uuid,
        name: &str,
        fields: &[FieldDefinition],
    ) -> PhysicalTableSpec {
        PhysicalTableSpec {
            name: naming::physical_table_name(project_id, name),
            columns: fields.iter().map(Self::column_spec).collect(),
        }
    }

    /// Creates the table, one column per field, and the `created_at` index.
    /// Returns the physical name.
    pub async fn create_table(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
        fields: &[FieldDefinition],
    ) -> Result<String> {
        let spec = Self::table_spec(project_id, name, fields);
        tx.create_table(&spec).await?;
        info!(
            %project_id,
            table = %name,
            physical = %spec.name,
            columns = spec.columns.len(),
            "physical table created"
        );
        Ok(spec.name)
    }

    /// Idempotent.
    pub async fn drop_table(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
    ) -> Result<()> {
        let physical = naming::physical_table_name(project_id, name);
        tx.drop_table(&physical).await?;
        info!(%project_id, table = %name, %physical, "physical table dropped");
        Ok(())
    }

    pub async fn add_column(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
        field: &FieldDefinition,
    ) -> Result<()> {
        let physical = naming::physical_table_name(project_id, name);
        tx.add_column(&physical, &Self::column_spec(field)).await?;
        info!(%project_id, table = %name, column = %field.column_name(), "column added");
        Ok(())
    }

    /// Idempotent: an absent column is not an error.
    pub async fn remove_column(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
        field_name: &str,
    ) -> Result<()> {
        let physical = naming::physical_table_name(project_id, name);
        let column = naming::column_name(field_name);
        tx.drop_column(&physical, &column).await?;
        info!(%project_id, table = %name, %column, "column removed");
        Ok(())
    }

    pub async fn table_exists(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
    ) -> Result<bool> {
        tx.table_exists(&naming::physical_table_name(project_id, name))
            .await
    }

    pub async fn get_columns(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        name: &str,
    ) -> Result<Vec<ColumnInfo>> {
        tx.columns(&naming::physical_table_name(project_id, name))
            .await
    }

    /// Columns a table should have: system columns first, then one per field.
    pub fn expected_columns(fields: &[FieldDefinition]) -> Vec<ColumnInfo> {
        let mut columns: Vec<ColumnInfo> = SYSTEM_COLUMNS
            .iter()
            .map(|name| ColumnInfo {
                name: name.to_string(),
                column_type: if *name == "id" {
                    ColumnType::Uuid
                } else {
                    ColumnType::TimestampTz
                },
                nullable: false,
            })
            .collect();
        columns.extend(fields.iter().map(|field| ColumnInfo {
            name: field.column_name(),
            column_type: field.column_type(),
            nullable: !field.required,
        }));
        columns
    }

    /// Compares declared fields with introspected columns.
    pub fn diff(table: &LogicalTable, exists: bool, actual: &[ColumnInfo]) -> ConsistencyReport {
        let expected = Self::expected_columns(&table.fields);
        let mut report = ConsistencyReport {
            table_exists: exists,
            ..ConsistencyReport::default()
        };

        for column in &expected {
            match actual.iter().find(|c| c.name == column.name) {
                None => report.missing_columns.push(column.name.clone()),
                Some(found) if found != column => {
                    report.mismatched_columns.push(column.name.clone())
                }
                Some(_) => {}
            }
        }
        report.unexpected_columns = actual
            .iter()
            .filter(|c| !expected.iter().any(|e| e.name == c.name))
            .map(|c| c.name.clone())
            .collect();
        report
    }
}
