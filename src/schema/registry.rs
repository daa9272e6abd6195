use super::PhysicalTableManager;
use crate::core::naming;
use crate::core::{
    ConsistencyReport, EngineError, FieldDefinition, LogicalTable, Project, Result,
    validate_field_list,
};
use crate::storage::{CatalogTx, StorageTx};
use tracing::info;
use uuid::Uuid;

/// Declarative metadata store for logical tables.
///
/// Every mutation writes metadata and issues the matching DDL through the same
/// transaction, so the caller's commit (or its absence) applies both or neither.
/// Metadata is written before DDL: the unique `(project, lower(name))` index is
/// what makes a concurrent `define_table` for the same name fail.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    physical: PhysicalTableManager,
}

impl SchemaRegistry {
    pub fn new(physical: PhysicalTableManager) -> Self {
        Self { physical }
    }

    pub fn physical(&self) -> &PhysicalTableManager {
        &self.physical
    }

    /// Defines a table and creates its physical storage.
    pub async fn define_table(
        &self,
        tx: &mut dyn StorageTx,
        project: &Project,
        name: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<LogicalTable> {
        naming::validate_identifier("Table", name)?;
        validate_field_list(&fields)?;

        let count = tx.count_tables(project.id).await?;
        let quota = u64::from(project.settings.max_tables);
        if count >= quota {
            return Err(EngineError::LimitExceeded(format!(
                "Project has reached its limit of {quota} tables"
            )));
        }

        let table = LogicalTable::new(project.id, name, fields);
        tx.insert_table(&table).await?;
        self.physical
            .create_table(tx, project.id, &table.name, &table.fields)
            .await?;

        info!(project_id = %project.id, table = %table.name, table_id = %table.id, "table defined");
        Ok(table)
    }

    /// Appends a field and adds its column.
    pub async fn add_field(
        &self,
        tx: &mut dyn StorageTx,
        table: &mut LogicalTable,
        field: FieldDefinition,
    ) -> Result<FieldDefinition> {
        field.validate()?;
        if table.find_field(&field.name).is_some() {
            return Err(EngineError::NameConflict(format!("Field '{}'", field.name)));
        }

        table.fields.push(field.clone());
        table.touch();
        tx.update_table(table).await?;
        self.physical
            .add_column(tx, table.project_id, &table.name, &field)
            .await?;

        info!(table_id = %table.id, field = %field.name, field_type = %field.field_type, "field added");
        Ok(field)
    }

    /// Removes a field (matched case-insensitively) and drops its column.
    pub async fn remove_field(
        &self,
        tx: &mut dyn StorageTx,
        table: &mut LogicalTable,
        field_name: &str,
    ) -> Result<FieldDefinition> {
        let position = table
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(field_name))
            .ok_or_else(|| EngineError::NotFound(format!("Field '{field_name}'")))?;

        let removed = table.fields.remove(position);
        table.touch();
        tx.update_table(table).await?;
        self.physical
            .remove_column(tx, table.project_id, &table.name, &removed.name)
            .await?;

        info!(table_id = %table.id, field = %removed.name, "field removed");
        Ok(removed)
    }

    /// Replaces the whole field list and reconciles physical columns: fields
    /// missing from the new list are dropped, new ones are added. A field that
    /// keeps its name must keep its column type and required flag.
    pub async fn replace_fields(
        &self,
        tx: &mut dyn StorageTx,
        table: &mut LogicalTable,
        fields: Vec<FieldDefinition>,
    ) -> Result<()> {
        validate_field_list(&fields)?;

        for field in &fields {
            if let Some(current) = table.find_field(&field.name) {
                if !current.same_shape(field) {
                    return Err(EngineError::Validation(format!(
                        "Field '{}' cannot change type or required flag in place; remove it and add it again",
                        field.name
                    )));
                }
            }
        }

        let removed: Vec<FieldDefinition> = table
            .fields
            .iter()
            .filter(|current| {
                !fields
                    .iter()
                    .any(|f| f.name.eq_ignore_ascii_case(&current.name))
            })
            .cloned()
            .collect();
        let added: Vec<FieldDefinition> = fields
            .iter()
            .filter(|f| table.find_field(&f.name).is_none())
            .cloned()
            .collect();

        table.fields = fields;
        table.touch();
        tx.update_table(table).await?;

        for field in &removed {
            self.physical
                .remove_column(tx, table.project_id, &table.name, &field.name)
                .await?;
        }
        for field in &added {
            self.physical
                .add_column(tx, table.project_id, &table.name, field)
                .await?;
        }

        info!(
            table_id = %table.id,
            added = added.len(),
            removed = removed.len(),
            "fields replaced"
        );
        Ok(())
    }

    /// Deletes the metadata and drops the physical table. Hands back the
    /// removed table.
    pub async fn remove_table(
        &self,
        tx: &mut dyn StorageTx,
        table: LogicalTable,
    ) -> Result<LogicalTable> {
        if !tx.delete_table(table.id).await? {
            return Err(EngineError::TableNotFound(table.name.clone()));
        }
        self.physical
            .drop_table(tx, table.project_id, &table.name)
            .await?;

        info!(project_id = %table.project_id, table = %table.name, "table removed");
        Ok(table)
    }

    /// Resolves a table by id or by case-insensitive name.
    pub async fn get_table(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
        id_or_name: &str,
    ) -> Result<LogicalTable> {
        let found = match Uuid::parse_str(id_or_name) {
            Ok(id) => tx.get_table(project_id, id).await?,
            Err(_) => tx.find_table_by_name(project_id, id_or_name).await?,
        };
        found.ok_or_else(|| EngineError::TableNotFound(id_or_name.to_string()))
    }

    pub async fn list_tables(
        &self,
        tx: &mut dyn StorageTx,
        project_id: Uuid,
    ) -> Result<Vec<LogicalTable>> {
        tx.list_tables(project_id).await
    }

    /// Diffs declared fields against the introspected physical columns.
    pub async fn verify_table(
        &self,
        tx: &mut dyn StorageTx,
        table: &LogicalTable,
    ) -> Result<ConsistencyReport> {
        let exists = self
            .physical
            .table_exists(tx, table.project_id, &table.name)
            .await?;
        let columns = if exists {
            self.physical
                .get_columns(tx, table.project_id, &table.name)
                .await?
        } else {
            Vec::new()
        };
        Ok(PhysicalTableManager::diff(table, exists, &columns))
    }
}
