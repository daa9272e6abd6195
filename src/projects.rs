//! Project lifecycle.

use crate::core::tenant::generate_project_key;
use crate::core::{EngineError, Project, ProjectSettings, Result};
use crate::schema::PhysicalTableManager;
use crate::storage::{self, CatalogTx, CredentialTx, StorageTx};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

const MAX_PROJECT_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub settings: Option<ProjectSettings>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: None,
        }
    }

    pub fn settings(mut self, settings: ProjectSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProjectService {
    default_settings: ProjectSettings,
}

impl ProjectService {
    pub fn new(default_settings: ProjectSettings) -> Self {
        Self { default_settings }
    }

    pub fn default_settings(&self) -> &ProjectSettings {
        &self.default_settings
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_PROJECT_NAME_LEN {
            return Err(EngineError::Validation(format!(
                "Project name must be 1 to {MAX_PROJECT_NAME_LEN} characters"
            )));
        }
        Ok(())
    }

    pub async fn create(
        &self,
        tx: &mut dyn StorageTx,
        owner_id: Uuid,
        request: NewProject,
    ) -> Result<Project> {
        let name = request.name.trim();
        Self::validate_name(name)?;

        let settings = request
            .settings
            .unwrap_or_else(|| self.default_settings.clone());
        let project = Project::new(owner_id, name, settings);
        tx.insert_project(&project).await?;

        info!(project_id = %project.id, %owner_id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn list(&self, tx: &mut dyn StorageTx, owner_id: Uuid) -> Result<Vec<Project>> {
        tx.list_projects(owner_id).await
    }

    pub async fn update_settings(
        &self,
        tx: &mut dyn StorageTx,
        project: &mut Project,
        settings: ProjectSettings,
    ) -> Result<()> {
        project.settings = settings;
        project.updated_at = storage::now();
        tx.update_project(project).await?;
        info!(project_id = %project.id, settings = ?project.settings, "project settings updated");
        Ok(())
    }

    /// Issues a new primary key; the old one stops working on commit.
    pub async fn rotate_key(&self, tx: &mut dyn StorageTx, project: &mut Project) -> Result<()> {
        project.project_key = generate_project_key();
        project.updated_at = storage::now();
        tx.update_project(project).await?;
        info!(project_id = %project.id, "project key rotated");
        Ok(())
    }

    /// Drops every physical table of the project, then the project itself
    /// (its table metadata and keys go with it).
    pub async fn delete(
        &self,
        tx: &mut dyn StorageTx,
        physical: &PhysicalTableManager,
        project: &Project,
    ) -> Result<()> {
        let tables = tx.list_tables(project.id).await?;
        for table in &tables {
            physical.drop_table(tx, project.id, &table.name).await?;
        }
        if !tx.delete_project(project.id).await? {
            return Err(EngineError::NotFound(format!("Project '{}'", project.id)));
        }
        info!(project_id = %project.id, tables = tables.len(), "project deleted");
        Ok(())
    }
}

impl Default for ProjectService {
    fn default() -> Self {
        Self::new(ProjectSettings::default())
    }
}
