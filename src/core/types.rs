use super::naming;
use super::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Semantic type of a tenant field. Closed set; see [`FieldType::column_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    #[serde(alias = "date", alias = "date_time", alias = "timestamp")]
    Datetime,
    #[serde(alias = "json")]
    Object,
    Array,
    Currency,
    #[serde(alias = "decimal")]
    Weight,
    Relation,
}

impl FieldType {
    /// Total mapping from logical type to physical column type.
    pub fn column_type(self, max_length: Option<u32>) -> ColumnType {
        match self {
            Self::Text => match max_length {
                Some(len) => ColumnType::VarChar(len),
                None => ColumnType::Text,
            },
            Self::Number => ColumnType::Numeric,
            Self::Boolean => ColumnType::Boolean,
            Self::Datetime => ColumnType::TimestampTz,
            Self::Object | Self::Array => ColumnType::Jsonb,
            Self::Currency => ColumnType::Decimal {
                precision: 19,
                scale: 2,
            },
            Self::Weight => ColumnType::Decimal {
                precision: 19,
                scale: 3,
            },
            Self::Relation => ColumnType::Text,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Currency | Self::Weight)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Relation)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Object => "object",
            Self::Array => "array",
            Self::Currency => "currency",
            Self::Weight => "weight",
            Self::Relation => "relation",
        };
        write!(f, "{name}")
    }
}

/// Optional per-field validation constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldConstraints {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One typed, named column declaration within a logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "FieldConstraints::is_empty")]
    pub validation: FieldConstraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            validation: FieldConstraints::default(),
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, len: u32) -> Self {
        self.validation.max_length = Some(len);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.validation.min = min;
        self.validation.max = max;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn column_name(&self) -> String {
        naming::column_name(&self.name)
    }

    pub fn column_type(&self) -> ColumnType {
        let max_length = if self.field_type == FieldType::Text {
            self.validation.max_length
        } else {
            None
        };
        self.field_type.column_type(max_length)
    }

    /// Checks the name grammar and that constraints fit the type.
    pub fn validate(&self) -> Result<()> {
        naming::validate_identifier("Field", &self.name)?;
        if naming::is_reserved_field_name(&self.name) {
            return Err(EngineError::Validation(format!(
                "Field name '{}' is reserved",
                self.name
            )));
        }

        let c = &self.validation;
        if (c.max_length.is_some() || c.min_length.is_some()) && !self.field_type.is_textual() {
            return Err(EngineError::Validation(format!(
                "Field '{}': length constraints only apply to text fields",
                self.name
            )));
        }
        if c.max_length == Some(0) {
            return Err(EngineError::Validation(format!(
                "Field '{}': max_length must be greater than zero",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
            if min > max {
                return Err(EngineError::Validation(format!(
                    "Field '{}': min_length exceeds max_length",
                    self.name
                )));
            }
        }
        if (c.min.is_some() || c.max.is_some()) && !self.field_type.is_numeric() {
            return Err(EngineError::Validation(format!(
                "Field '{}': range constraints only apply to numeric fields",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (c.min, c.max) {
            if min > max {
                return Err(EngineError::Validation(format!(
                    "Field '{}': min exceeds max",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Same physical shape: column type and nullability.
    pub fn same_shape(&self, other: &FieldDefinition) -> bool {
        self.column_type() == other.column_type() && self.required == other.required
    }
}

/// Validates a whole field list: every field on its own plus case-insensitive
/// name uniqueness.
pub fn validate_field_list(fields: &[FieldDefinition]) -> Result<()> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        field.validate()?;
        if !seen.insert(field.name.to_ascii_lowercase()) {
            return Err(EngineError::NameConflict(format!("Field '{}'", field.name)));
        }
    }
    Ok(())
}

/// A named schema scoped to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTable {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub physical_table: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogicalTable {
    pub fn new(project_id: Uuid, name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            physical_table: naming::physical_table_name(project_id, &name),
            name,
            fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exact-name lookup, used when matching payload keys.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Case-insensitive lookup, used for uniqueness checks.
    pub fn find_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Whether `column` may appear in an ORDER BY clause.
    pub fn is_sortable(&self, column: &str) -> bool {
        naming::is_system_column(column) || self.field(column).is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Physical column types the engine emits and introspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Uuid,
    Text,
    VarChar(u32),
    Numeric,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    TimestampTz,
    Jsonb,
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            Self::Uuid => "UUID".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::VarChar(len) => format!("VARCHAR({len})"),
            Self::Numeric => "NUMERIC".to_string(),
            Self::Decimal { precision, scale } => format!("NUMERIC({precision},{scale})"),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::TimestampTz => "TIMESTAMPTZ".to_string(),
            Self::Jsonb => "JSONB".to_string(),
        }
    }

    /// Rebuilds a column type from `information_schema.columns` facts.
    pub fn from_catalog(
        data_type: &str,
        char_max_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
    ) -> Option<Self> {
        match data_type {
            "uuid" => Some(Self::Uuid),
            "text" => Some(Self::Text),
            "character varying" => match char_max_length {
                Some(len) if len > 0 => Some(Self::VarChar(len as u32)),
                _ => Some(Self::Text),
            },
            "numeric" => match (numeric_precision, numeric_scale) {
                (Some(p), Some(s)) => Some(Self::Decimal {
                    precision: u8::try_from(p).ok()?,
                    scale: u8::try_from(s).ok()?,
                }),
                _ => Some(Self::Numeric),
            },
            "boolean" => Some(Self::Boolean),
            "timestamp with time zone" => Some(Self::TimestampTz),
            "jsonb" => Some(Self::Jsonb),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.sql())
    }
}

/// Structural fact about one physical column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Declared-vs-physical diff for one logical table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub table_exists: bool,
    pub missing_columns: Vec<String>,
    pub unexpected_columns: Vec<String>,
    pub mismatched_columns: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.table_exists
            && self.missing_columns.is_empty()
            && self.unexpected_columns.is_empty()
            && self.mismatched_columns.is_empty()
    }
}

/// One row of a tenant table as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One page of records plus what a pagination UI needs.
#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
}
