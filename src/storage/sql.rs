//! SQL text for the PostgreSQL backend.
//!
//! DDL cannot take bind parameters, so it is rendered from identifiers that
//! always pass through [`quote_ident`]. DML is built with [`QueryBuilder`] and
//! binds every value.

use super::{ColumnSpec, ColumnValue, PhysicalTableSpec, RecordQuery};
use crate::core::naming::{created_at_index_name, quote_ident};
use crate::core::{ColumnType, Value};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Columns every record query returns; `doc` carries the whole row as JSONB.
/// `t.*` always names the row, even when the table has a column called `t`.
const RECORD_PROJECTION: &str = "t.id, t.created_at, t.updated_at, to_jsonb(t.*) AS doc";

pub const TABLE_EXISTS: &str = "SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = $1
)";

pub const TABLE_COLUMNS: &str = "SELECT
    column_name::TEXT AS column_name,
    data_type::TEXT AS data_type,
    character_maximum_length::INT4 AS char_max_length,
    numeric_precision::INT4 AS numeric_precision,
    numeric_scale::INT4 AS numeric_scale,
    (is_nullable = 'YES') AS nullable
FROM information_schema.columns
WHERE table_schema = current_schema() AND table_name = $1
ORDER BY ordinal_position";

pub fn column_definition(column: &ColumnSpec) -> String {
    let mut definition = format!("{} {}", quote_ident(&column.name), column.column_type.sql());
    if column.not_null {
        definition.push_str(" NOT NULL");
    }
    definition
}

pub fn create_table(spec: &PhysicalTableSpec) -> String {
    let mut columns = vec![
        format!("{} UUID PRIMARY KEY", quote_ident("id")),
        format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quote_ident("created_at")),
        format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quote_ident("updated_at")),
    ];
    columns.extend(spec.columns.iter().map(column_definition));
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(&spec.name),
        columns.join(", ")
    )
}

pub fn create_created_at_index(table: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&created_at_index_name(table)),
        quote_ident(table),
        quote_ident("created_at")
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn add_column(table: &str, column: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_definition(column)
    )
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
        quote_ident(table),
        quote_ident(column)
    )
}

/// Binds a value; NULL is bound with the Rust type matching the target column
/// so the parameter carries the right SQL type.
fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: &ColumnValue) {
    match &value.value {
        Value::Text(s) => {
            builder.push_bind(s.clone());
        }
        Value::Number(n) => {
            builder.push_bind(n.clone());
        }
        Value::Boolean(b) => {
            builder.push_bind(*b);
        }
        Value::Timestamp(ts) => {
            builder.push_bind(*ts);
        }
        Value::Json(v) => {
            builder.push_bind(Json(v.clone()));
        }
        Value::Null => push_typed_null(builder, value.column_type),
    }
}

fn push_typed_null(builder: &mut QueryBuilder<'static, Postgres>, column_type: ColumnType) {
    match column_type {
        ColumnType::Uuid => {
            builder.push_bind(None::<Uuid>);
        }
        ColumnType::Text | ColumnType::VarChar(_) => {
            builder.push_bind(None::<String>);
        }
        ColumnType::Numeric | ColumnType::Decimal { .. } => {
            builder.push_bind(None::<BigDecimal>);
        }
        ColumnType::Boolean => {
            builder.push_bind(None::<bool>);
        }
        ColumnType::TimestampTz => {
            builder.push_bind(None::<DateTime<Utc>>);
        }
        ColumnType::Jsonb => {
            builder.push_bind(None::<Json<serde_json::Value>>);
        }
    }
}

pub fn insert_record(
    table: &str,
    id: Uuid,
    at: DateTime<Utc>,
    values: &[ColumnValue],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(quote_ident(table));
    builder.push(" AS t (");
    builder.push(quote_ident("id"));
    builder.push(", ");
    builder.push(quote_ident("created_at"));
    builder.push(", ");
    builder.push(quote_ident("updated_at"));
    for value in values {
        builder.push(", ");
        builder.push(quote_ident(&value.column));
    }

    builder.push(") VALUES (");
    builder.push_bind(id);
    builder.push(", ");
    builder.push_bind(at);
    builder.push(", ");
    builder.push_bind(at);
    for value in values {
        builder.push(", ");
        push_value(&mut builder, value);
    }
    builder.push(") RETURNING ");
    builder.push(RECORD_PROJECTION);
    builder
}

/// `UPDATE` that always refreshes `updated_at`.
pub fn update_record(
    table: &str,
    id: Uuid,
    at: DateTime<Utc>,
    values: &[ColumnValue],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE ");
    builder.push(quote_ident(table));
    builder.push(" AS t SET ");
    for value in values {
        builder.push(quote_ident(&value.column));
        builder.push(" = ");
        push_value(&mut builder, value);
        builder.push(", ");
    }
    builder.push(quote_ident("updated_at"));
    builder.push(" = ");
    builder.push_bind(at);
    builder.push(" WHERE t.id = ");
    builder.push_bind(id);
    builder.push(" RETURNING ");
    builder.push(RECORD_PROJECTION);
    builder
}

pub fn select_record(table: &str, id: Uuid) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT ");
    builder.push(RECORD_PROJECTION);
    builder.push(" FROM ");
    builder.push(quote_ident(table));
    builder.push(" AS t WHERE t.id = ");
    builder.push_bind(id);
    builder
}

pub fn delete_record(table: &str, id: Uuid) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("DELETE FROM ");
    builder.push(quote_ident(table));
    builder.push(" WHERE ");
    builder.push(quote_ident("id"));
    builder.push(" = ");
    builder.push_bind(id);
    builder
}

pub fn count_records(table: &str) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM ");
    builder.push(quote_ident(table));
    builder
}

/// One page ordered by the requested column, ties broken by `id` ascending.
pub fn select_page(table: &str, query: &RecordQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT ");
    builder.push(RECORD_PROJECTION);
    builder.push(" FROM ");
    builder.push(quote_ident(table));
    builder.push(" AS t ORDER BY t.");
    builder.push(quote_ident(&query.sort_column));
    builder.push(" ");
    builder.push(query.direction.sql());
    if query.sort_column != "id" {
        builder.push(", t.");
        builder.push(quote_ident("id"));
        builder.push(" ASC");
    }
    builder.push(" LIMIT ");
    builder.push_bind(i64::from(query.limit));
    builder.push(" OFFSET ");
    builder.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
    builder
}
