//! Identifier grammar and the physical naming scheme.
//!
//! Logical names typed by tenants never reach a SQL statement directly: they
//! are checked against [`IDENTIFIER`] at the metadata boundary, mapped through
//! [`physical_table_name`] / [`column_name`], and quoted again with
//! [`quote_ident`] at every call site that renders SQL.

use super::{EngineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Longest identifier the storage engine keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Columns every physical table carries besides the declared fields.
pub const SYSTEM_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Checks a tenant-supplied table or field name against the identifier grammar.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::Validation(format!("{kind} name cannot be empty")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(EngineError::Validation(format!(
            "{kind} name '{name}' is too long (max {MAX_IDENTIFIER_LEN} characters)"
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(EngineError::Validation(format!(
            "{kind} name '{name}' is invalid (allowed: [A-Za-z_][A-Za-z0-9_]*)"
        )));
    }
    Ok(())
}

/// Field names that would shadow system columns or catalog objects.
pub fn is_reserved_field_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SYSTEM_COLUMNS.contains(&lower.as_str()) || lower.starts_with("pg_")
}

pub fn is_system_column(name: &str) -> bool {
    SYSTEM_COLUMNS.contains(&name)
}

/// Physical column backing a field. Field names are unique case-insensitively,
/// so lowercasing is a bijection within a table.
pub fn column_name(field_name: &str) -> String {
    field_name.to_ascii_lowercase()
}

/// Replaces every character outside `[A-Za-z0-9]` with `_` and lowercases.
fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Deterministic physical table name for `(project, logical table name)`.
///
/// Format: `t_<project>_<table>`, truncated with a digest suffix when it would
/// exceed [`MAX_IDENTIFIER_LEN`].
pub fn physical_table_name(project_id: Uuid, table_name: &str) -> String {
    let full = format!(
        "t_{}_{}",
        sanitize(&project_id.to_string()),
        sanitize(table_name)
    );
    if full.len() <= MAX_IDENTIFIER_LEN {
        return full;
    }

    let digest = Sha256::digest(full.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{}_{}", &full[..MAX_IDENTIFIER_LEN - suffix.len() - 1], suffix)
}

/// Name of the supporting index on `created_at`.
pub fn created_at_index_name(physical_table: &str) -> String {
    let name = format!("{physical_table}_created_at_idx");
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }
    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("idx_{suffix}_created_at")
}

/// Quotes an identifier the way the storage engine expects: wrapped in double
/// quotes, embedded quotes doubled. Applied even to names that already passed
/// [`validate_identifier`].
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_grammar() {
        assert!(validate_identifier("Table", "patients").is_ok());
        assert!(validate_identifier("Table", "_Patients_2").is_ok());
        assert!(validate_identifier("Table", "").is_err());
        assert!(validate_identifier("Table", "2fast").is_err());
        assert!(validate_identifier("Table", "drop table x;--").is_err());
        assert!(validate_identifier("Table", "naïve").is_err());
        assert!(validate_identifier("Table", &"a".repeat(64)).is_err());
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_field_name("id"));
        assert!(is_reserved_field_name("Created_At"));
        assert!(is_reserved_field_name("pg_class"));
        assert!(!is_reserved_field_name("identity"));
    }

    #[test]
    fn test_physical_name_is_deterministic_and_safe() {
        let project = Uuid::parse_str("0b9d6c2e-5f7a-4c1e-9a0b-3f4e5d6c7b8a").unwrap();
        let name = physical_table_name(project, "Patients");
        assert_eq!(name, "t_0b9d6c2e_5f7a_4c1e_9a0b_3f4e5d6c7b8a_patients");
        assert_eq!(name, physical_table_name(project, "patients"));
        assert!(IDENTIFIER.is_match(&name));
    }

    #[test]
    fn test_long_physical_names_are_truncated_with_digest() {
        let project = Uuid::new_v4();
        let a = physical_table_name(project, &format!("{}_a", "x".repeat(40)));
        let b = physical_table_name(project, &format!("{}_b", "x".repeat(40)));
        assert_eq!(a.len(), MAX_IDENTIFIER_LEN);
        assert_eq!(b.len(), MAX_IDENTIFIER_LEN);
        assert_ne!(a, b);
        assert!(IDENTIFIER.is_match(&a));
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_index_name_fits() {
        let long = "t".repeat(63);
        assert!(created_at_index_name(&long).len() <= MAX_IDENTIFIER_LEN);
        assert_eq!(created_at_index_name("t_x"), "t_x_created_at_idx");
    }
}
