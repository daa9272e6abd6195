use super::types::{FieldDefinition, FieldType};
use super::{EngineError, Result};
use bigdecimal::{BigDecimal, FromPrimitive, RoundingMode};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::str::FromStr;

/// A typed value ready to be bound to a statement parameter.
///
/// Produced from untrusted JSON by [`Value::from_json`], which is where every
/// payload value is checked against its field definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Number(BigDecimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Text(_) => "TEXT",
            Self::Number(_) => "NUMERIC",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMPTZ",
            Self::Json(_) => "JSONB",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a payload value for `field`, enforcing type and constraints.
    /// JSON `null` maps to [`Value::Null`]; required-ness is checked by the caller.
    pub fn from_json(field: &FieldDefinition, raw: &serde_json::Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }

        let value = match field.field_type {
            FieldType::Text => match raw {
                serde_json::Value::String(s) => Value::Text(s.clone()),
                _ => return Err(EngineError::invalid_value(&field.name, "expected a string")),
            },
            FieldType::Relation => match raw {
                serde_json::Value::String(s) => Value::Text(s.clone()),
                serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => {
                    Value::Text(n.to_string())
                }
                _ => {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        "expected a string or integer reference",
                    ));
                }
            },
            FieldType::Number => Value::Number(parse_decimal(field, raw)?),
            FieldType::Currency => {
                Value::Number(fit_decimal(field, parse_decimal(field, raw)?, 19, 2)?)
            }
            FieldType::Weight => {
                Value::Number(fit_decimal(field, parse_decimal(field, raw)?, 19, 3)?)
            }
            FieldType::Boolean => match raw {
                serde_json::Value::Bool(b) => Value::Boolean(*b),
                _ => return Err(EngineError::invalid_value(&field.name, "expected a boolean")),
            },
            FieldType::Datetime => match raw {
                serde_json::Value::String(s) => Value::Timestamp(parse_timestamp(field, s)?),
                _ => {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        "expected an RFC 3339 date-time string",
                    ));
                }
            },
            FieldType::Object => match raw {
                serde_json::Value::Object(_) => Value::Json(raw.clone()),
                _ => return Err(EngineError::invalid_value(&field.name, "expected an object")),
            },
            FieldType::Array => match raw {
                serde_json::Value::Array(_) => Value::Json(raw.clone()),
                _ => return Err(EngineError::invalid_value(&field.name, "expected an array")),
            },
        };

        check_constraints(field, &value)?;
        Ok(value)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => decimal_to_json(n),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
            Self::Json(v) => v.clone(),
        }
    }

    /// Total order used for in-process sorting. NULL sorts after every value
    /// (the storage engine's default for ascending order); values of different
    /// kinds fall back to comparing their type names.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Greater,
            (_, Self::Null) => Ordering::Less,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => a.type_name().cmp(b.type_name()),
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Largest number of digits before the decimal point a NUMERIC column holds.
const NUMERIC_MAX_INTEGER_DIGITS: i64 = 131_072;
/// Largest number of digits after the decimal point a NUMERIC column holds.
const NUMERIC_MAX_SCALE: i64 = 16_383;

/// Renders a decimal as a JSON number carrying its exact digits and scale;
/// falls back to a string if the text is not a valid JSON number.
pub fn decimal_to_json(n: &BigDecimal) -> serde_json::Value {
    let text = n.to_string();
    match serde_json::Number::from_str(&text) {
        Ok(number) => serde_json::Value::Number(number),
        Err(_) => serde_json::Value::String(text),
    }
}

/// Digits before the decimal point; values below one count as zero or less.
fn integer_digits(value: &BigDecimal) -> i64 {
    let (_, scale) = value.as_bigint_and_exponent();
    i64::try_from(value.digits()).unwrap_or(i64::MAX) - scale
}

fn parse_decimal(field: &FieldDefinition, raw: &serde_json::Value) -> Result<BigDecimal> {
    let text = match raw {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return Err(EngineError::invalid_value(&field.name, "expected a number")),
    };
    let value = BigDecimal::from_str(&text)
        .map_err(|_| EngineError::invalid_value(&field.name, format!("'{text}' is not a number")))?;

    // Checked on the parsed form, before anything rescales the digits.
    let (_, scale) = value.as_bigint_and_exponent();
    if integer_digits(&value) > NUMERIC_MAX_INTEGER_DIGITS {
        return Err(EngineError::invalid_value(&field.name, "number is too large"));
    }
    if scale > NUMERIC_MAX_SCALE {
        return Err(EngineError::invalid_value(
            &field.name,
            format!("more than {NUMERIC_MAX_SCALE} fractional digits"),
        ));
    }
    Ok(value)
}

/// Rounds to `scale` fractional digits and checks the result fits
/// `NUMERIC(precision, scale)`.
fn fit_decimal(
    field: &FieldDefinition,
    value: BigDecimal,
    precision: u64,
    scale: i64,
) -> Result<BigDecimal> {
    let max_integer_digits = precision as i64 - scale;
    let too_large = || {
        EngineError::invalid_value(
            &field.name,
            format!("value exceeds {max_integer_digits} integer digits"),
        )
    };
    // Rounding adds at most one integer digit; the exact check follows.
    if integer_digits(&value) > max_integer_digits {
        return Err(too_large());
    }

    let rounded = value.with_scale_round(scale, RoundingMode::HalfUp);
    let limit = BigDecimal::from_str(&format!("1E{max_integer_digits}"))
        .map_err(|err| EngineError::Internal(format!("decimal limit: {err}")))?;
    if rounded.abs() >= limit {
        return Err(too_large());
    }
    Ok(rounded)
}

fn parse_timestamp(field: &FieldDefinition, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(EngineError::invalid_value(
        &field.name,
        format!("'{raw}' is not an RFC 3339 date-time or YYYY-MM-DD date"),
    ))
}

fn check_constraints(field: &FieldDefinition, value: &Value) -> Result<()> {
    let c = &field.validation;
    match value {
        Value::Text(s) => {
            let len = s.chars().count() as u64;
            if let Some(max) = c.max_length {
                if len > u64::from(max) {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        format!("longer than {max} characters"),
                    ));
                }
            }
            if let Some(min) = c.min_length {
                if len < u64::from(min) {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        format!("shorter than {min} characters"),
                    ));
                }
            }
        }
        Value::Number(n) => {
            if let Some(min) = c.min.and_then(BigDecimal::from_f64) {
                if n < &min {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        format!("less than minimum {min}"),
                    ));
                }
            }
            if let Some(max) = c.max.and_then(BigDecimal::from_f64) {
                if n > &max {
                    return Err(EngineError::invalid_value(
                        &field.name,
                        format!("greater than maximum {max}"),
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(field_type: FieldType) -> FieldDefinition {
        FieldDefinition::new("f", field_type)
    }

    #[test]
    fn test_text_requires_string() {
        assert_eq!(
            Value::from_json(&field(FieldType::Text), &json!("Ada")).unwrap(),
            Value::Text("Ada".into())
        );
        let err = Value::from_json(&field(FieldType::Text), &json!(42)).unwrap_err();
        assert_eq!(err.code(), "INVALID_FIELD_VALUE");
    }

    #[test]
    fn test_text_length_constraints() {
        let f = FieldDefinition::new("code", FieldType::Text).max_length(3);
        assert!(Value::from_json(&f, &json!("abc")).is_ok());
        assert!(Value::from_json(&f, &json!("abcd")).is_err());
        // multi-byte characters count once
        assert!(Value::from_json(&f, &json!("äöü")).is_ok());
    }

    #[test]
    fn test_numbers_accept_json_numbers_and_numeric_strings() {
        let f = field(FieldType::Number);
        assert_eq!(
            Value::from_json(&f, &json!(30)).unwrap(),
            Value::Number(BigDecimal::from(30))
        );
        assert_eq!(
            Value::from_json(&f, &json!("12.5")).unwrap(),
            Value::Number(BigDecimal::from_str("12.5").unwrap())
        );
        assert!(Value::from_json(&f, &json!("twelve")).is_err());
        assert!(Value::from_json(&f, &json!(true)).is_err());
    }

    #[test]
    fn test_number_range() {
        let f = FieldDefinition::new("age", FieldType::Number).range(Some(0.0), Some(150.0));
        assert!(Value::from_json(&f, &json!(30)).is_ok());
        assert!(Value::from_json(&f, &json!(-1)).is_err());
        assert!(Value::from_json(&f, &json!(151)).is_err());
    }

    #[test]
    fn test_currency_rounds_to_two_places() {
        let v = Value::from_json(&field(FieldType::Currency), &json!(10.005)).unwrap();
        assert_eq!(v, Value::Number(BigDecimal::from_str("10.01").unwrap()));
        let w = Value::from_json(&field(FieldType::Weight), &json!("1.23456")).unwrap();
        assert_eq!(w, Value::Number(BigDecimal::from_str("1.235").unwrap()));
    }

    #[test]
    fn test_currency_overflow_is_rejected() {
        let huge = json!("123456789012345678.00");
        assert!(Value::from_json(&field(FieldType::Currency), &huge).is_err());
    }

    #[test]
    fn test_datetime_parsing() {
        let f = field(FieldType::Datetime);
        let v = Value::from_json(&f, &json!("2024-03-01T10:00:00+02:00")).unwrap();
        match v {
            Value::Timestamp(ts) => assert_eq!(format_timestamp(&ts), "2024-03-01T08:00:00.000000Z"),
            other => panic!("expected timestamp, got {other:?}"),
        }
        assert!(Value::from_json(&f, &json!("2024-03-01")).is_ok());
        assert!(Value::from_json(&f, &json!("yesterday")).is_err());
    }

    #[test]
    fn test_structured_types() {
        assert!(Value::from_json(&field(FieldType::Object), &json!({"a": 1})).is_ok());
        assert!(Value::from_json(&field(FieldType::Object), &json!([1])).is_err());
        assert!(Value::from_json(&field(FieldType::Array), &json!([1, 2])).is_ok());
        assert!(Value::from_json(&field(FieldType::Array), &json!("x")).is_err());
    }

    #[test]
    fn test_relation_accepts_integer_ids() {
        let v = Value::from_json(&field(FieldType::Relation), &json!(17)).unwrap();
        assert_eq!(v, Value::Text("17".into()));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(
            Value::from_json(&field(FieldType::Number), &json!(null)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_compare_puts_null_last() {
        let one = Value::Number(BigDecimal::from(1));
        assert_eq!(Value::Null.compare(&one), Ordering::Greater);
        assert_eq!(one.compare(&Value::Null), Ordering::Less);
        assert_eq!(
            Value::Text("a".into()).compare(&Value::Text("b".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_decimal_to_json_keeps_every_digit() {
        assert_eq!(decimal_to_json(&BigDecimal::from(30)), json!(30));
        assert_eq!(
            decimal_to_json(&BigDecimal::from_str("12.50").unwrap()).to_string(),
            "12.50"
        );
        let total = BigDecimal::from_str("12345678901234567.89").unwrap();
        assert_eq!(decimal_to_json(&total).to_string(), "12345678901234567.89");
    }

    #[test]
    fn test_wide_decimals_survive_coercion() {
        let currency = field(FieldType::Currency);
        let raw: serde_json::Value = serde_json::from_str("12345678901234567.89").unwrap();
        let value = Value::from_json(&currency, &raw).unwrap();
        assert_eq!(value.to_json().to_string(), "12345678901234567.89");

        let number = field(FieldType::Number);
        let value = Value::from_json(&number, &json!("0.12345678901234567891")).unwrap();
        assert_eq!(value.to_json().to_string(), "0.12345678901234567891");
    }

    #[test]
    fn test_oversized_numbers_are_rejected_before_rounding() {
        let currency = field(FieldType::Currency);
        let started = std::time::Instant::now();
        for raw in ["1e10000", "1e1000000", "1e100000000", "-1e100000000"] {
            let err = Value::from_json(&currency, &json!(raw)).unwrap_err();
            assert_eq!(err.code(), "INVALID_FIELD_VALUE", "{raw}");
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        let number = field(FieldType::Number);
        assert!(Value::from_json(&number, &json!("1e200000")).is_err());
        assert!(Value::from_json(&number, &json!("1e-20000")).is_err());
        assert!(Value::from_json(&number, &json!("1e100")).is_ok());
    }
}
