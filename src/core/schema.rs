//! Canonical column names and value coercions shared by the cleaning engine
//! and the raw uploader. Both must go through this module so the two paths
//! never disagree on what a column is called or what a flag token means.

use crate::utils::error::{EtlError, Result};

/// Bump when an alias or coercion rule changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Applied after trimming, lower-casing and replacing spaces/hyphens.
pub const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("patientid", "patient_id"),
    ("appointmentid", "appointment_id"),
    ("scheduledday", "scheduled_day"),
    ("appointmentday", "appointment_day"),
    ("hipertension", "hypertension"),
    ("handcap", "handicap"),
    ("neighborhood", "neighbourhood"),
];

/// Numeric-truthy flag columns.
pub const FLAG_COLUMNS: &[&str] = &[
    "scholarship",
    "hypertension",
    "diabetes",
    "alcoholism",
    "sms_received",
];

pub const NO_SHOW_COLUMN: &str = "no_show";

pub fn normalize_column_name(name: &str) -> String {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

pub fn normalize_columns<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    columns
        .iter()
        .map(|c| normalize_column_name(c.as_ref()))
        .collect()
}

/// Nonzero numbers are true, zero is false; `true`/`false` literals pass
/// through in any case.
pub fn coerce_flag(column: &str, token: &str) -> Result<bool> {
    let token = token.trim();

    if let Some(b) = parse_bool_literal(token) {
        return Ok(b);
    }
    if let Ok(n) = token.parse::<i64>() {
        return Ok(n != 0);
    }
    match token.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n != 0.0),
        _ => Err(EtlError::schema(format!(
            "column '{}' holds unrecognized flag token '{}'",
            column, token
        ))),
    }
}

/// `Yes`/`1`/`true` → true, `No`/`0`/`false` → false, anything else is a
/// schema violation.
pub fn coerce_no_show(token: &str) -> Result<bool> {
    let token = token.trim();

    match token {
        "Yes" | "1" => Ok(true),
        "No" | "0" => Ok(false),
        other => parse_bool_literal(other).ok_or_else(|| {
            EtlError::schema(format!(
                "column '{}' holds unrecognized token '{}'",
                NO_SHOW_COLUMN, other
            ))
        }),
    }
}

fn parse_bool_literal(token: &str) -> Option<bool> {
    if token.eq_ignore_ascii_case("true") {
        Some(true)
    } else if token.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Integers, or whole-valued decimals such as `56.0` written by spreadsheet exports.
pub fn parse_int(column: &str, token: &str) -> Result<i64> {
    let token = token.trim();

    if let Ok(n) = token.parse::<i64>() {
        return Ok(n);
    }
    match token.parse::<f64>() {
        Ok(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(n as i64),
        _ => Err(EtlError::schema(format!(
            "column '{}' holds non-integer value '{}'",
            column, token
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("PatientId"), "patient_id");
        assert_eq!(normalize_column_name(" AppointmentID "), "appointment_id");
        assert_eq!(normalize_column_name("ScheduledDay"), "scheduled_day");
        assert_eq!(normalize_column_name("Hipertension"), "hypertension");
        assert_eq!(normalize_column_name("Handcap"), "handicap");
        assert_eq!(normalize_column_name("No-show"), "no_show");
        assert_eq!(normalize_column_name("SMS_received"), "sms_received");
        assert_eq!(normalize_column_name("patient-id"), "patient_id");
        assert_eq!(normalize_column_name("Neighbourhood"), "neighbourhood");
        assert_eq!(normalize_column_name("Neighborhood"), "neighbourhood");
        assert_eq!(normalize_column_name("Some Extra"), "some_extra");
    }

    #[test]
    fn test_normalize_columns_is_idempotent() {
        let raw = [
            "PatientId",
            "AppointmentID",
            "Gender",
            "ScheduledDay",
            "AppointmentDay",
            "Age",
            "Neighbourhood",
            "Scholarship",
            "Hipertension",
            "Diabetes",
            "Alcoholism",
            "Handcap",
            "SMS_received",
            "No-show",
        ];
        let once = normalize_columns(&raw);
        let twice = normalize_columns(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_aliases_map_to_fixed_points() {
        for (_, canonical) in COLUMN_ALIASES {
            assert_eq!(normalize_column_name(canonical), *canonical);
        }
    }

    #[test]
    fn test_coerce_flag() {
        assert!(!coerce_flag("diabetes", "0").unwrap());
        assert!(coerce_flag("diabetes", "1").unwrap());
        assert!(coerce_flag("diabetes", "2").unwrap());
        assert!(!coerce_flag("diabetes", "0.0").unwrap());
        assert!(coerce_flag("diabetes", "True").unwrap());
        assert!(!coerce_flag("diabetes", " false ").unwrap());
        assert!(matches!(
            coerce_flag("diabetes", "yes please"),
            Err(EtlError::SchemaViolation { .. })
        ));
        assert!(coerce_flag("diabetes", "").is_err());
    }

    #[test]
    fn test_coerce_no_show() {
        for token in ["Yes", "1", "True", "true"] {
            assert!(coerce_no_show(token).unwrap(), "{} should be true", token);
        }
        for token in ["No", "0", "False", "false"] {
            assert!(!coerce_no_show(token).unwrap(), "{} should be false", token);
        }

        let err = coerce_no_show("maybe").unwrap_err();
        assert!(matches!(err, EtlError::SchemaViolation { .. }));
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("age", "56").unwrap(), 56);
        assert_eq!(parse_int("age", "-5").unwrap(), -5);
        assert_eq!(parse_int("age", "56.0").unwrap(), 56);
        assert!(parse_int("age", "56.5").is_err());
        assert!(parse_int("age", "fifty").is_err());
    }
}
