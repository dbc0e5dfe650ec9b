//! Field type coercion
//!
//! **[RCS-TYP-010]** Validates and converts an untyped external value against
//! a declared property type. Coercion is checked per row during a source
//! scan; a single failing value degrades the field's mapping instead of
//! aborting the scan (the adapter nulls the mapping out going forward).

use crate::models::{PropertyKind, PropertyType, PropertyValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// Source-declared true/false value pair for boolean coercion
///
/// Booleans are only derivable when the source declares the two values (a
/// two-option choice question, or the TRUE/FALSE pair of a spreadsheet
/// checkbox column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanPair {
    pub true_value: String,
    pub false_value: String,
}

impl BooleanPair {
    pub fn new(true_value: impl Into<String>, false_value: impl Into<String>) -> Self {
        Self {
            true_value: true_value.into(),
            false_value: false_value.into(),
        }
    }

    /// The implicit pair presented by spreadsheet checkbox columns
    pub fn spreadsheet_default() -> Self {
        Self::new("TRUE", "FALSE")
    }
}

/// Why a raw value failed coercion
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("required value is missing")]
    MissingRequired,

    #[error("not a number: {0}")]
    InvalidNumber(String),

    #[error("unparsable date: {0}")]
    InvalidDate(String),

    #[error("boolean field has no declared true/false pair")]
    NoBooleanPair,

    #[error("value matches neither boolean option: {0}")]
    UnrecognizedBoolean(String),
}

/// Coerce one raw external value against a declared property type
///
/// `None` or an empty/whitespace string counts as absent: valid only for
/// optional types. Numbers must parse fully; no partial numeric prefixes.
pub fn coerce(
    raw: Option<&str>,
    ty: PropertyType,
    bool_pair: Option<&BooleanPair>,
) -> Result<PropertyValue, CoercionError> {
    let trimmed = raw.map(str::trim).filter(|s| !s.is_empty());

    let Some(value) = trimmed else {
        return if ty.required {
            Err(CoercionError::MissingRequired)
        } else {
            Ok(PropertyValue::Absent)
        };
    };

    match ty.kind {
        PropertyKind::String => Ok(PropertyValue::Text(value.to_string())),

        PropertyKind::Number => value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(PropertyValue::Number)
            .ok_or_else(|| CoercionError::InvalidNumber(value.to_string())),

        PropertyKind::Boolean => {
            let pair = bool_pair.ok_or(CoercionError::NoBooleanPair)?;
            if value.eq_ignore_ascii_case(&pair.true_value) {
                Ok(PropertyValue::Flag(true))
            } else if value.eq_ignore_ascii_case(&pair.false_value) {
                Ok(PropertyValue::Flag(false))
            } else {
                Err(CoercionError::UnrecognizedBoolean(value.to_string()))
            }
        }

        PropertyKind::Date => parse_flexible_date(value)
            .map(PropertyValue::Date)
            .ok_or_else(|| CoercionError::InvalidDate(value.to_string())),
    }
}

/// Tolerant calendar date parser
///
/// Accepts RFC 3339 plus the common US and ISO calendar spellings external
/// spreadsheets and forms produce. Date-only values land at UTC midnight.
pub fn parse_flexible_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%m/%d/%Y",
        "%m/%d/%y",
        "%m-%d-%Y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
    ];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }

    None
}
