//! Primitive field parsers over loosely-typed JSON input.
//!
//! Every parser distinguishes three outcomes: the field was absent, the field
//! was present and valid, or the field was present and malformed. Callers may
//! substitute a default for an absent field; a malformed field always fails
//! the whole operation.

use chrono::{NaiveDate, NaiveTime};
use serde_json::Value as JsonValue;

/// A caller-supplied field violated a business rule.
///
/// Renders as `"{field} {rule}"`, e.g.
/// `records[3].points_required must be a positive integer`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {rule}")]
pub struct ValidationError {
    /// The offending field, as the caller named it (batch entries are
    /// prefixed with their index, e.g. `records[3].points_required`).
    pub field: String,
    /// The violated rule.
    pub rule: String,
}

impl ValidationError {
    pub(crate) fn new(field: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
        }
    }
}

/// The request input could not be read as structured data at all, before any
/// field-level validation could begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("input must be a JSON object")]
    ExpectedObject,

    #[error("records must be a JSON array")]
    ExpectedArray,
}

/// Three-way outcome of parsing a single field.
///
/// `Absent` and `Invalid` are deliberately distinct: an absent filter means
/// "I didn't filter on this" and may take a default, while a present but
/// malformed value must fail the operation rather than be silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    /// The field was not present (or was JSON `null`).
    Absent,
    /// The field was present and valid.
    Valid(T),
    /// The field was present but malformed.
    Invalid(ValidationError),
}

impl<T> Parsed<T> {
    /// The field must be present and valid.
    pub fn required(self, field: &str) -> Result<T, ValidationError> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Absent => Err(ValidationError::new(field, "is required")),
            Self::Invalid(err) => Err(err),
        }
    }

    /// The field may be absent; a malformed value still fails.
    pub fn optional(self) -> Result<Option<T>, ValidationError> {
        match self {
            Self::Valid(value) => Ok(Some(value)),
            Self::Absent => Ok(None),
            Self::Invalid(err) => Err(err),
        }
    }

    /// The field may be absent, in which case `default` applies. A malformed
    /// value still fails, it is never replaced by the default.
    pub fn or(self, default: T) -> Result<T, ValidationError> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Absent => Ok(default),
            Self::Invalid(err) => Err(err),
        }
    }

    /// Chain a refinement onto a valid value.
    pub fn and_then<U>(self, refine: impl FnOnce(T) -> Parsed<U>) -> Parsed<U> {
        match self {
            Self::Valid(value) => refine(value),
            Self::Absent => Parsed::Absent,
            Self::Invalid(err) => Parsed::Invalid(err),
        }
    }
}

/// A view over the fields of a JSON object.
///
/// JSON `null` values are treated the same as missing keys.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields<'a>(&'a serde_json::Map<String, JsonValue>);

impl<'a> Fields<'a> {
    pub(crate) fn new(object: &'a serde_json::Map<String, JsonValue>) -> Self {
        Self(object)
    }

    pub(crate) fn from_object(input: &'a JsonValue) -> Result<Self, ParseError> {
        input
            .as_object()
            .map(Self)
            .ok_or(ParseError::ExpectedObject)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a JsonValue> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    pub(crate) fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

pub(crate) fn string(value: Option<&JsonValue>, field: &str) -> Parsed<String> {
    match value {
        None | Some(JsonValue::Null) => Parsed::Absent,
        Some(JsonValue::String(s)) => Parsed::Valid(s.clone()),
        Some(_) => Parsed::Invalid(ValidationError::new(field, "must be a string")),
    }
}

pub(crate) fn non_empty_string(value: Option<&JsonValue>, field: &str) -> Parsed<String> {
    string(value, field).and_then(|s| {
        if s.is_empty() {
            Parsed::Invalid(ValidationError::new(field, "must be a non-empty string"))
        } else {
            Parsed::Valid(s)
        }
    })
}

/// Exactly 3 uppercase Latin letters.
pub(crate) fn iata_code(value: Option<&JsonValue>, field: &str) -> Parsed<String> {
    string(value, field).and_then(|s| {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase()) {
            Parsed::Valid(s)
        } else {
            Parsed::Invalid(ValidationError::new(
                field,
                "must be a 3-letter uppercase IATA code",
            ))
        }
    })
}

/// Calendar date in canonical `YYYY-MM-DD` form. Impossible dates such as
/// `2024-02-30` are rejected by chrono's calendar arithmetic.
pub(crate) fn iso_date(value: Option<&JsonValue>, field: &str) -> Parsed<NaiveDate> {
    string(value, field).and_then(|s| {
        let bytes = s.as_bytes();
        let canonical = bytes.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-';
        match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
            Ok(date) if canonical => Parsed::Valid(date),
            _ => Parsed::Invalid(ValidationError::new(
                field,
                "must be a valid ISO date (YYYY-MM-DD)",
            )),
        }
    })
}

/// Time of day in canonical `HH:MM` form, hours 0-23, minutes 0-59.
pub(crate) fn time_of_day(value: Option<&JsonValue>, field: &str) -> Parsed<NaiveTime> {
    string(value, field).and_then(|s| {
        let bytes = s.as_bytes();
        let canonical = bytes.len() == 5 && bytes[2] == b':';
        match NaiveTime::parse_from_str(&s, "%H:%M") {
            Ok(time) if canonical => Parsed::Valid(time),
            _ => Parsed::Invalid(ValidationError::new(field, "must be a valid time (HH:MM)")),
        }
    })
}

/// Integral numeric value, accepting JSON numbers and numeric strings.
fn int_value(value: &JsonValue) -> Option<i64> {
    fn integral_f64(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
            .then_some(f as i64)
    }

    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_f64)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
        }
        _ => None,
    }
}

pub(crate) fn positive_int(value: Option<&JsonValue>, field: &str) -> Parsed<i64> {
    match value {
        None | Some(JsonValue::Null) => Parsed::Absent,
        Some(value) => match int_value(value) {
            Some(n) if n > 0 => Parsed::Valid(n),
            _ => Parsed::Invalid(ValidationError::new(field, "must be a positive integer")),
        },
    }
}

pub(crate) fn non_negative_int(value: Option<&JsonValue>, field: &str) -> Parsed<i64> {
    match value {
        None | Some(JsonValue::Null) => Parsed::Absent,
        Some(value) => match int_value(value) {
            Some(n) if n >= 0 => Parsed::Valid(n),
            _ => Parsed::Invalid(ValidationError::new(field, "must be a non-negative integer")),
        },
    }
}

/// Non-negative number rounded to 2 decimal places, for monetary amounts.
pub(crate) fn money(value: Option<&JsonValue>, field: &str) -> Parsed<f64> {
    let number = match value {
        None | Some(JsonValue::Null) => return Parsed::Absent,
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match number {
        Some(x) if x.is_finite() && x >= 0.0 => Parsed::Valid(round_2dp(x)),
        _ => Parsed::Invalid(ValidationError::new(field, "must be a non-negative number")),
    }
}

/// JSON booleans, plus `"true"`/`"false"` (any case) for query-string
/// surfaces. Any other token is invalid, never falsy-coerced.
pub(crate) fn boolean(value: Option<&JsonValue>, field: &str) -> Parsed<bool> {
    match value {
        None | Some(JsonValue::Null) => Parsed::Absent,
        Some(JsonValue::Bool(b)) => Parsed::Valid(*b),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("true") => Parsed::Valid(true),
        Some(JsonValue::String(s)) if s.eq_ignore_ascii_case("false") => Parsed::Valid(false),
        Some(_) => Parsed::Invalid(ValidationError::new(field, "must be a boolean")),
    }
}

pub(crate) fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_and_invalid_are_distinct() {
        assert_eq!(string(None, "tier"), Parsed::Absent);
        assert_eq!(string(Some(&JsonValue::Null), "tier"), Parsed::Absent);

        let invalid = string(Some(&json!(7)), "tier");
        assert_eq!(
            invalid,
            Parsed::Invalid(ValidationError::new("tier", "must be a string"))
        );
    }

    #[test]
    fn invalid_never_takes_the_default() {
        let err = boolean(Some(&json!("yes")), "available")
            .or(true)
            .unwrap_err();
        assert_eq!(err.to_string(), "available must be a boolean");
    }

    #[test]
    fn iata_codes_are_three_uppercase_letters() {
        assert_eq!(
            iata_code(Some(&json!("AKL")), "destination"),
            Parsed::Valid("AKL".to_owned())
        );
        for bad in ["akl", "AK", "AKLX", "A1L", ""] {
            assert!(matches!(
                iata_code(Some(&json!(bad)), "destination"),
                Parsed::Invalid(_)
            ));
        }
    }

    #[test]
    fn iso_dates_must_be_real_calendar_dates() {
        assert_eq!(
            iso_date(Some(&json!("2024-02-29")), "date"),
            Parsed::Valid(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        for bad in ["2024-02-30", "2024-2-3", "24-02-03", "2024/02/03", "today"] {
            assert!(matches!(iso_date(Some(&json!(bad)), "date"), Parsed::Invalid(_)));
        }
    }

    #[test]
    fn times_are_canonical_hh_mm() {
        assert_eq!(
            time_of_day(Some(&json!("23:59")), "departure_time"),
            Parsed::Valid(NaiveTime::from_hms_opt(23, 59, 0).unwrap())
        );
        for bad in ["24:00", "9:30", "09:60", "09:30:00"] {
            assert!(matches!(
                time_of_day(Some(&json!(bad)), "departure_time"),
                Parsed::Invalid(_)
            ));
        }
    }

    #[test]
    fn integers_accept_numeric_strings() {
        assert_eq!(positive_int(Some(&json!("45000")), "points"), Parsed::Valid(45000));
        assert_eq!(positive_int(Some(&json!(45000)), "points"), Parsed::Valid(45000));
        assert_eq!(non_negative_int(Some(&json!(0)), "offset"), Parsed::Valid(0));

        for bad in [json!(0), json!(-1), json!(1.5), json!("x")] {
            assert!(matches!(positive_int(Some(&bad), "points"), Parsed::Invalid(_)));
        }
        assert!(matches!(
            non_negative_int(Some(&json!(-1)), "offset"),
            Parsed::Invalid(_)
        ));
    }

    #[test]
    fn money_rounds_half_away_from_zero_at_2dp() {
        assert_eq!(money(Some(&json!(123.456)), "taxes"), Parsed::Valid(123.46));
        assert_eq!(money(Some(&json!(123.454)), "taxes"), Parsed::Valid(123.45));
        assert_eq!(money(Some(&json!("88.5")), "taxes"), Parsed::Valid(88.5));
        assert!(matches!(money(Some(&json!(-0.01)), "taxes"), Parsed::Invalid(_)));
    }

    #[test]
    fn booleans_are_strict() {
        assert_eq!(boolean(Some(&json!(true)), "available"), Parsed::Valid(true));
        assert_eq!(boolean(Some(&json!("FALSE")), "available"), Parsed::Valid(false));
        for bad in [json!(1), json!("yes"), json!("0")] {
            assert!(matches!(boolean(Some(&bad), "available"), Parsed::Invalid(_)));
        }
    }

    #[test]
    fn null_fields_read_as_absent() {
        let object = json!({ "cabin": null });
        let fields = Fields::from_object(&object).unwrap();
        assert!(fields.get("cabin").is_none());
        assert!(!fields.has("cabin"));
    }
}
