//! Filter normalization for the search, stats, delete, and discovery
//! operations.
//!
//! Each operation has its own filter struct with a `from_json` normalizer.
//! Normalizers compose the primitive parsers in [`crate::parse`] and enforce
//! the cross-field rules (date shape exclusivity, range ordering, pagination
//! bounds). The first violated rule aborts the whole normalization.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use crate::{
    DEFAULT_ORIGIN, DEFAULT_SEARCH_LIMIT, Error, MAX_SEARCH_LIMIT,
    parse::{self, Fields, Parsed, ValidationError},
};

/// Travel cabin class.
///
/// Stored as a `TEXT` column. Unlike free-form tiers, cabins are a closed
/// set; an unrecognized value is rejected at validation time and a corrupt
/// stored value is a decode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cabin {
    Economy,
    Business,
    First,
}

impl Cabin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Business => "business",
            Self::First => "first",
        }
    }

    /// Parse a cabin name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            s if s.eq_ignore_ascii_case("economy") => Some(Self::Economy),
            s if s.eq_ignore_ascii_case("business") => Some(Self::Business),
            s if s.eq_ignore_ascii_case("first") => Some(Self::First),
            _ => None,
        }
    }

    pub(crate) fn from_value(value: Option<&JsonValue>, field: &str) -> Parsed<Self> {
        parse::string(value, field).and_then(|s| match Self::parse(&s) {
            Some(cabin) => Parsed::Valid(cabin),
            None => Parsed::Invalid(ValidationError::new(
                field,
                "must be one of economy, business, first",
            )),
        })
    }
}

impl std::fmt::Display for Cabin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for Cabin {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for Cabin {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("TEXT")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Cabin {
    fn decode(
        value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let value: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
        Self::parse(value).ok_or_else(|| format!("invalid cabin: {value}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for Cabin {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        sqlx::Encode::<sqlx::Postgres>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Hop-count classification of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteType {
    Direct,
    OneStop,
    TwoStop,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::OneStop => "1-stop",
            Self::TwoStop => "2-stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            s if s.eq_ignore_ascii_case("direct") => Some(Self::Direct),
            s if s.eq_ignore_ascii_case("1-stop") => Some(Self::OneStop),
            s if s.eq_ignore_ascii_case("2-stop") => Some(Self::TwoStop),
            _ => None,
        }
    }

    pub(crate) fn from_value(value: Option<&JsonValue>, field: &str) -> Parsed<Self> {
        parse::string(value, field).and_then(|s| match Self::parse(&s) {
            Some(route_type) => Parsed::Valid(route_type),
            None => Parsed::Invalid(ValidationError::new(
                field,
                "must be one of direct, 1-stop, 2-stop",
            )),
        })
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for RouteType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for RouteType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("TEXT")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for RouteType {
    fn decode(
        value: <sqlx::Postgres as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let value: &str = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
        Self::parse(value).ok_or_else(|| format!("invalid route type: {value}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for RouteType {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        sqlx::Encode::<sqlx::Postgres>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Row-fetch ordering key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Departure date, then departure time, then points.
    #[default]
    Date,
    /// Points, then departure date, then departure time.
    Points,
}

impl SortKey {
    fn from_value(value: Option<&JsonValue>, field: &str) -> Parsed<Self> {
        parse::string(value, field).and_then(|s| match s.as_str() {
            s if s.eq_ignore_ascii_case("date") => Parsed::Valid(Self::Date),
            s if s.eq_ignore_ascii_case("points") => Parsed::Valid(Self::Points),
            _ => Parsed::Invalid(ValidationError::new(field, "must be one of date, points")),
        })
    }
}

/// Departure-date scoping: a single day, or an optionally-bounded range.
///
/// The two shapes are mutually exclusive by construction; normalization
/// rejects input that states both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    On(NaiveDate),
    Between {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

impl DateFilter {
    fn from_fields(fields: &Fields<'_>) -> Result<Self, ValidationError> {
        let date = parse::iso_date(fields.get("date"), "date").optional()?;
        let from = parse::iso_date(fields.get("date_from"), "date_from").optional()?;
        let to = parse::iso_date(fields.get("date_to"), "date_to").optional()?;

        match (date, from, to) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ValidationError::new(
                "date",
                "cannot be combined with date_from/date_to",
            )),
            (Some(date), None, None) => Ok(Self::On(date)),
            (None, from, to) => {
                if let (Some(from), Some(to)) = (from, to)
                    && from > to
                {
                    return Err(ValidationError::new("date_from", "must not be after date_to"));
                }
                Ok(Self::Between { from, to })
            }
        }
    }
}

/// Whether an operation scopes by destination, or groups by it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestinationRule {
    Required,
    /// Destination is the grouping key; filtering by it would silently
    /// contradict the grouping, so stating it is an error.
    Forbidden,
}

/// The filter core shared by search, stats, and the discovery views.
///
/// One struct feeds the one WHERE builder, which is what keeps the row-fetch,
/// count, and aggregate queries scoped to identical row sets.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    /// Always present; defaults to [`DEFAULT_ORIGIN`].
    pub origin: String,
    /// Present for every operation except destination discovery.
    pub destination: Option<String>,
    pub dates: DateFilter,
    pub cabin: Option<Cabin>,
    pub tier: Option<String>,
    pub program_id: Option<String>,
    /// When true, only available rows match.
    pub available_only: bool,
    pub points_min: Option<i64>,
    pub points_max: Option<i64>,
}

impl RecordFilter {
    fn from_fields(
        fields: &Fields<'_>,
        destination: DestinationRule,
        available_default: bool,
    ) -> Result<Self, ValidationError> {
        let destination = match destination {
            DestinationRule::Required => Some(
                parse::iata_code(fields.get("destination"), "destination")
                    .required("destination")?,
            ),
            DestinationRule::Forbidden => {
                if fields.has("destination") {
                    return Err(ValidationError::new(
                        "destination",
                        "must not be set for destination discovery",
                    ));
                }
                None
            }
        };

        let points_min = parse::positive_int(fields.get("points_min"), "points_min").optional()?;
        let points_max = parse::positive_int(fields.get("points_max"), "points_max").optional()?;
        if let (Some(min), Some(max)) = (points_min, points_max)
            && min > max
        {
            return Err(ValidationError::new("points_min", "must not exceed points_max"));
        }

        Ok(Self {
            origin: parse::iata_code(fields.get("origin"), "origin")
                .or(DEFAULT_ORIGIN.to_owned())?,
            destination,
            dates: DateFilter::from_fields(fields)?,
            cabin: Cabin::from_value(fields.get("cabin"), "cabin").optional()?,
            tier: parse::non_empty_string(fields.get("tier"), "tier").optional()?,
            program_id: parse::non_empty_string(fields.get("program_id"), "program_id")
                .optional()?,
            available_only: parse::boolean(fields.get("available_only"), "available_only")
                .or(available_default)?,
            points_min,
            points_max,
        })
    }
}

/// Normalized filters for the row-fetching search operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilters {
    pub filter: RecordFilter,
    pub sort: SortKey,
    /// Page size, 1..=500, default 200.
    pub limit: i64,
    /// Row offset, default 0.
    pub offset: i64,
}

impl SearchFilters {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;

        // Search hides unavailable flights unless asked otherwise.
        let filter = RecordFilter::from_fields(&fields, DestinationRule::Required, true)?;

        let limit = parse::positive_int(fields.get("limit"), "limit").or(DEFAULT_SEARCH_LIMIT)?;
        if limit > MAX_SEARCH_LIMIT {
            return Err(ValidationError::new(
                "limit",
                format!("must be between 1 and {MAX_SEARCH_LIMIT}"),
            )
            .into());
        }

        Ok(Self {
            filter,
            sort: SortKey::from_value(fields.get("sort"), "sort").or(SortKey::default())?,
            limit,
            offset: parse::non_negative_int(fields.get("offset"), "offset").or(0)?,
        })
    }
}

/// Normalized filters for the flight-stats aggregation.
///
/// Search shape minus sort/limit/offset: aggregates cover all matches,
/// unpaginated. Unavailable rows are aggregated too (the result reports
/// availability counts) unless `available_only` is stated.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsFilters {
    pub filter: RecordFilter,
}

impl StatsFilters {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;
        let filter = RecordFilter::from_fields(&fields, DestinationRule::Required, false)?;
        Ok(Self { filter })
    }
}

/// Normalized filters for destination discovery.
///
/// Destination is the grouping key and must not appear as a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationFilters {
    pub filter: RecordFilter,
}

impl DestinationFilters {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;
        let filter = RecordFilter::from_fields(&fields, DestinationRule::Forbidden, false)?;
        Ok(Self { filter })
    }
}

/// Normalized filters for the cheapest-by-date view (origin and destination
/// both fixed).
#[derive(Debug, Clone, PartialEq)]
pub struct CheapestByDateFilters {
    pub filter: RecordFilter,
}

impl CheapestByDateFilters {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;
        let filter = RecordFilter::from_fields(&fields, DestinationRule::Required, false)?;
        Ok(Self { filter })
    }
}

/// Normalized filters for deletion.
///
/// Deliberately narrower than search: deletion always names a program and a
/// destination, and has no single-date shorthand. A delete that would match
/// broadly fails validation instead.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteFilters {
    pub program_id: String,
    pub origin: String,
    pub destination: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub cabin: Option<Cabin>,
}

impl DeleteFilters {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;

        if fields.has("date") {
            return Err(ValidationError::new(
                "date",
                "is not supported for delete; use date_from/date_to",
            )
            .into());
        }

        let date_from = parse::iso_date(fields.get("date_from"), "date_from").optional()?;
        let date_to = parse::iso_date(fields.get("date_to"), "date_to").optional()?;
        if let (Some(from), Some(to)) = (date_from, date_to)
            && from > to
        {
            return Err(ValidationError::new("date_from", "must not be after date_to").into());
        }

        Ok(Self {
            program_id: parse::non_empty_string(fields.get("program_id"), "program_id")
                .required("program_id")?,
            origin: parse::iata_code(fields.get("origin"), "origin")
                .or(DEFAULT_ORIGIN.to_owned())?,
            destination: parse::iata_code(fields.get("destination"), "destination")
                .required("destination")?,
            date_from,
            date_to,
            cabin: Cabin::from_value(fields.get("cabin"), "cabin").optional()?,
        })
    }
}
