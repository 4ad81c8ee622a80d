//! Grouped aggregate views over the award flight records.
//!
//! All three views scope their rows through the same WHERE builder the
//! search queries use. Cabins with no matching rows surface as `None`
//! (serialized `null`), never as zeroed or empty aggregates.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    filters::{
        Cabin, CheapestByDateFilters, DateFilter, DestinationFilters, RecordFilter, StatsFilters,
    },
    parse::round_2dp,
    sql,
};

/// Aggregates for one (cabin, tier) group.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TierStats {
    pub min_points: i64,
    pub max_points: i64,
    /// Rounded to 2 decimal places.
    pub avg_points: f64,
    pub available_count: i64,
}

/// Per-cabin tier breakdowns. A cabin with no matching rows is `None`,
/// distinguishable from a cabin whose aggregates happen to be zero.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CabinBreakdown {
    pub economy: Option<BTreeMap<String, TierStats>>,
    pub business: Option<BTreeMap<String, TierStats>>,
    pub first: Option<BTreeMap<String, TierStats>>,
}

impl CabinBreakdown {
    fn slot(&mut self, cabin: Cabin) -> &mut Option<BTreeMap<String, TierStats>> {
        match cabin {
            Cabin::Economy => &mut self.economy,
            Cabin::Business => &mut self.business,
            Cabin::First => &mut self.first,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// The flight-stats view.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FlightStats {
    pub cabins: CabinBreakdown,
    pub total_flights: i64,
    /// Filter-stated date bounds take precedence over computed ones.
    pub date_range: DateRange,
    pub last_updated: Option<NaiveDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct CabinTierRow {
    cabin: Cabin,
    tier: String,
    min_points: i64,
    max_points: i64,
    avg_points: f64,
    available_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    total_flights: i64,
    earliest: Option<NaiveDate>,
    latest: Option<NaiveDate>,
    last_updated: Option<NaiveDateTime>,
}

/// Grouped stats plus the overall summary for the matching rows.
///
/// The two reads are independent and commute, so they are issued
/// concurrently.
#[tracing::instrument(skip(pool, filters), err)]
pub async fn flight_stats(
    pool: &PgPool,
    filters: &StatsFilters,
) -> Result<FlightStats, sqlx::Error> {
    let (rows, summary) = tokio::try_join!(
        cabin_tier_rows(pool, &filters.filter),
        summary_row(pool, &filters.filter),
    )?;
    Ok(shape_flight_stats(rows, summary, &filters.filter))
}

async fn cabin_tier_rows<'c, E>(
    exe: E,
    filter: &RecordFilter,
) -> Result<Vec<CabinTierRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new(indoc::indoc! {"
        SELECT cabin, tier,
               MIN(points_required) AS min_points,
               MAX(points_required) AS max_points,
               AVG(points_required)::float8 AS avg_points,
               COUNT(*) FILTER (WHERE available) AS available_count
        FROM award_flights"});
    sql::push_record_filters(&mut qb, filter);
    qb.push(" GROUP BY cabin, tier ORDER BY cabin, tier");

    qb.build_query_as().fetch_all(exe).await
}

async fn summary_row<'c, E>(exe: E, filter: &RecordFilter) -> Result<SummaryRow, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new(indoc::indoc! {"
        SELECT COUNT(*) AS total_flights,
               MIN(departure_date) AS earliest,
               MAX(departure_date) AS latest,
               MAX(updated_at) AS last_updated
        FROM award_flights"});
    sql::push_record_filters(&mut qb, filter);

    qb.build_query_as().fetch_one(exe).await
}

fn shape_flight_stats(
    rows: Vec<CabinTierRow>,
    summary: SummaryRow,
    filter: &RecordFilter,
) -> FlightStats {
    let mut cabins = CabinBreakdown::default();
    for row in rows {
        cabins.slot(row.cabin).get_or_insert_default().insert(
            row.tier,
            TierStats {
                min_points: row.min_points,
                max_points: row.max_points,
                avg_points: round_2dp(row.avg_points),
                available_count: row.available_count,
            },
        );
    }

    // Input-stated date bounds win over computed ones for that side.
    let date_range = match filter.dates {
        DateFilter::On(date) => DateRange {
            from: Some(date),
            to: Some(date),
        },
        DateFilter::Between { from, to } => DateRange {
            from: from.or(summary.earliest),
            to: to.or(summary.latest),
        },
    };

    FlightStats {
        cabins,
        total_flights: summary.total_flights,
        date_range,
        last_updated: summary.last_updated,
    }
}

/// Per-cabin minimum points; `None` where the cabin has no matching rows.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CabinMinPoints {
    pub economy: Option<i64>,
    pub business: Option<i64>,
    pub first: Option<i64>,
}

/// One destination reachable from the scoped origin.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DestinationSummary {
    pub destination: String,
    pub flight_count: i64,
    pub date_range: DateRange,
    pub min_points: CabinMinPoints,
    pub available_count: i64,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct DestinationRow {
    destination: String,
    flight_count: i64,
    first_date: NaiveDate,
    last_date: NaiveDate,
    economy_min: Option<i64>,
    business_min: Option<i64>,
    first_min: Option<i64>,
    available_count: i64,
    last_updated: NaiveDateTime,
}

/// Discover destinations served from the scoped origin, with per-cabin
/// minimum points.
#[tracing::instrument(skip(exe, filters), err)]
pub async fn destinations<'c, E>(
    exe: E,
    filters: &DestinationFilters,
) -> Result<Vec<DestinationSummary>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new(indoc::indoc! {"
        SELECT destination,
               COUNT(*) AS flight_count,
               MIN(departure_date) AS first_date,
               MAX(departure_date) AS last_date,
               MIN(points_required) FILTER (WHERE cabin = 'economy') AS economy_min,
               MIN(points_required) FILTER (WHERE cabin = 'business') AS business_min,
               MIN(points_required) FILTER (WHERE cabin = 'first') AS first_min,
               COUNT(*) FILTER (WHERE available) AS available_count,
               MAX(updated_at) AS last_updated
        FROM award_flights"});
    sql::push_record_filters(&mut qb, &filters.filter);
    qb.push(" GROUP BY destination ORDER BY destination");

    let rows: Vec<DestinationRow> = qb.build_query_as().fetch_all(exe).await?;

    Ok(rows
        .into_iter()
        .map(|row| DestinationSummary {
            destination: row.destination,
            flight_count: row.flight_count,
            date_range: DateRange {
                from: Some(row.first_date),
                to: Some(row.last_date),
            },
            min_points: CabinMinPoints {
                economy: row.economy_min,
                business: row.business_min,
                first: row.first_min,
            },
            available_count: row.available_count,
            last_updated: row.last_updated,
        })
        .collect())
}

/// The cheapest offer for one cabin on one date.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CabinMin {
    pub points: i64,
    /// Whether some row at this minimum is available.
    pub available: bool,
}

/// Per-cabin minimums for one departure date on the scoped route.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DateCabinMins {
    pub date: NaiveDate,
    pub economy: Option<CabinMin>,
    pub business: Option<CabinMin>,
    pub first: Option<CabinMin>,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct CheapestRow {
    departure_date: NaiveDate,
    cabin: Cabin,
    points_required: i64,
    available: bool,
    last_updated: NaiveDateTime,
}

/// Least-expensive offer per (departure date, cabin) on the scoped route.
///
/// `DISTINCT ON` keeps the minimum-points row per group; the `available
/// DESC` tie-break means a date is flagged available whenever any row at
/// the minimum is.
#[tracing::instrument(skip(exe, filters), err)]
pub async fn cheapest_by_date<'c, E>(
    exe: E,
    filters: &CheapestByDateFilters,
) -> Result<Vec<DateCabinMins>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new(indoc::indoc! {"
        SELECT DISTINCT ON (departure_date, cabin)
               departure_date, cabin, points_required, available,
               MAX(updated_at) OVER (PARTITION BY departure_date) AS last_updated
        FROM award_flights"});
    sql::push_record_filters(&mut qb, &filters.filter);
    qb.push(" ORDER BY departure_date ASC, cabin ASC, points_required ASC, available DESC");

    let rows: Vec<CheapestRow> = qb.build_query_as().fetch_all(exe).await?;

    let mut dates: Vec<DateCabinMins> = Vec::new();
    for row in rows {
        let min = CabinMin {
            points: row.points_required,
            available: row.available,
        };
        if dates.last().map(|entry| entry.date) != Some(row.departure_date) {
            dates.push(DateCabinMins {
                date: row.departure_date,
                economy: None,
                business: None,
                first: None,
                last_updated: row.last_updated,
            });
        }
        let entry = dates.last_mut().expect("entry pushed above");
        match row.cabin {
            Cabin::Economy => entry.economy = Some(min),
            Cabin::Business => entry.business = Some(min),
            Cabin::First => entry.first = Some(min),
        }
    }
    Ok(dates)
}
