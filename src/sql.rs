//! Dynamic WHERE/ORDER BY construction shared by every record query.
//!
//! Predicates and their parameters accumulate in lockstep inside
//! [`sqlx::QueryBuilder`]; user-supplied values are always bound, never
//! spliced into the SQL text. The row-fetch, count, and aggregate queries all
//! go through [`push_record_filters`], so identical filters scope identical
//! row sets.

use sqlx::{Postgres, QueryBuilder};

use crate::filters::{DateFilter, RecordFilter, SortKey};

/// Append the conjunctive WHERE clause for `filter`.
///
/// Origin is always a predicate; destination is one whenever the filter
/// carries it. Absent optional filters contribute nothing.
pub(crate) fn push_record_filters<'args>(
    qb: &mut QueryBuilder<'args, Postgres>,
    filter: &'args RecordFilter,
) {
    qb.push(" WHERE origin = ");
    qb.push_bind(&filter.origin);

    if let Some(destination) = &filter.destination {
        qb.push(" AND destination = ");
        qb.push_bind(destination);
    }

    match filter.dates {
        DateFilter::On(date) => {
            qb.push(" AND departure_date = ");
            qb.push_bind(date);
        }
        DateFilter::Between { from, to } => {
            if let Some(from) = from {
                qb.push(" AND departure_date >= ");
                qb.push_bind(from);
            }
            if let Some(to) = to {
                qb.push(" AND departure_date <= ");
                qb.push_bind(to);
            }
        }
    }

    if let Some(cabin) = filter.cabin {
        qb.push(" AND cabin = ");
        qb.push_bind(cabin);
    }
    if let Some(tier) = &filter.tier {
        qb.push(" AND tier = ");
        qb.push_bind(tier);
    }
    if let Some(program_id) = &filter.program_id {
        qb.push(" AND program_id = ");
        qb.push_bind(program_id);
    }
    if let Some(points_min) = filter.points_min {
        qb.push(" AND points_required >= ");
        qb.push_bind(points_min);
    }
    if let Some(points_max) = filter.points_max {
        qb.push(" AND points_required <= ");
        qb.push_bind(points_max);
    }
    if filter.available_only {
        qb.push(" AND available");
    }
}

/// Append the stable tie-break ordering chain for row fetches.
pub(crate) fn push_order_by(qb: &mut QueryBuilder<'_, Postgres>, sort: SortKey) {
    match sort {
        SortKey::Points => {
            qb.push(" ORDER BY points_required ASC, departure_date ASC, departure_time ASC");
        }
        SortKey::Date => {
            qb.push(" ORDER BY departure_date ASC, departure_time ASC, points_required ASC");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn base_filter() -> RecordFilter {
        RecordFilter {
            origin: "KUL".to_owned(),
            destination: Some("AKL".to_owned()),
            dates: DateFilter::Between { from: None, to: None },
            cabin: None,
            tier: None,
            program_id: None,
            available_only: false,
            points_min: None,
            points_max: None,
        }
    }

    #[test]
    fn absent_filters_contribute_no_predicates() {
        let filter = base_filter();
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM award_flights");
        push_record_filters(&mut qb, &filter);

        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM award_flights WHERE origin = $1 AND destination = $2"
        );
    }

    #[test]
    fn every_value_is_bound_never_spliced() {
        let filter = RecordFilter {
            dates: DateFilter::Between {
                from: NaiveDate::from_ymd_opt(2025, 6, 1),
                to: NaiveDate::from_ymd_opt(2025, 6, 30),
            },
            cabin: Some(crate::filters::Cabin::Business),
            tier: Some("saver'; DROP TABLE award_flights; --".to_owned()),
            program_id: Some("enrich".to_owned()),
            available_only: true,
            points_min: Some(10_000),
            points_max: Some(90_000),
            ..base_filter()
        };

        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM award_flights");
        push_record_filters(&mut qb, &filter);

        let sql = qb.sql();
        assert!(!sql.contains("DROP TABLE"), "user value leaked into SQL: {sql}");
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM award_flights \
             WHERE origin = $1 AND destination = $2 \
             AND departure_date >= $3 AND departure_date <= $4 \
             AND cabin = $5 AND tier = $6 AND program_id = $7 \
             AND points_required >= $8 AND points_required <= $9 \
             AND available"
        );
    }

    #[test]
    fn single_date_replaces_the_range_predicates() {
        let filter = RecordFilter {
            dates: DateFilter::On(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
            ..base_filter()
        };

        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM award_flights");
        push_record_filters(&mut qb, &filter);

        let sql = qb.sql();
        assert!(sql.contains("departure_date = $3"));
        assert!(!sql.contains(">="));
        assert!(!sql.contains("<="));
    }

    #[test]
    fn order_by_chains() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1");
        push_order_by(&mut qb, SortKey::Points);
        assert_eq!(
            qb.sql(),
            "SELECT 1 ORDER BY points_required ASC, departure_date ASC, departure_time ASC"
        );

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1");
        push_order_by(&mut qb, SortKey::Date);
        assert_eq!(
            qb.sql(),
            "SELECT 1 ORDER BY departure_date ASC, departure_time ASC, points_required ASC"
        );
    }
}
