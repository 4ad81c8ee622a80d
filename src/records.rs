//! Award flight record operations: bulk upsert, search, and deletion.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::{
    Error,
    filters::{Cabin, DeleteFilters, RecordFilter, RouteType, SearchFilters},
    parse::{self, Fields, ParseError, ValidationError},
    sql,
};

/// One stored price/availability snapshot.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct FlightRow {
    /// Surrogate row id; identity lives in the compound key below.
    pub id: i64,
    pub program_id: String,
    pub origin: String,
    pub destination: String,
    pub flight_number: String,
    pub departure_date: NaiveDate,
    pub cabin: Cabin,
    pub tier: String,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    /// Days the arrival slips past the departure date (0-2).
    pub arrival_day_offset: i32,
    pub duration_minutes: i32,
    pub route_type: RouteType,
    pub points_required: i64,
    pub available: bool,
    pub seats_left: Option<i32>,
    pub taxes_amount: f64,
    pub cash_equivalent: Option<f64>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A fully-validated flight record, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFlightRecord {
    pub program_id: String,
    pub origin: String,
    pub destination: String,
    pub flight_number: String,
    pub departure_date: NaiveDate,
    pub cabin: Cabin,
    pub tier: String,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    pub arrival_day_offset: i32,
    pub duration_minutes: i32,
    pub route_type: RouteType,
    pub points_required: i64,
    pub available: bool,
    pub seats_left: Option<i32>,
    pub taxes_amount: f64,
    pub cash_equivalent: Option<f64>,
    pub notes: Option<String>,
}

impl NewFlightRecord {
    /// Validate one record of a bulk submission.
    ///
    /// `index` is the record's position in the batch; every failure message
    /// carries it (`records[3].points_required must be a positive integer`)
    /// so bulk submitters can find the offending row.
    pub fn from_json(input: &JsonValue, index: usize) -> Result<Self, ValidationError> {
        let Some(object) = input.as_object() else {
            return Err(ValidationError::new(
                format!("records[{index}]"),
                "must be a JSON object",
            ));
        };
        let fields = Fields::new(object);
        let field = |name: &str| format!("records[{index}].{name}");

        let arrival_day_offset = {
            let name = field("arrival_day_offset");
            let offset = parse::non_negative_int(fields.get("arrival_day_offset"), &name).or(0)?;
            if offset > 2 {
                return Err(ValidationError::new(name, "must be between 0 and 2"));
            }
            offset as i32
        };

        let duration_minutes = {
            let name = field("duration_minutes");
            let minutes = parse::positive_int(fields.get("duration_minutes"), &name)
                .required(&name)?;
            i32::try_from(minutes)
                .map_err(|_| ValidationError::new(name, "must be a positive integer"))?
        };

        let seats_left = {
            let name = field("seats_left");
            parse::non_negative_int(fields.get("seats_left"), &name)
                .optional()?
                .map(|seats| {
                    i32::try_from(seats)
                        .map_err(|_| ValidationError::new(name, "must be a non-negative integer"))
                })
                .transpose()?
        };

        Ok(Self {
            program_id: parse::non_empty_string(
                fields.get("program_id"),
                &field("program_id"),
            )
            .required(&field("program_id"))?,
            origin: parse::iata_code(fields.get("origin"), &field("origin"))
                .required(&field("origin"))?,
            destination: parse::iata_code(fields.get("destination"), &field("destination"))
                .required(&field("destination"))?,
            flight_number: parse::non_empty_string(
                fields.get("flight_number"),
                &field("flight_number"),
            )
            .required(&field("flight_number"))?,
            departure_date: parse::iso_date(
                fields.get("departure_date"),
                &field("departure_date"),
            )
            .required(&field("departure_date"))?,
            cabin: Cabin::from_value(fields.get("cabin"), &field("cabin"))
                .required(&field("cabin"))?,
            tier: parse::non_empty_string(fields.get("tier"), &field("tier"))
                .required(&field("tier"))?,
            departure_time: parse::time_of_day(
                fields.get("departure_time"),
                &field("departure_time"),
            )
            .required(&field("departure_time"))?,
            arrival_time: parse::time_of_day(fields.get("arrival_time"), &field("arrival_time"))
                .required(&field("arrival_time"))?,
            arrival_day_offset,
            duration_minutes,
            route_type: RouteType::from_value(fields.get("route_type"), &field("route_type"))
                .required(&field("route_type"))?,
            points_required: parse::positive_int(
                fields.get("points_required"),
                &field("points_required"),
            )
            .required(&field("points_required"))?,
            // Absent means available; present-and-non-boolean is an error.
            available: parse::boolean(fields.get("available"), &field("available")).or(true)?,
            seats_left,
            taxes_amount: parse::money(fields.get("taxes_amount"), &field("taxes_amount"))
                .required(&field("taxes_amount"))?,
            cash_equivalent: parse::money(
                fields.get("cash_equivalent"),
                &field("cash_equivalent"),
            )
            .optional()?,
            notes: parse::string(fields.get("notes"), &field("notes")).optional()?,
        })
    }
}

/// A bounds-checked batch of validated records.
///
/// Construction validates everything up front: the whole batch is rejected
/// before any storage write if the size is out of bounds or any single
/// record is malformed.
#[derive(Debug, Clone)]
pub struct FlightBatch(Vec<NewFlightRecord>);

impl FlightBatch {
    /// Normalize a bulk submission.
    ///
    /// Accepts either a JSON array of records or an object with a `records`
    /// array. The batch size check runs before any per-record validation.
    pub fn from_json(input: &JsonValue, max_records: usize) -> Result<Self, Error> {
        let records = match input {
            JsonValue::Array(records) => records,
            JsonValue::Object(object) => object
                .get("records")
                .and_then(JsonValue::as_array)
                .ok_or(ParseError::ExpectedArray)?,
            _ => return Err(ParseError::ExpectedArray.into()),
        };

        if records.is_empty() || records.len() > max_records {
            return Err(ValidationError::new(
                "records",
                format!("must contain between 1 and {max_records} records"),
            )
            .into());
        }

        let mut batch = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            batch.push(NewFlightRecord::from_json(record, index)?);
        }
        Ok(Self(batch))
    }

    pub fn from_records(records: Vec<NewFlightRecord>) -> Self {
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> &[NewFlightRecord] {
        &self.0
    }
}

/// Write a validated batch idempotently.
///
/// Records are written in fixed-size chunks, one transaction per chunk (the
/// store's batched-execution unit), chunks strictly in order. A failing
/// chunk aborts before the next one starts; chunks already committed stay
/// committed.
///
/// Returns the number of records submitted; conflicting upserts count too.
#[tracing::instrument(skip(pool, batch), fields(records = batch.len()), err)]
pub async fn upsert_batch(
    pool: &PgPool,
    batch: &FlightBatch,
    chunk_size: usize,
) -> Result<u64, sqlx::Error> {
    // chunks() panics on zero.
    for chunk in batch.0.chunks(chunk_size.max(1)) {
        let mut tx = pool.begin().await?;
        for record in chunk {
            upsert_one(&mut *tx, record).await?;
        }
        tx.commit().await?;
    }
    Ok(batch.0.len() as u64)
}

/// Insert one record; on conflict with the compound identity key, update the
/// mutable columns. Key columns and `created_at` are never touched by a
/// conflicting upsert.
async fn upsert_one<'c, E>(exe: E, record: &NewFlightRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO award_flights (
            program_id, origin, destination, flight_number, departure_date, cabin, tier,
            departure_time, arrival_time, arrival_day_offset, duration_minutes, route_type,
            points_required, available, seats_left, taxes_amount, cash_equivalent, notes,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                (timezone('UTC', now())), (timezone('UTC', now())))
        ON CONFLICT (program_id, origin, destination, flight_number, departure_date, cabin, tier)
        DO UPDATE SET
            departure_time = EXCLUDED.departure_time,
            arrival_time = EXCLUDED.arrival_time,
            arrival_day_offset = EXCLUDED.arrival_day_offset,
            duration_minutes = EXCLUDED.duration_minutes,
            route_type = EXCLUDED.route_type,
            points_required = EXCLUDED.points_required,
            available = EXCLUDED.available,
            seats_left = EXCLUDED.seats_left,
            taxes_amount = EXCLUDED.taxes_amount,
            cash_equivalent = EXCLUDED.cash_equivalent,
            notes = EXCLUDED.notes,
            updated_at = (timezone('UTC', now()))
    "#};

    sqlx::query(query)
        .bind(&record.program_id)
        .bind(&record.origin)
        .bind(&record.destination)
        .bind(&record.flight_number)
        .bind(record.departure_date)
        .bind(record.cabin)
        .bind(&record.tier)
        .bind(record.departure_time)
        .bind(record.arrival_time)
        .bind(record.arrival_day_offset)
        .bind(record.duration_minutes)
        .bind(record.route_type)
        .bind(record.points_required)
        .bind(record.available)
        .bind(record.seats_left)
        .bind(record.taxes_amount)
        .bind(record.cash_equivalent)
        .bind(&record.notes)
        .execute(exe)
        .await?;
    Ok(())
}

/// Search results plus the pagination envelope.
#[derive(Debug, serde::Serialize)]
pub struct SearchResults {
    pub rows: Vec<FlightRow>,
    /// Total matches regardless of pagination.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

const SELECT_FLIGHT_COLUMNS: &str = indoc::indoc! {"
    SELECT id, program_id, origin, destination, flight_number, departure_date, cabin, tier,
           departure_time, arrival_time, arrival_day_offset, duration_minutes, route_type,
           points_required, available, seats_left, taxes_amount, cash_equivalent, notes,
           created_at, updated_at
    FROM award_flights"};

/// Fetch a page of matching rows plus the unpaginated match count.
#[tracing::instrument(skip(pool, filters), err)]
pub async fn search(pool: &PgPool, filters: &SearchFilters) -> Result<SearchResults, sqlx::Error> {
    let total = count(pool, &filters.filter).await?;

    let mut qb = QueryBuilder::new(SELECT_FLIGHT_COLUMNS);
    sql::push_record_filters(&mut qb, &filters.filter);
    sql::push_order_by(&mut qb, filters.sort);
    qb.push(" LIMIT ");
    qb.push_bind(filters.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filters.offset);

    let rows = qb.build_query_as::<FlightRow>().fetch_all(pool).await?;

    Ok(SearchResults {
        rows,
        total,
        limit: filters.limit,
        offset: filters.offset,
    })
}

/// Count the rows matching `filter`, through the same WHERE builder the
/// row fetch uses.
pub async fn count<'c, E>(exe: E, filter: &RecordFilter) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM award_flights");
    sql::push_record_filters(&mut qb, filter);
    qb.build_query_scalar().fetch_one(exe).await
}

/// Delete the rows matching the (deliberately narrow) delete filters.
///
/// Returns the number of rows removed.
#[tracing::instrument(skip(exe), err)]
pub async fn delete<'c, E>(exe: E, filters: &DeleteFilters) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut qb = QueryBuilder::new("DELETE FROM award_flights WHERE program_id = ");
    qb.push_bind(&filters.program_id);
    qb.push(" AND origin = ");
    qb.push_bind(&filters.origin);
    qb.push(" AND destination = ");
    qb.push_bind(&filters.destination);
    if let Some(from) = filters.date_from {
        qb.push(" AND departure_date >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filters.date_to {
        qb.push(" AND departure_date <= ");
        qb.push_bind(to);
    }
    if let Some(cabin) = filters.cabin {
        qb.push(" AND cabin = ");
        qb.push_bind(cabin);
    }

    let result = qb.build().execute(exe).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod batch_tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    fn record_json(flight_number: &str, points: i64) -> JsonValue {
        json!({
            "program_id": "enrich",
            "origin": "KUL",
            "destination": "AKL",
            "flight_number": flight_number,
            "departure_date": "2025-06-01",
            "cabin": "economy",
            "tier": "saver",
            "departure_time": "09:30",
            "arrival_time": "21:05",
            "arrival_day_offset": 0,
            "duration_minutes": 635,
            "route_type": "direct",
            "points_required": points,
            "taxes_amount": 123.456,
        })
    }

    #[test]
    fn empty_and_oversized_batches_are_rejected_before_record_validation() {
        let err = FlightBatch::from_json(&json!([]), 500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "records must contain between 1 and 500 records");

        // 501 garbage entries: the size check fires first, so no per-record
        // message appears.
        let oversized = JsonValue::Array(vec![json!("not a record"); 501]);
        let err = FlightBatch::from_json(&oversized, 500).unwrap_err();
        assert_eq!(err.to_string(), "records must contain between 1 and 500 records");
    }

    #[test]
    fn a_full_batch_of_500_passes_validation() {
        let records: Vec<JsonValue> = (0..500)
            .map(|i| record_json(&format!("MH{i:03}"), 45_000))
            .collect();
        let batch = FlightBatch::from_json(&JsonValue::Array(records), 500).unwrap();
        assert_eq!(batch.len(), 500);
    }

    #[test]
    fn failure_messages_carry_the_batch_index() {
        let mut bad = record_json("MH133", 45_000);
        bad["points_required"] = json!(0);
        let records = json!([
            record_json("MH131", 45_000),
            record_json("MH132", 45_000),
            record_json("MH133", 45_000),
            bad,
        ]);

        let err = FlightBatch::from_json(&records, 500).unwrap_err();
        assert_eq!(
            err.to_string(),
            "records[3].points_required must be a positive integer"
        );
    }

    #[test]
    fn available_defaults_true_but_rejects_garbage() {
        let record = NewFlightRecord::from_json(&record_json("MH131", 45_000), 0).unwrap();
        assert!(record.available);

        let mut bad = record_json("MH131", 45_000);
        bad["available"] = json!("yes");
        let err = NewFlightRecord::from_json(&bad, 0).unwrap_err();
        assert_eq!(err.to_string(), "records[0].available must be a boolean");
    }

    #[test]
    fn taxes_are_rounded_at_normalization() {
        let record = NewFlightRecord::from_json(&record_json("MH131", 45_000), 0).unwrap();
        assert_eq!(record.taxes_amount, 123.46);
    }

    #[test]
    fn arrival_day_offset_is_constrained() {
        let mut record = record_json("MH131", 45_000);
        record["arrival_day_offset"] = json!(2);
        assert!(NewFlightRecord::from_json(&record, 0).is_ok());

        record["arrival_day_offset"] = json!(3);
        let err = NewFlightRecord::from_json(&record, 0).unwrap_err();
        assert_eq!(err.to_string(), "records[0].arrival_day_offset must be between 0 and 2");
    }

    #[test]
    fn object_with_records_array_is_accepted() {
        let batch = FlightBatch::from_json(
            &json!({ "records": [record_json("MH131", 45_000)] }),
            500,
        )
        .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn non_array_input_is_a_parse_error() {
        let err = FlightBatch::from_json(&json!({ "records": "MH131" }), 500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_delete;
    mod it_search;
    mod it_upsert;
}
