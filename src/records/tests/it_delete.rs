//! Scoped deletion tests

use chrono::NaiveTime;
use pgtemp::PgTempDB;
use serde_json::json;

use crate::{
    conn::DbConnPool,
    filters::{Cabin, DeleteFilters, RouteType},
    programs::{self, NewProgram},
    records::{self, FlightBatch, NewFlightRecord},
};

async fn connect(temp_db: &PgTempDB) -> DbConnPool {
    let pool = DbConnPool::connect(&temp_db.connection_uri(), 2)
        .await
        .expect("Failed to connect to award db");
    pool.run_migrations().await.expect("Failed to run migrations");
    pool
}

async fn seed_program(pool: &DbConnPool, id: &str) {
    programs::upsert(
        &**pool,
        &NewProgram {
            id: id.to_owned(),
            name: id.to_owned(),
            airline: "Test Air".to_owned(),
            alliance: None,
        },
    )
    .await
    .expect("Failed to upsert program");
}

fn record(
    program_id: &str,
    destination: &str,
    cabin: Cabin,
    flight_number: &str,
    date: &str,
) -> NewFlightRecord {
    NewFlightRecord {
        program_id: program_id.to_owned(),
        origin: "KUL".to_owned(),
        destination: destination.to_owned(),
        flight_number: flight_number.to_owned(),
        departure_date: date.parse().expect("valid date"),
        cabin,
        tier: "saver".to_owned(),
        departure_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        arrival_time: NaiveTime::from_hms_opt(21, 5, 0).unwrap(),
        arrival_day_offset: 0,
        duration_minutes: 635,
        route_type: RouteType::Direct,
        points_required: 45_000,
        available: true,
        seats_left: None,
        taxes_amount: 88.5,
        cash_equivalent: None,
        notes: None,
    }
}

async fn remaining_cabins(pool: &DbConnPool) -> Vec<(String, String)> {
    sqlx::query_as(
        "SELECT program_id, cabin FROM award_flights ORDER BY program_id, cabin",
    )
    .fetch_all(&**pool)
    .await
    .expect("Failed to list remaining rows")
}

#[tokio::test]
async fn delete_removes_only_the_scoped_cabin_and_program() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect(&temp_db).await;
    seed_program(&pool, "enrich").await;
    seed_program(&pool, "krisflyer").await;

    let batch = FlightBatch::from_records(vec![
        record("enrich", "AKL", Cabin::Business, "MH131", "2025-06-01"),
        record("enrich", "AKL", Cabin::Business, "MH133", "2025-06-02"),
        record("enrich", "AKL", Cabin::Economy, "MH135", "2025-06-01"),
        record("enrich", "AKL", Cabin::First, "MH137", "2025-06-01"),
        record("krisflyer", "AKL", Cabin::Business, "SQ285", "2025-06-01"),
        record("enrich", "SYD", Cabin::Business, "MH141", "2025-06-01"),
    ]);
    records::upsert_batch(&pool, &batch, 50)
        .await
        .expect("Failed to upsert records");

    //* When
    let filters = DeleteFilters::from_json(&json!({
        "program_id": "enrich",
        "destination": "AKL",
        "origin": "KUL",
        "cabin": "business",
    }))
    .expect("Failed to normalize filters");
    let deleted = records::delete(&*pool, &filters)
        .await
        .expect("Failed to delete");

    //* Then
    assert_eq!(deleted, 2);
    assert_eq!(
        remaining_cabins(&pool).await,
        vec![
            ("enrich".to_owned(), "business".to_owned()), // the SYD row
            ("enrich".to_owned(), "economy".to_owned()),
            ("enrich".to_owned(), "first".to_owned()),
            ("krisflyer".to_owned(), "business".to_owned()),
        ]
    );
}

#[tokio::test]
async fn delete_honors_the_date_window() {
    //* Given
    let temp_db = PgTempDB::new();
    let pool = connect(&temp_db).await;
    seed_program(&pool, "enrich").await;

    let batch = FlightBatch::from_records(vec![
        record("enrich", "AKL", Cabin::Economy, "MH131", "2025-06-01"),
        record("enrich", "AKL", Cabin::Economy, "MH133", "2025-06-15"),
        record("enrich", "AKL", Cabin::Economy, "MH135", "2025-07-01"),
    ]);
    records::upsert_batch(&pool, &batch, 50)
        .await
        .expect("Failed to upsert records");

    //* When
    let filters = DeleteFilters::from_json(&json!({
        "program_id": "enrich",
        "destination": "AKL",
        "date_from": "2025-06-10",
        "date_to": "2025-06-30",
    }))
    .expect("Failed to normalize filters");
    let deleted = records::delete(&*pool, &filters)
        .await
        .expect("Failed to delete");

    //* Then
    let remaining: Vec<String> =
        sqlx::query_scalar("SELECT flight_number FROM award_flights ORDER BY flight_number")
            .fetch_all(&*pool)
            .await
            .expect("Failed to list remaining rows");
    assert_eq!(deleted, 1);
    assert_eq!(remaining, vec!["MH131".to_owned(), "MH135".to_owned()]);
}
