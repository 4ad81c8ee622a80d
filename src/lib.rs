//! Award flight pricing metadata store.
//!
//! This crate owns the PostgreSQL schema and every operation over it:
//! idempotent bulk upserts of observed price/availability snapshots, filtered
//! search and deletion, and the grouped aggregate views (flight stats,
//! destination discovery, cheapest-by-date).
//!
//! Operations accept loosely-typed JSON input, as it arrives from query
//! parameters or request bodies, and normalize it into fully-typed filter and
//! record structures before any storage call is issued. Present-but-malformed
//! input always fails the operation; it is never silently defaulted or
//! clamped.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

mod conn;
mod filters;
mod parse;
mod programs;
mod records;
mod sql;
mod stats;
#[cfg(feature = "temp-db")]
pub mod temp;

use self::conn::DbConnPool;
#[cfg(feature = "temp-db")]
pub use self::temp::{KEEP_TEMP_DIRS, TempAwardDb, temp_award_db};
pub use self::{
    conn::{ConnError, DbConn},
    filters::{
        Cabin, CheapestByDateFilters, DateFilter, DeleteFilters, DestinationFilters,
        RecordFilter, RouteType, SearchFilters, SortKey, StatsFilters,
    },
    parse::{ParseError, Parsed, ValidationError},
    programs::{NewProgram, Program},
    records::{FlightBatch, FlightRow, NewFlightRecord, SearchResults},
    stats::{
        CabinBreakdown, CabinMin, CabinMinPoints, DateCabinMins, DateRange, DestinationSummary,
        FlightStats, TierStats,
    },
};

/// Default pool size for the award DB.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Origin airport assumed when a filter states none.
pub const DEFAULT_ORIGIN: &str = "KUL";

/// Default search page size.
pub const DEFAULT_SEARCH_LIMIT: i64 = 200;

/// Largest allowed search page size.
pub const MAX_SEARCH_LIMIT: i64 = 500;

/// Largest record batch accepted by a single upsert call.
pub const MAX_UPSERT_RECORDS: usize = 500;

/// Records written per storage batch. Matches the statements-per-batch
/// ceiling of the underlying store; override per deployment via
/// [`AwardDb::with_batch_limits`].
pub const STORAGE_BATCH_CHUNK_SIZE: usize = 50;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error connecting to award db: {0}")]
    ConnectionError(sqlx::Error),

    #[error("Error running migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Error executing database query: {0}")]
    DbError(#[from] sqlx::Error),

    /// Caller-supplied input violated a business rule.
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    /// Caller-supplied input was not structured data.
    #[error(transparent)]
    MalformedInput(#[from] ParseError),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

/// Stable error classification for transport layers.
///
/// Hosts map kinds to status classes (validation/parse to the client-error
/// class, not-found to its own, database to the server-error class) without
/// inspecting the underlying causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Database,
    Parse,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Validation,
            Self::MalformedInput(_) => ErrorKind::Parse,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ConnectionError(_) | Self::MigrationError(_) | Self::DbError(_) => {
                ErrorKind::Database
            }
        }
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::ConnectionError(err),
            ConnError::MigrationFailed(err) => Error::MigrationError(err),
        }
    }
}

/// Connection pool to the award DB. Clones will refer to the same instance.
#[derive(Clone, Debug)]
pub struct AwardDb {
    pub pool: DbConnPool,
    pub(crate) url: Arc<str>,
    max_upsert_records: usize,
    write_chunk_size: usize,
}

impl AwardDb {
    /// Sets up a connection pool to the award DB.
    ///
    /// Runs migrations if necessary.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, Error> {
        Self::connect_with_config(url, pool_size, true).await
    }

    /// Sets up a connection pool to the award DB with configurable migration
    /// behavior.
    ///
    /// Runs migrations only if `auto_migrate` is true.
    #[instrument(skip_all, err)]
    pub async fn connect_with_config(
        url: &str,
        pool_size: u32,
        auto_migrate: bool,
    ) -> Result<Self, Error> {
        let pool = DbConnPool::connect(url, pool_size).await?;
        if auto_migrate {
            pool.run_migrations().await?;
        }
        Ok(Self {
            pool,
            url: url.into(),
            max_upsert_records: MAX_UPSERT_RECORDS,
            write_chunk_size: STORAGE_BATCH_CHUNK_SIZE,
        })
    }

    /// Sets up a connection pool to the award DB with retry logic for
    /// temporary databases that are still starting up.
    #[cfg(feature = "temp-db")]
    #[instrument(skip_all, err)]
    pub async fn connect_with_retry(url: &str, pool_size: u32) -> Result<Self, Error> {
        use std::time::Duration;

        use backon::{ExponentialBuilder, Retryable};

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_max_times(20);

        fn is_db_starting_up(err: &ConnError) -> bool {
            matches!(
                err,
                ConnError::ConnectionError(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code == "57P03")
            )
        }

        fn notify_retry(err: &ConnError, dur: Duration) {
            tracing::warn!(
                error = %err,
                "Database still starting up during connection. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        }

        let pool = (|| DbConnPool::connect(url, pool_size))
            .retry(retry_policy)
            .when(is_db_starting_up)
            .notify(notify_retry)
            .await?;

        pool.run_migrations().await?;

        Ok(Self {
            pool,
            url: url.into(),
            max_upsert_records: MAX_UPSERT_RECORDS,
            write_chunk_size: STORAGE_BATCH_CHUNK_SIZE,
        })
    }

    /// Configures the batch ceilings for bulk upserts: the largest accepted
    /// batch, and the number of records written per storage call.
    pub fn with_batch_limits(self, max_upsert_records: usize, write_chunk_size: usize) -> Self {
        Self {
            max_upsert_records,
            write_chunk_size,
            ..self
        }
    }

    pub fn default_pool_size() -> u32 {
        DEFAULT_POOL_SIZE
    }
}

/// Flight record API
impl AwardDb {
    /// Search flight records.
    ///
    /// Returns the matching page in the requested order, plus the
    /// unpaginated match total.
    #[instrument(skip(self, input), err)]
    pub async fn search(&self, input: &JsonValue) -> Result<SearchResults, Error> {
        let filters = SearchFilters::from_json(input)?;
        Ok(records::search(&self.pool, &filters).await?)
    }

    /// Delete flight records scoped by program, route, and optionally a date
    /// window and cabin. Returns the number of rows removed.
    #[instrument(skip(self, input), err)]
    pub async fn delete(&self, input: &JsonValue) -> Result<u64, Error> {
        let filters = DeleteFilters::from_json(input)?;
        Ok(records::delete(&*self.pool, &filters).await?)
    }

    /// Validate and idempotently write a batch of flight records.
    ///
    /// The whole batch is validated before any write; the returned count is
    /// the number of records submitted (updates count too).
    #[instrument(skip(self, input), err)]
    pub async fn upsert_records(&self, input: &JsonValue) -> Result<u64, Error> {
        let batch = FlightBatch::from_json(input, self.max_upsert_records)?;
        Ok(records::upsert_batch(&self.pool, &batch, self.write_chunk_size).await?)
    }
}

/// Aggregate views API
impl AwardDb {
    /// Grouped (cabin, tier) statistics plus an overall summary for the
    /// matching rows.
    #[instrument(skip(self, input), err)]
    pub async fn stats(&self, input: &JsonValue) -> Result<FlightStats, Error> {
        let filters = StatsFilters::from_json(input)?;
        Ok(stats::flight_stats(&self.pool, &filters).await?)
    }

    /// Destinations served from the scoped origin, with per-cabin minimum
    /// points.
    #[instrument(skip(self, input), err)]
    pub async fn destinations(&self, input: &JsonValue) -> Result<Vec<DestinationSummary>, Error> {
        let filters = DestinationFilters::from_json(input)?;
        Ok(stats::destinations(&*self.pool, &filters).await?)
    }

    /// Least-expensive offers per departure date and cabin on the scoped
    /// route.
    #[instrument(skip(self, input), err)]
    pub async fn cheapest_by_date(&self, input: &JsonValue) -> Result<Vec<DateCabinMins>, Error> {
        let filters = CheapestByDateFilters::from_json(input)?;
        Ok(stats::cheapest_by_date(&*self.pool, &filters).await?)
    }
}

/// Program API
impl AwardDb {
    /// Create or update a loyalty program (idempotent by id).
    #[instrument(skip(self, input), err)]
    pub async fn upsert_program(&self, input: &JsonValue) -> Result<Program, Error> {
        let program = NewProgram::from_json(input)?;
        Ok(programs::upsert(&*self.pool, &program).await?)
    }

    /// List all loyalty programs.
    #[instrument(skip(self), err)]
    pub async fn programs(&self) -> Result<Vec<Program>, Error> {
        Ok(programs::list(&*self.pool).await?)
    }
}
