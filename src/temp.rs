use std::sync::LazyLock;

use pgtemp::{PgTempDB, PgTempDBBuilder};
use tokio::sync::OnceCell;

use crate::AwardDb;

/// Whether to keep the temporary directory after the award DB is dropped
///
/// This is set to `false` by default, but can be overridden by the
/// `KEEP_TEMP_DIRS` environment variable.
pub static KEEP_TEMP_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("KEEP_TEMP_DIRS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});

/// Temporary award DB
///
/// This is a wrapper around the award DB that creates a temporary database.
/// On drop, the database is deleted.
pub struct TempAwardDb {
    /// Inner award DB handle
    inner: AwardDb,

    /// Temporary database handle
    ///
    /// On drop, the database is deleted.
    _temp_db: PgTempDB,
}

impl TempAwardDb {
    /// Create a new temporary award DB
    pub async fn new(keep: bool, pool_size: u32) -> Self {
        let builder = PgTempDBBuilder::new().persist_data(keep);
        let pg_temp = PgTempDB::from_builder(builder);

        let data_dir = pg_temp.data_dir();
        tracing::info!("initializing temp award-db at: {}", data_dir.display());
        let uri = pg_temp.connection_uri();
        tracing::info!("connecting to award-db at: {}", uri);

        let award_db = AwardDb::connect_with_retry(&uri, pool_size)
            .await
            .expect("failed to connect to award-db");

        TempAwardDb {
            inner: award_db,
            _temp_db: pg_temp,
        }
    }

    /// Get the URL of the temporary award DB
    pub fn url(&self) -> &str {
        self.inner.url.as_ref()
    }
}

impl std::ops::Deref for TempAwardDb {
    type Target = AwardDb;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Temp award db for sharing among tests. It is shared with the reasoning
/// that this helps us catch more bugs, even if it is less deterministic.
static TEMP_AWARD_DB: OnceCell<TempAwardDb> = OnceCell::const_new();

/// Get the temporary award DB
///
/// This is a shared instance of the temporary award DB that can be used by
/// tests.
///
/// The `keep` parameter controls whether the temporary directory is kept
/// after the award DB is dropped.
pub async fn temp_award_db(keep: bool, pool_size: u32) -> &'static TempAwardDb {
    TEMP_AWARD_DB
        .get_or_init(|| async { TempAwardDb::new(keep, pool_size).await })
        .await
}
