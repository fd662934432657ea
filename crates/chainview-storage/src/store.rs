//! The `EventDb` handle — an explicitly constructed store passed by
//! reference to everything that needs it.
//!
//! # Usage
//! ```rust,no_run
//! use chainview_core::DbSettings;
//! use chainview_storage::EventDb;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let db = EventDb::open("./events.db", DbSettings::default()).await?;
//!
//! // In-memory (tests / ephemeral)
//! let db = EventDb::in_memory(DbSettings::default()).await?;
//! # Ok(())
//! # }
//! ```

use sqlx::SqlitePool;
use tracing::debug;

use chainview_core::{DbSettings, EventDbError, ProviderKind};

/// Entity table for a provider kind.
pub(crate) fn entity_table(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Blobber => "blobbers",
        ProviderKind::Validator => "validators",
        ProviderKind::Miner => "miners",
        ProviderKind::Sharder => "sharders",
        ProviderKind::Authorizer => "authorizers",
    }
}

/// Snapshot table for a provider kind (exactly one row per provider).
pub(crate) fn snapshot_table(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Blobber => "blobber_snapshots",
        ProviderKind::Validator => "validator_snapshots",
        ProviderKind::Miner => "miner_snapshots",
        ProviderKind::Sharder => "sharder_snapshots",
        ProviderKind::Authorizer => "authorizer_snapshots",
    }
}

/// Aggregate (time-series) table for a provider kind.
pub(crate) fn aggregate_table(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Blobber => "blobber_aggregates",
        ProviderKind::Validator => "validator_aggregates",
        ProviderKind::Miner => "miner_aggregates",
        ProviderKind::Sharder => "sharder_aggregates",
        ProviderKind::Authorizer => "authorizer_aggregates",
    }
}

/// SQLite-backed event database.
///
/// Owns the connection pool and the engine settings; every component
/// receives it by reference rather than going through process-wide state.
pub struct EventDb {
    pool: SqlitePool,
    settings: DbSettings,
}

impl EventDb {
    /// Open (or create) the database at `path`.
    ///
    /// The path may be a plain file path (`"./events.db"`) or a full
    /// SQLite URL (`"sqlite:./events.db?mode=rwc"`).
    pub async fn open(path: &str, settings: DbSettings) -> Result<Self, EventDbError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| EventDbError::persistence("open", e))?;

        let db = Self { pool, settings };
        db.init_schema().await?;
        Ok(db)
    }

    /// Open an in-memory database. All data is lost when the pool drops;
    /// ideal for tests.
    ///
    /// Pinned to one connection: each `:memory:` connection is otherwise
    /// its own private database.
    pub async fn in_memory(settings: DbSettings) -> Result<Self, EventDbError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EventDbError::persistence("open", e))?;

        let db = Self { pool, settings };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn settings(&self) -> &DbSettings {
        &self.settings
    }

    pub fn page_limit(&self) -> i64 {
        self.settings.page_limit.max(1)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight statements to finish.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), EventDbError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| EventDbError::persistence("init_schema", e))?;

        for stmt in schema_statements() {
            sqlx::query(&stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| EventDbError::persistence("init_schema", e))?;
        }

        debug!("schema initialised");
        Ok(())
    }

    /// Remove every table. Destructive; intended for test/environment
    /// teardown only — never invoked from the processing path.
    pub async fn drop_tables(&self) -> Result<(), EventDbError> {
        for table in all_tables() {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table};"))
                .execute(&self.pool)
                .await
                .map_err(|e| EventDbError::Teardown(format!("dropping {table}: {e}")))?;
        }
        debug!("all tables dropped");
        Ok(())
    }
}

fn all_tables() -> Vec<&'static str> {
    let mut tables = vec![
        "events",
        "transactions",
        "blocks",
        "write_markers",
        "curators",
        "delegate_pools",
        "allocation_blobber_terms",
        "global_snapshot",
    ];
    for kind in ProviderKind::ALL {
        tables.push(entity_table(kind));
        tables.push(snapshot_table(kind));
        tables.push(aggregate_table(kind));
    }
    tables
}

fn schema_statements() -> Vec<String> {
    let mut stmts = vec![
        // Raw event log. The unique constraint is the durable dedup identity.
        "CREATE TABLE IF NOT EXISTS events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            block_number INTEGER NOT NULL,
            tx_hash      TEXT    NOT NULL,
            type         INTEGER NOT NULL,
            tag          TEXT    NOT NULL,
            idx          TEXT    NOT NULL,
            data         TEXT    NOT NULL,
            created_at   INTEGER NOT NULL,
            UNIQUE (block_number, tx_hash, tag, idx)
        );"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number);".to_string(),
        "CREATE TABLE IF NOT EXISTS transactions (
            hash         TEXT    PRIMARY KEY,
            block_hash   TEXT    NOT NULL DEFAULT '',
            round        INTEGER NOT NULL DEFAULT 0,
            client_id    TEXT    NOT NULL DEFAULT '',
            to_client_id TEXT    NOT NULL DEFAULT '',
            value        INTEGER NOT NULL DEFAULT 0,
            fee          INTEGER NOT NULL DEFAULT 0
        );"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS blocks (
            hash      TEXT    PRIMARY KEY,
            round     INTEGER NOT NULL DEFAULT 0,
            prev_hash TEXT    NOT NULL DEFAULT '',
            miner_id  TEXT    NOT NULL DEFAULT '',
            num_txns  INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL DEFAULT 0
        );"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_blocks_round ON blocks (round);".to_string(),
        "CREATE TABLE IF NOT EXISTS write_markers (
            transaction_id TEXT    PRIMARY KEY,
            allocation_id  TEXT    NOT NULL,
            blobber_id     TEXT    NOT NULL,
            client_id      TEXT    NOT NULL DEFAULT '',
            size           INTEGER NOT NULL DEFAULT 0,
            block_number   INTEGER NOT NULL DEFAULT 0
        );"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS curators (
            curator_id    TEXT NOT NULL,
            allocation_id TEXT NOT NULL,
            PRIMARY KEY (curator_id, allocation_id)
        );"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS delegate_pools (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            pool_id       TEXT    NOT NULL,
            provider_type INTEGER NOT NULL,
            provider_id   TEXT    NOT NULL,
            delegate_id   TEXT    NOT NULL DEFAULT '',
            balance       INTEGER NOT NULL DEFAULT 0,
            reward        INTEGER NOT NULL DEFAULT 0,
            total_reward  INTEGER NOT NULL DEFAULT 0,
            total_penalty INTEGER NOT NULL DEFAULT 0,
            status        INTEGER NOT NULL DEFAULT 0,
            round_created INTEGER NOT NULL DEFAULT 0,
            UNIQUE (provider_id, provider_type, pool_id)
        );"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_pools_delegate ON delegate_pools (delegate_id, status);"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS allocation_blobber_terms (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            allocation_id   TEXT    NOT NULL,
            blobber_id      TEXT    NOT NULL,
            read_price      INTEGER NOT NULL DEFAULT 0,
            write_price     INTEGER NOT NULL DEFAULT 0,
            min_lock_demand REAL    NOT NULL DEFAULT 0,
            UNIQUE (allocation_id, blobber_id)
        );"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS global_snapshot (
            id               INTEGER PRIMARY KEY CHECK (id = 1),
            round            INTEGER NOT NULL DEFAULT 0,
            total_staked     INTEGER NOT NULL DEFAULT 0,
            total_rewards    INTEGER NOT NULL DEFAULT 0,
            total_mint       INTEGER NOT NULL DEFAULT 0,
            total_burn       INTEGER NOT NULL DEFAULT 0,
            blobber_count    INTEGER NOT NULL DEFAULT 0,
            validator_count  INTEGER NOT NULL DEFAULT 0,
            miner_count      INTEGER NOT NULL DEFAULT 0,
            sharder_count    INTEGER NOT NULL DEFAULT 0,
            authorizer_count INTEGER NOT NULL DEFAULT 0
        );"
        .to_string(),
        "INSERT OR IGNORE INTO global_snapshot (id) VALUES (1);".to_string(),
    ];

    for kind in ProviderKind::ALL {
        // Blobbers carry capacity/pricing columns on top of the shared set.
        let extras = match kind {
            ProviderKind::Blobber => {
                "base_url    TEXT    NOT NULL DEFAULT '',
                 capacity    INTEGER NOT NULL DEFAULT 0,
                 allocated   INTEGER NOT NULL DEFAULT 0,
                 read_price  INTEGER NOT NULL DEFAULT 0,
                 write_price INTEGER NOT NULL DEFAULT 0,
                 saved_data  INTEGER NOT NULL DEFAULT 0"
            }
            _ => "base_url TEXT NOT NULL DEFAULT ''",
        };
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id             TEXT    PRIMARY KEY,
                bucket_id      INTEGER NOT NULL DEFAULT 0,
                status         INTEGER NOT NULL DEFAULT 0,
                fee            INTEGER NOT NULL DEFAULT 0,
                total_stake    INTEGER NOT NULL DEFAULT 0,
                total_rewards  INTEGER NOT NULL DEFAULT 0,
                total_mint     INTEGER NOT NULL DEFAULT 0,
                total_burn     INTEGER NOT NULL DEFAULT 0,
                service_charge REAL    NOT NULL DEFAULT 0,
                {extras}
            );",
            table = entity_table(kind),
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_bucket ON {table} (bucket_id);",
            table = entity_table(kind),
        ));
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                provider_id    TEXT    PRIMARY KEY,
                round          INTEGER NOT NULL,
                bucket_id      INTEGER NOT NULL,
                status         INTEGER NOT NULL DEFAULT 0,
                fee            INTEGER NOT NULL DEFAULT 0,
                total_stake    INTEGER NOT NULL DEFAULT 0,
                total_rewards  INTEGER NOT NULL DEFAULT 0,
                total_mint     INTEGER NOT NULL DEFAULT 0,
                total_burn     INTEGER NOT NULL DEFAULT 0,
                service_charge REAL    NOT NULL DEFAULT 0
            );",
            table = snapshot_table(kind),
        ));
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_id    TEXT    NOT NULL,
                round          INTEGER NOT NULL,
                bucket_id      INTEGER NOT NULL,
                fee            INTEGER NOT NULL DEFAULT 0,
                total_stake    INTEGER NOT NULL DEFAULT 0,
                total_rewards  INTEGER NOT NULL DEFAULT 0,
                total_mint     INTEGER NOT NULL DEFAULT 0,
                total_burn     INTEGER NOT NULL DEFAULT 0,
                service_charge REAL    NOT NULL DEFAULT 0,
                UNIQUE (provider_id, round)
            );",
            table = aggregate_table(kind),
        ));
    }

    stmts
}
