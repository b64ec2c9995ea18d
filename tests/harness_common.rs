#![allow(dead_code)]

use async_trait::async_trait;
use citus_check::config::{ConnectionConfig, HarnessConfig, RetryPolicy};
use citus_check::connector::Connector;
use citus_check::engine::sqlite::SqliteDriver;
use citus_check::engine::{Driver, ResultSet, SqlConnection};
use citus_check::error::{DriverError, DriverErrorKind};
use citus_check::events::{EventSink, RecordingSink};
use citus_check::session::Session;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const SCHEMA: &str = "
-- orders schema
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER NOT NULL,
    total_cents INTEGER NOT NULL
);
";

pub const SEED: &str = "
INSERT INTO orders (id, customer_id, total_cents) VALUES (1, 10, 1200);
INSERT INTO orders (id, customer_id, total_cents) VALUES (2, 11, 3400);
INSERT INTO orders (id, customer_id, total_cents) VALUES (3, 10, 560);
";

pub const QUERIES: &str = "
-- row count
SELECT count(*) FROM orders;
";

/// A temporary directory holding the SQLite file and the SQL scripts.
pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cluster.db");
        Self { dir, db_path }
    }

    pub fn driver(&self) -> SqliteDriver {
        SqliteDriver::new(self.db_path.clone())
    }

    pub fn sql_dir(&self) -> PathBuf {
        let dir = self.dir.path().join("sql");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write_script(&self, name: &str, text: &str) {
        std::fs::write(self.sql_dir().join(format!("{}.sql", name)), text).unwrap();
    }

    /// Writes the default orders scripts under their logical names.
    pub fn write_orders_scripts(&self) {
        self.write_script("create_tables", SCHEMA);
        self.write_script("insert_test_data", SEED);
        self.write_script("queries", QUERIES);
    }

    pub fn config(&self) -> HarnessConfig {
        fast_config(&self.sql_dir())
    }
}

/// Defaults with every wait set to zero.
pub fn fast_config(sql_dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.connect_retry = RetryPolicy::new(3, 0);
    config.reconnect_retry = RetryPolicy::new(3, 0);
    config.recovery.settle_delay_ms = 0;
    config.scripts.dir = sql_dir.to_path_buf();
    config
}

pub fn connector(driver: Arc<dyn Driver>, events: Arc<dyn EventSink>) -> Connector {
    Connector::new(driver, ConnectionConfig::default(), events)
}

pub async fn open_session(driver: Arc<dyn Driver>) -> Session {
    connector(driver, Arc::new(RecordingSink::new()))
        .connect(&RetryPolicy::new(1, 0))
        .await
        .unwrap()
}

/// Wraps another driver, failing selected `open` calls and counting
/// opened/closed connections.
pub struct FlakyDriver {
    inner: Arc<dyn Driver>,
    fail_first: u32,
    succeed_limit: Option<u32>,
    kind: DriverErrorKind,
    pub attempts: AtomicU32,
    pub successes: AtomicU32,
    pub closed: Arc<AtomicU32>,
}

impl FlakyDriver {
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        Self {
            inner,
            fail_first: 0,
            succeed_limit: None,
            kind: DriverErrorKind::Connectivity,
            attempts: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            closed: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The first `n` opens fail.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Every open after the first `n` successful ones fails.
    pub fn succeeding_only(mut self, n: u32) -> Self {
        self.succeed_limit = Some(n);
        self
    }

    pub fn with_kind(mut self, kind: DriverErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for FlakyDriver {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlConnection>, DriverError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let limit_reached = self
            .succeed_limit
            .map(|limit| self.successes.load(Ordering::SeqCst) >= limit)
            .unwrap_or(false);
        if attempt <= self.fail_first || limit_reached {
            return Err(DriverError {
                kind: self.kind,
                message: format!("simulated failure on attempt {}", attempt),
            });
        }
        let conn = self.inner.open(config).await?;
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingConnection {
            inner: conn,
            closed: self.closed.clone(),
        }))
    }
}

struct CountingConnection {
    inner: Box<dyn SqlConnection>,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl SqlConnection for CountingConnection {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        self.inner.query(sql).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.inner.execute(sql).await
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }
}

/// Opens each SQLite file in turn, sticking to the last one. Simulates a
/// reconnect that lands on a server which lost its data.
pub struct SwitchingDriver {
    paths: Vec<PathBuf>,
    next: AtomicUsize,
}

impl SwitchingDriver {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Driver for SwitchingDriver {
    fn name(&self) -> &'static str {
        "switching"
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlConnection>, DriverError> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst).min(self.paths.len() - 1);
        SqliteDriver::new(self.paths[idx].clone()).open(config).await
    }
}
