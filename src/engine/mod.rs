use crate::config::ConnectionConfig;
use crate::error::DriverError;
use async_trait::async_trait;
use serde::Serialize;

/// Rows returned by a read-like statement. Cells are rendered as text,
/// `None` standing for SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// Opens connections to a database engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlConnection>, DriverError>;
}

/// A live connection. Implementations run one statement at a time.
#[async_trait]
pub trait SqlConnection: Send {
    /// Runs a statement and fetches its full result set.
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError>;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;

    /// Releases the connection. Errors while closing are not reported.
    async fn close(self: Box<Self>);
}

pub mod postgres;
pub mod sqlite;
