use crate::config::ConnectionConfig;
use crate::engine::{Driver, ResultSet, SqlConnection};
use crate::error::DriverError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

/// PostgreSQL wire-protocol driver, used against the Citus coordinator.
///
/// Statements go through the simple-query protocol, so every value comes back
/// as text and scripts can carry arbitrary SQL without parameter binding.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    connect_timeout: Duration,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PostgresDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SqlConnection>, DriverError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .connect_timeout(self.connect_timeout);

        let (client, connection) = pg.connect(NoTls).await.map_err(classify_connect_error)?;
        // The connection object drives the socket; it has to be polled on its own task.
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "postgres connection task ended with error");
            }
        });
        Ok(Box::new(PostgresConnection { client, task }))
    }
}

struct PostgresConnection {
    client: Client,
    task: JoinHandle<()>,
}

impl PostgresConnection {
    async fn run(&self, sql: &str) -> Result<Vec<SimpleQueryMessage>, DriverError> {
        self.client
            .simple_query(sql)
            .await
            .map_err(|e| classify_statement_error(&self.client, e))
    }
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        let messages = self.run(sql).await?;
        let mut result = ResultSet::default();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if result.columns.is_empty() {
                    result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                let cells = (0..row.len())
                    .map(|i| row.get(i).map(|v| v.to_string()))
                    .collect();
                result.rows.push(cells);
            }
        }
        Ok(result)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        let messages = self.run(sql).await?;
        let mut affected = 0;
        for message in messages {
            if let SimpleQueryMessage::CommandComplete(rows) = message {
                affected = rows;
            }
        }
        Ok(affected)
    }

    async fn close(self: Box<Self>) {
        let PostgresConnection { client, task } = *self;
        drop(client);
        task.abort();
    }
}

/// Connect-time errors without a SQLSTATE are transport failures. Among
/// server-reported ones only class 08 and `57P03` (starting up) are worth
/// retrying.
fn classify_connect_error(e: tokio_postgres::Error) -> DriverError {
    match e.code() {
        None => DriverError::connectivity(e.to_string()),
        Some(state) if state.code().starts_with("08") || state.code() == "57P03" => {
            DriverError::connectivity(describe(&e))
        }
        Some(_) => DriverError::rejected(describe(&e)),
    }
}

fn classify_statement_error(client: &Client, e: tokio_postgres::Error) -> DriverError {
    if client.is_closed() {
        DriverError::connectivity(describe(&e))
    } else {
        DriverError::statement(describe(&e))
    }
}

fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{}: {} ({})", db.severity(), db.message(), db.code().code()),
        None => e.to_string(),
    }
}
