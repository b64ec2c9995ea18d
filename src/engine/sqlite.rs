use crate::config::ConnectionConfig;
use crate::engine::{Driver, ResultSet, SqlConnection};
use crate::error::DriverError;
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::PathBuf;
use std::thread;
use tokio::sync::{mpsc, oneshot};

/// SQLite driver.
///
/// Stands in for the cluster when running locally without Citus, and backs the
/// test suite. Every `open` spawns a dedicated thread owning a fresh
/// `rusqlite::Connection` on the same file, so data survives a
/// disconnect/reconnect cycle the way it would on a real server.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    path: PathBuf,
}

impl SqliteDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn SqlConnection>, DriverError> {
        let handle = SqliteHandle::spawn(self.path.clone()).await?;
        Ok(Box::new(handle))
    }
}

/// Messages understood by the connection actor.
enum SqliteMessage {
    Query {
        sql: String,
        resp: oneshot::Sender<Result<ResultSet, DriverError>>,
    },
    Execute {
        sql: String,
        resp: oneshot::Sender<Result<u64, DriverError>>,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

/// Handle to a connection actor. `rusqlite::Connection` is `!Sync`, so the
/// connection stays on its own thread and is only reached through messages.
struct SqliteHandle {
    sender: mpsc::Sender<SqliteMessage>,
}

impl SqliteHandle {
    async fn spawn(path: PathBuf) -> Result<Self, DriverError> {
        let (tx, mut rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::spawn(move || {
            let conn = match Connection::open(&path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    conn
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(DriverError::connectivity(format!(
                        "failed to open {}: {}",
                        path.display(),
                        e
                    ))));
                    return;
                }
            };
            let mut actor = SqliteActor { conn: Some(conn) };
            while let Some(msg) = rx.blocking_recv() {
                if !actor.handle_message(msg) {
                    break;
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| DriverError::connectivity("sqlite actor exited during open"))??;
        Ok(Self { sender: tx })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, DriverError>>) -> SqliteMessage,
    ) -> Result<T, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| DriverError::connectivity("sqlite actor died"))?;
        rx.await
            .map_err(|_| DriverError::connectivity("sqlite actor died"))?
    }
}

#[async_trait]
impl SqlConnection for SqliteHandle {
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        let sql = sql.to_string();
        self.request(|resp| SqliteMessage::Query { sql, resp }).await
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        let sql = sql.to_string();
        self.request(|resp| SqliteMessage::Execute { sql, resp }).await
    }

    async fn close(self: Box<Self>) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(SqliteMessage::Close { resp: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct SqliteActor {
    conn: Option<Connection>,
}

impl SqliteActor {
    /// Returns `false` once the connection has been closed.
    fn handle_message(&mut self, msg: SqliteMessage) -> bool {
        match msg {
            SqliteMessage::Query { sql, resp } => {
                let _ = resp.send(self.query(&sql));
                true
            }
            SqliteMessage::Execute { sql, resp } => {
                let res = match &self.conn {
                    Some(conn) => conn
                        .execute(&sql, [])
                        .map(|n| n as u64)
                        .map_err(|e| DriverError::statement(e.to_string())),
                    None => Err(DriverError::connectivity("connection closed")),
                };
                let _ = resp.send(res);
                true
            }
            SqliteMessage::Close { resp } => {
                if let Some(conn) = self.conn.take() {
                    let _ = conn.close();
                }
                let _ = resp.send(());
                false
            }
        }
    }

    fn query(&self, sql: &str) -> Result<ResultSet, DriverError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DriverError::connectivity("connection closed"))?;
        let run = || -> rusqlite::Result<ResultSet> {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let mut rows = Vec::new();
            let mut cursor = stmt.query([])?;
            while let Some(row) = cursor.next()? {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    cells.push(render(row.get::<_, Value>(i)?));
                }
                rows.push(cells);
            }
            Ok(ResultSet { columns, rows })
        };
        run().map_err(|e| DriverError::statement(e.to_string()))
    }
}

fn render(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(v) => Some(v),
        Value::Blob(v) => Some(String::from_utf8_lossy(&v).to_string()),
    }
}
