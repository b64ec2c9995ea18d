use crate::engine::{ResultSet, SqlConnection};
use crate::error::DriverError;
use std::fmt;

/// The one live database session of a run.
///
/// Created by the `Connector`, closed by whoever owns it last (the
/// orchestrator or the recovery probe). A closed session stays around as a
/// value so that later operations fail with `NoActiveSession` instead of
/// reconnecting behind the caller's back.
pub struct Session {
    target: String,
    conn: Option<Box<dyn SqlConnection>>,
    autocommit: bool,
    in_transaction: bool,
}

impl Session {
    /// Wraps a freshly opened connection. New sessions are in autocommit mode.
    pub fn new(target: impl Into<String>, conn: Box<dyn SqlConnection>) -> Self {
        Self {
            target: target.into(),
            conn: Some(conn),
            autocommit: true,
            in_transaction: false,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// ### 修改记录 (2026-10-13)
    /// - 原因: 需要覆盖非自动提交下的 commit/rollback 路径
    /// - 目的: 关闭自动提交后在下一条语句前隐式 BEGIN
    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        self.begin_if_needed().await?;
        self.connection()?.query(sql).await
    }

    pub async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.begin_if_needed().await?;
        self.connection()?.execute(sql).await
    }

    /// Commits the open transaction. No-op under autocommit.
    pub async fn commit(&mut self) -> Result<(), DriverError> {
        self.finish("COMMIT").await
    }

    /// Rolls back the open transaction. No-op under autocommit or when no
    /// transaction is open, so calling it twice is harmless.
    pub async fn rollback(&mut self) -> Result<(), DriverError> {
        self.finish("ROLLBACK").await
    }

    /// Closes the session. Closing an already closed session does nothing.
    /// Returns `true` when a connection was actually released.
    pub async fn close(&mut self) -> bool {
        self.in_transaction = false;
        match self.conn.take() {
            Some(conn) => {
                conn.close().await;
                true
            }
            None => false,
        }
    }

    fn connection(&mut self) -> Result<&mut Box<dyn SqlConnection>, DriverError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::connectivity("session is closed"))
    }

    async fn begin_if_needed(&mut self) -> Result<(), DriverError> {
        if self.autocommit || self.in_transaction {
            return Ok(());
        }
        self.connection()?.execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn finish(&mut self, verb: &str) -> Result<(), DriverError> {
        if self.autocommit || !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.connection()?.execute(verb).await.map(|_| ())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}
