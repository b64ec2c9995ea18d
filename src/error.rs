//! Error taxonomy for the harness.
//!
//! Statement-level failures are not errors here: they are folded into
//! `ExecutionOutcome::Failed` and tallied by the script runner. Everything
//! in `HarnessError` propagates up to the orchestrator.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Retry budget exhausted while opening a session.
    #[error("connection failed after {attempts} attempt(s): {last_error}")]
    ConnectionFailure { attempts: u32, last_error: DriverError },

    /// A script resource could not be located.
    #[error("script resource '{name}' not found at {location}")]
    ResourceNotFound { name: String, location: String },

    /// An operation needed an open session and there was none.
    #[error("no active session")]
    NoActiveSession,

    /// The recovery probe could not re-establish or re-verify the session.
    #[error("recovery failed: {reason}")]
    RecoveryFailure { reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// ### 修改记录 (2026-10-12)
/// - 原因: 需要区分可重试的连接错误与不可重试的拒绝
/// - 目的: 连接器只对 Connectivity 消耗重试预算后继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Transport-level failure (refused, reset, timed out, server starting up).
    Connectivity,
    /// The server answered but refused the session (bad credentials, unknown database).
    Rejected,
    /// A statement failed on an otherwise healthy session.
    Statement,
}

/// Error surfaced by an engine driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Connectivity,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Statement,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DriverErrorKind::Connectivity
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DriverError {}

pub type Result<T> = std::result::Result<T, HarnessError>;
