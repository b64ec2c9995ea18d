//! ### 修改记录 (2026-10-12)
//! - 原因: 协调节点启动较慢, 单次连接不可靠
//! - 目的: 有界重试, 预算耗尽后返回最后一次错误

use crate::config::{ConnectionConfig, RetryPolicy};
use crate::engine::Driver;
use crate::error::{DriverError, HarnessError, Result};
use crate::events::{EventSink, HarnessEvent};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;

/// Attempts left and the wait between them.
///
/// Consumed one attempt at a time and never replenished; a new connect
/// sequence builds a new budget from its `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_attempts: u32,
    used: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            used: 0,
            delay: policy.delay(),
        }
    }

    /// Claims the next attempt, returning its 1-based number.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.used >= self.max_attempts {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.used
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Opens sessions against the configured coordinator.
///
/// The connection parameters are fixed at construction; the retry policy is
/// supplied per call so that the initial connect and the recovery reconnect
/// can run on separate budgets.
#[derive(Clone)]
pub struct Connector {
    driver: Arc<dyn Driver>,
    config: ConnectionConfig,
    events: Arc<dyn EventSink>,
}

impl Connector {
    pub fn new(driver: Arc<dyn Driver>, config: ConnectionConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            driver,
            config,
            events,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a session, retrying transient connectivity failures.
    ///
    /// Only `DriverErrorKind::Connectivity` is retried. A `Rejected` error
    /// (bad credentials, unknown database, missing privilege) ends the
    /// sequence after that attempt, so `ConnectionFailure::attempts` can be
    /// lower than the policy allows.
    ///
    /// # Arguments
    ///
    /// * `policy` - Total attempts (first one included) and the delay between them.
    ///
    /// # Returns
    ///
    /// * `Result<Session>` - An open session in autocommit mode, or
    ///   `ConnectionFailure` carrying the last driver error once the budget is
    ///   spent. A non-transient refusal ends the sequence early.
    pub async fn connect(&self, policy: &RetryPolicy) -> Result<Session> {
        let mut budget = RetryBudget::new(policy);
        let target = self.config.target();
        let mut last_error: Option<DriverError> = None;

        while let Some(attempt) = budget.next_attempt() {
            self.events.emit(HarnessEvent::ConnectAttempt {
                target: target.clone(),
                attempt,
                max_attempts: budget.max_attempts(),
            });

            match self.driver.open(&self.config).await {
                Ok(conn) => {
                    self.events.emit(HarnessEvent::Connected {
                        target: target.clone(),
                        attempts: attempt,
                    });
                    return Ok(Session::new(target, conn));
                }
                Err(e) => {
                    let will_retry = e.is_transient() && budget.remaining() > 0;
                    self.events.emit(HarnessEvent::ConnectFailed {
                        attempt,
                        error: e.message.clone(),
                        will_retry,
                    });
                    let transient = e.is_transient();
                    last_error = Some(e);
                    if !transient {
                        break;
                    }
                    if will_retry {
                        tokio::time::sleep(budget.delay()).await;
                    }
                }
            }
        }

        Err(HarnessError::ConnectionFailure {
            attempts: budget.used(),
            last_error: last_error
                .unwrap_or_else(|| DriverError::connectivity("retry budget is empty")),
        })
    }

    /// Closes `session` and reports it. Safe on an already closed session.
    pub async fn disconnect(&self, session: &mut Session) {
        if session.close().await {
            self.events.emit(HarnessEvent::SessionClosed {
                target: session.target().to_string(),
            });
        }
    }
}
