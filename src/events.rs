//! Structured progress events.
//!
//! Control flow hands `HarnessEvent`s to an `EventSink` and keeps going; it
//! never reads them back. `TracingSink` turns them into log lines and
//! `RecordingSink` keeps them for assertions.

use crate::health::HealthReport;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    PhaseStarted {
        phase: String,
    },
    PhaseFinished {
        phase: String,
        passed: bool,
    },
    ConnectAttempt {
        target: String,
        attempt: u32,
        max_attempts: u32,
    },
    ConnectFailed {
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    Connected {
        target: String,
        attempts: u32,
    },
    SessionClosed {
        target: String,
    },
    StatementSucceeded {
        script: String,
        index: usize,
        total: usize,
    },
    StatementFailed {
        script: String,
        index: usize,
        total: usize,
        error: String,
    },
    ScriptFinished {
        script: String,
        succeeded: usize,
        failed: usize,
    },
    HealthChecked {
        report: HealthReport,
    },
    RecoveryTransition {
        state: String,
    },
    Verdict {
        passed: bool,
        reason: Option<String>,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: HarnessEvent);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: HarnessEvent) {
        match event {
            HarnessEvent::PhaseStarted { phase } => info!(%phase, "phase started"),
            HarnessEvent::PhaseFinished { phase, passed } => {
                if passed {
                    info!(%phase, "phase passed");
                } else {
                    error!(%phase, "phase failed");
                }
            }
            HarnessEvent::ConnectAttempt {
                target,
                attempt,
                max_attempts,
            } => info!(coordinator = %target, attempt, max_attempts, "attempting to connect"),
            HarnessEvent::ConnectFailed {
                attempt,
                error,
                will_retry,
            } => {
                if will_retry {
                    warn!(attempt, %error, "connection attempt failed, retrying");
                } else {
                    error!(attempt, %error, "connection attempt failed");
                }
            }
            HarnessEvent::Connected { target, attempts } => {
                info!(coordinator = %target, attempts, "connected")
            }
            HarnessEvent::SessionClosed { target } => info!(coordinator = %target, "session closed"),
            HarnessEvent::StatementSucceeded {
                script,
                index,
                total,
            } => info!(%script, statement = index + 1, total, "statement succeeded"),
            HarnessEvent::StatementFailed {
                script,
                index,
                total,
                error,
            } => warn!(
                %script,
                statement = index + 1,
                total,
                %error,
                "statement failed, continuing"
            ),
            HarnessEvent::ScriptFinished {
                script,
                succeeded,
                failed,
            } => info!(%script, succeeded, failed, "script finished"),
            HarnessEvent::HealthChecked { report } => {
                for (component, status) in report.iter() {
                    if status.is_ok() {
                        info!(component = component.as_str(), status = %status, "health");
                    } else {
                        warn!(component = component.as_str(), status = %status, "health");
                    }
                }
            }
            HarnessEvent::RecoveryTransition { state } => info!(%state, "recovery probe"),
            HarnessEvent::Verdict { passed, reason } => {
                if passed {
                    info!("all checks passed");
                } else {
                    error!(reason = reason.as_deref().unwrap_or("unknown"), "checks failed");
                }
            }
        }
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<HarnessEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HarnessEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn connect_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HarnessEvent::ConnectAttempt { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: HarnessEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
