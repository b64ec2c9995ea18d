//! Disconnect / reconnect probe.
//!
//! ```text
//! Connected -> Disconnecting -> Disconnected -> Reconnecting -> Verified
//!     |                                             |              |
//!     +------------------> Failed <-----------------+--------------+
//! ```

use crate::config::{RetryPolicy, ScriptPolicy};
use crate::connector::Connector;
use crate::error::{HarnessError, Result};
use crate::events::{EventSink, HarnessEvent};
use crate::script::{Script, ScriptOutcome, ScriptRunner};
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProbeState {
    Connected,
    Disconnecting,
    Disconnected,
    Reconnecting,
    /// Reconnected and the verification script passed again.
    Verified,
    Failed(String),
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeState::Connected => f.write_str("connected"),
            ProbeState::Disconnecting => f.write_str("disconnecting"),
            ProbeState::Disconnected => f.write_str("disconnected"),
            ProbeState::Reconnecting => f.write_str("reconnecting"),
            ProbeState::Verified => f.write_str("connected (verified)"),
            ProbeState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything the probe went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub transitions: Vec<ProbeState>,
    pub baseline: Option<ScriptOutcome>,
    pub post_recovery: Option<ScriptOutcome>,
}

impl RecoveryReport {
    pub fn final_state(&self) -> &ProbeState {
        self.transitions.last().unwrap_or(&ProbeState::Connected)
    }

    pub fn is_verified(&self) -> bool {
        *self.final_state() == ProbeState::Verified
    }

    /// Converts a failed probe into `RecoveryFailure`.
    pub fn into_result(self) -> Result<Self> {
        match self.final_state() {
            ProbeState::Verified => Ok(self),
            ProbeState::Failed(reason) => Err(HarnessError::RecoveryFailure {
                reason: reason.clone(),
            }),
            other => Err(HarnessError::RecoveryFailure {
                reason: format!("probe stopped in state '{}'", other),
            }),
        }
    }
}

pub struct RecoveryProbe {
    connector: Connector,
    runner: ScriptRunner,
    retry: RetryPolicy,
    settle_delay: Duration,
    policy: ScriptPolicy,
    events: Arc<dyn EventSink>,
}

impl RecoveryProbe {
    pub fn new(
        connector: Connector,
        retry: RetryPolicy,
        settle_delay: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            runner: ScriptRunner::new(events.clone()),
            connector,
            retry,
            settle_delay,
            policy: ScriptPolicy::BestEffort,
            events,
        }
    }

    /// Judges both verification runs with `policy` instead of the default best effort.
    pub fn with_policy(mut self, policy: ScriptPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs the full cycle on `session`.
    ///
    /// On success `session` holds the new connection. When the reconnect is
    /// exhausted `session` is left closed. Only `NoActiveSession` is returned
    /// as an error; every other failure ends in `ProbeState::Failed`.
    pub async fn run(&self, session: &mut Session, verification: &Script) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            transitions: Vec::new(),
            baseline: None,
            post_recovery: None,
        };
        self.enter(&mut report, ProbeState::Connected);

        let baseline = self.runner.run(session, verification).await?;
        let baseline_ok = baseline.satisfies(self.policy);
        report.baseline = Some(baseline);
        if !baseline_ok {
            self.enter(&mut report, ProbeState::Failed("baseline verification failed".to_string()));
            return Ok(report);
        }

        self.enter(&mut report, ProbeState::Disconnecting);
        self.connector.disconnect(session).await;
        self.enter(&mut report, ProbeState::Disconnected);

        tokio::time::sleep(self.settle_delay).await;

        self.enter(&mut report, ProbeState::Reconnecting);
        match self.connector.connect(&self.retry).await {
            Ok(fresh) => *session = fresh,
            Err(e) => {
                self.enter(&mut report, ProbeState::Failed(format!("reconnect failed: {}", e)));
                return Ok(report);
            }
        }

        let post = self.runner.run(session, verification).await?;
        let post_ok = post.satisfies(self.policy);
        report.post_recovery = Some(post);
        if post_ok {
            self.enter(&mut report, ProbeState::Verified);
        } else {
            self.enter(
                &mut report,
                ProbeState::Failed("post-recovery verification failed".to_string()),
            );
        }
        Ok(report)
    }

    fn enter(&self, report: &mut RecoveryReport, state: ProbeState) {
        self.events.emit(HarnessEvent::RecoveryTransition {
            state: state.to_string(),
        });
        report.transitions.push(state);
    }
}
