//! ### 修改记录 (2026-10-15)
//! - 原因: 需要按阶段串联连接/建表/造数/查询/健康检查/恢复探针
//! - 目的: 任一门控阶段失败即停止, 且所有路径都关闭会话

use crate::config::{HarnessConfig, ScriptPolicy};
use crate::connector::Connector;
use crate::engine::Driver;
use crate::error::HarnessError;
use crate::events::{EventSink, HarnessEvent};
use crate::health::{HealthInspector, HealthReport};
use crate::recovery::{RecoveryProbe, RecoveryReport};
use crate::script::{ScriptOutcome, ScriptRunner, ScriptSource};
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connect,
    Schema,
    Seed,
    Queries,
    Health,
    Recovery,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Schema => "schema",
            Phase::Seed => "seed",
            Phase::Queries => "queries",
            Phase::Health => "health",
            Phase::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScriptOutcome>,
}

/// Final result of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub passed: bool,
    pub phases: Vec<PhaseRecord>,
    pub health: Option<HealthReport>,
    pub recovery: Option<RecoveryReport>,
    pub failure: Option<String>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            passed: false,
            phases: Vec::new(),
            health: None,
            recovery: None,
            failure: None,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// Why the sequence stopped.
#[derive(Debug)]
struct Halt {
    phase: Phase,
    reason: String,
}

impl Halt {
    fn new(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            reason: reason.into(),
        }
    }

    fn from_error(phase: Phase, e: HarnessError) -> Self {
        Self::new(phase, e.to_string())
    }
}

/// Runs connect, schema, seed, queries, health and recovery in that order.
///
/// Every phase except the health check gates the next one. The session is
/// closed on every exit path.
pub struct TestOrchestrator {
    config: HarnessConfig,
    connector: Connector,
    scripts: Arc<dyn ScriptSource>,
    events: Arc<dyn EventSink>,
}

impl TestOrchestrator {
    pub fn new(
        config: HarnessConfig,
        driver: Arc<dyn Driver>,
        scripts: Arc<dyn ScriptSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let connector = Connector::new(driver, config.connection.clone(), events.clone());
        Self {
            config,
            connector,
            scripts,
            events,
        }
    }

    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, coordinator = %self.config.connection.target());
        async move {
            let mut report = RunReport::new(run_id);
            let mut session: Option<Session> = None;

            let result = self.run_phases(&mut session, &mut report).await;

            if let Some(session) = session.as_mut() {
                self.connector.disconnect(session).await;
            }

            match result {
                Ok(()) => report.passed = true,
                Err(halt) => {
                    report.failure = Some(format!("{} phase: {}", halt.phase, halt.reason));
                }
            }
            self.events.emit(HarnessEvent::Verdict {
                passed: report.passed,
                reason: report.failure.clone(),
            });
            report
        }
        .instrument(span)
        .await
    }

    async fn run_phases(
        &self,
        slot: &mut Option<Session>,
        report: &mut RunReport,
    ) -> Result<(), Halt> {
        self.start(Phase::Connect);
        match self.connector.connect(&self.config.connect_retry).await {
            Ok(session) => {
                *slot = Some(session);
                self.finish(report, Phase::Connect, true, None, None);
            }
            Err(e) => {
                let halt = Halt::from_error(Phase::Connect, e);
                self.finish(report, Phase::Connect, false, Some(halt.reason.clone()), None);
                return Err(halt);
            }
        }
        let session = slot
            .as_mut()
            .ok_or_else(|| Halt::from_error(Phase::Connect, HarnessError::NoActiveSession))?;

        let scripts = &self.config.scripts;
        self.script_phase(session, report, Phase::Schema, &scripts.schema, scripts.schema_policy)
            .await?;
        self.script_phase(session, report, Phase::Seed, &scripts.seed, scripts.seed_policy)
            .await?;
        self.script_phase(session, report, Phase::Queries, &scripts.queries, scripts.queries_policy)
            .await?;

        // Informational only: the outcome never stops the run.
        self.start(Phase::Health);
        let inspector = HealthInspector::new(self.config.health.clone());
        match inspector.check(session).await {
            Ok(health) => {
                self.events.emit(HarnessEvent::HealthChecked {
                    report: health.clone(),
                });
                let healthy = health.is_healthy();
                report.health = Some(health);
                self.finish(report, Phase::Health, healthy, None, None);
            }
            Err(e) => {
                let halt = Halt::from_error(Phase::Health, e);
                self.finish(report, Phase::Health, false, Some(halt.reason.clone()), None);
                return Err(halt);
            }
        }

        self.start(Phase::Recovery);
        let verification = self
            .scripts
            .load(&scripts.verification)
            .map_err(|e| self.halt(report, Phase::Recovery, e))?;
        let probe = RecoveryProbe::new(
            self.connector.clone(),
            self.config.reconnect_retry,
            self.config.recovery.settle_delay(),
            self.events.clone(),
        )
        .with_policy(scripts.queries_policy);
        let recovery = probe
            .run(session, &verification)
            .await
            .map_err(|e| self.halt(report, Phase::Recovery, e))?;
        report.recovery = Some(recovery.clone());
        recovery
            .into_result()
            .map_err(|e| self.halt(report, Phase::Recovery, e))?;
        self.finish(report, Phase::Recovery, true, None, None);

        Ok(())
    }

    async fn script_phase(
        &self,
        session: &mut Session,
        report: &mut RunReport,
        phase: Phase,
        name: &str,
        policy: ScriptPolicy,
    ) -> Result<(), Halt> {
        self.start(phase);
        let runner = ScriptRunner::new(self.events.clone());
        let outcome = runner
            .run_named(session, self.scripts.as_ref(), name)
            .await
            .map_err(|e| self.halt(report, phase, e))?;

        if outcome.satisfies(policy) {
            self.finish(report, phase, true, None, Some(outcome));
            return Ok(());
        }

        let mut reason = match policy {
            ScriptPolicy::BestEffort => format!(
                "script '{}' had no successful statement ({} failed)",
                name, outcome.failed
            ),
            ScriptPolicy::Strict => format!(
                "script '{}' requires every statement to succeed ({} of {} failed)",
                name, outcome.failed, outcome.executed
            ),
        };
        if let Some(first) = outcome.failures.first() {
            reason.push_str(&format!(
                "; first failure at statement {}: {}",
                first.index + 1,
                first.error
            ));
        }
        self.finish(report, phase, false, Some(reason.clone()), Some(outcome));
        Err(Halt::new(phase, reason))
    }

    fn halt(&self, report: &mut RunReport, phase: Phase, e: HarnessError) -> Halt {
        let halt = Halt::from_error(phase, e);
        self.finish(report, phase, false, Some(halt.reason.clone()), None);
        halt
    }

    fn start(&self, phase: Phase) {
        self.events.emit(HarnessEvent::PhaseStarted {
            phase: phase.to_string(),
        });
    }

    fn finish(
        &self,
        report: &mut RunReport,
        phase: Phase,
        passed: bool,
        detail: Option<String>,
        outcome: Option<ScriptOutcome>,
    ) {
        self.events.emit(HarnessEvent::PhaseFinished {
            phase: phase.to_string(),
            passed,
        });
        report.phases.push(PhaseRecord {
            phase,
            passed,
            detail,
            outcome,
        });
    }
}
