use crate::config::HealthQueries;
use crate::error::{HarnessError, Result};
use crate::executor::{self, ExecutionOutcome};
use crate::session::Session;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Coordinator,
    Workers,
    DistributedTables,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Coordinator => "coordinator",
            Component::Workers => "workers",
            Component::DistributedTables => "distributed_tables",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail")]
pub enum HealthStatus {
    #[serde(rename = "OK")]
    Ok(String),
    #[serde(rename = "WARNING")]
    Warning(String),
    #[serde(rename = "ERROR")]
    Error(String),
}

/// Status without its detail, for comparing two reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Ok,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn level(&self) -> HealthLevel {
        match self {
            HealthStatus::Ok(_) => HealthLevel::Ok,
            HealthStatus::Warning(_) => HealthLevel::Warning,
            HealthStatus::Error(_) => HealthLevel::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.level() == HealthLevel::Ok
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok(detail) if detail.is_empty() => f.write_str("OK"),
            HealthStatus::Ok(detail) => write!(f, "OK ({})", detail),
            HealthStatus::Warning(detail) => write!(f, "WARNING: {}", detail),
            HealthStatus::Error(cause) => write!(f, "ERROR: {}", cause),
        }
    }
}

/// Per-component health, built fresh on every check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    components: BTreeMap<Component, HealthStatus>,
}

impl HealthReport {
    pub fn get(&self, component: Component) -> Option<&HealthStatus> {
        self.components.get(&component)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Component, &HealthStatus)> {
        self.components.iter()
    }

    pub fn levels(&self) -> BTreeMap<Component, HealthLevel> {
        self.components
            .iter()
            .map(|(c, s)| (*c, s.level()))
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.components.values().all(HealthStatus::is_ok)
    }

    fn set(&mut self, component: Component, status: HealthStatus) {
        self.components.insert(component, status);
    }
}

/// Runs the cluster introspection queries.
#[derive(Debug, Clone, Default)]
pub struct HealthInspector {
    queries: HealthQueries,
}

impl HealthInspector {
    pub fn new(queries: HealthQueries) -> Self {
        Self { queries }
    }

    /// Checks coordinator, workers and distributed tables.
    ///
    /// Each query runs on its own; a failing one only marks its own
    /// component as `ERROR`. Fails only with `NoActiveSession`.
    pub async fn check(&self, session: &mut Session) -> Result<HealthReport> {
        if !session.is_open() {
            return Err(HarnessError::NoActiveSession);
        }
        let mut report = HealthReport::default();

        let coordinator = executor::execute(session, &self.queries.coordinator).await?;
        report.set(
            Component::Coordinator,
            classify(coordinator, |_| HealthStatus::Ok(String::new()), || {
                HealthStatus::Error("coordinator node not found".to_string())
            }),
        );

        let workers = executor::execute(session, &self.queries.workers).await?;
        report.set(
            Component::Workers,
            classify(
                workers,
                |n| HealthStatus::Ok(format!("{} active workers", n)),
                || HealthStatus::Error("no active worker nodes".to_string()),
            ),
        );

        let tables = executor::execute(session, &self.queries.distributed_tables).await?;
        report.set(
            Component::DistributedTables,
            classify(
                tables,
                |n| HealthStatus::Ok(format!("{} tables", n)),
                || HealthStatus::Warning("no distributed tables found".to_string()),
            ),
        );

        Ok(report)
    }
}

fn classify(
    outcome: ExecutionOutcome,
    non_empty: impl FnOnce(usize) -> HealthStatus,
    empty: impl FnOnce() -> HealthStatus,
) -> HealthStatus {
    match outcome {
        ExecutionOutcome::Rows(rows) if rows.is_empty() => empty(),
        ExecutionOutcome::Rows(rows) => non_empty(rows.len()),
        ExecutionOutcome::Count(_) => HealthStatus::Error("query returned no row set".to_string()),
        ExecutionOutcome::Failed(cause) => HealthStatus::Error(cause),
    }
}
