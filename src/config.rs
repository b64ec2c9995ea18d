use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How strictly a script phase judges its own outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPolicy {
    /// At least one statement must succeed.
    #[default]
    BestEffort,
    /// Every statement must succeed, and there must be at least one.
    Strict,
}

/// Connection target of the coordinator node.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "citus".to_string(),
            user: "citus".to_string(),
            password: "citus123".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16, database: &str, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

// ### 修改记录 (2026-10-12)
// - 原因: 派生 Debug 会把密码打进日志
// - 目的: 手写 Debug 并屏蔽 password 字段
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Bounded retry settings used to build a fresh `RetryBudget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Wait between the deliberate disconnect and the reconnect.
    pub settle_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
        }
    }
}

impl RecoveryConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Logical script names and the directory they are resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub dir: PathBuf,
    pub schema: String,
    pub seed: String,
    pub queries: String,
    /// Script run before and after the recovery probe's reconnect.
    pub verification: String,
    pub schema_policy: ScriptPolicy,
    pub seed_policy: ScriptPolicy,
    pub queries_policy: ScriptPolicy,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sql"),
            schema: "create_tables".to_string(),
            seed: "insert_test_data".to_string(),
            queries: "queries".to_string(),
            verification: "queries".to_string(),
            schema_policy: ScriptPolicy::BestEffort,
            seed_policy: ScriptPolicy::BestEffort,
            queries_policy: ScriptPolicy::BestEffort,
        }
    }
}

/// Cluster introspection queries issued by the health inspector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthQueries {
    pub coordinator: String,
    pub workers: String,
    pub distributed_tables: String,
}

impl Default for HealthQueries {
    fn default() -> Self {
        Self {
            coordinator: "SELECT * FROM citus_get_coordinator_node()".to_string(),
            workers: "SELECT * FROM citus_get_active_worker_nodes()".to_string(),
            distributed_tables: "SELECT * FROM citus_tables".to_string(),
        }
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub connection: ConnectionConfig,
    pub connect_retry: RetryPolicy,
    pub reconnect_retry: RetryPolicy,
    pub recovery: RecoveryConfig,
    pub scripts: ScriptsConfig,
    pub health: HealthQueries,
}

impl HarnessConfig {
    /// Loads configuration from a TOML file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let contents = std::fs::read_to_string(p).map_err(|e| {
                    HarnessError::Config(format!("failed to read {}: {}", p.display(), e))
                })?;
                Self::from_toml(&contents)
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(HarnessError::Config("connection.host is empty".to_string()));
        }
        if self.connection.database.trim().is_empty() {
            return Err(HarnessError::Config(
                "connection.database is empty".to_string(),
            ));
        }
        if self.connection.user.trim().is_empty() {
            return Err(HarnessError::Config("connection.user is empty".to_string()));
        }
        if self.connect_retry.max_attempts == 0 {
            return Err(HarnessError::Config(
                "connect_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.reconnect_retry.max_attempts == 0 {
            return Err(HarnessError::Config(
                "reconnect_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
