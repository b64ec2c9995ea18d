use anyhow::Result;
use citus_check::config::{HarnessConfig, ScriptPolicy};
use citus_check::engine::postgres::PostgresDriver;
use citus_check::engine::sqlite::SqliteDriver;
use citus_check::engine::Driver;
use citus_check::events::TracingSink;
use citus_check::orchestrator::TestOrchestrator;
use citus_check::script::DirScriptSource;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// Citus coordinator over the PostgreSQL wire protocol.
    Postgres,
    /// Local SQLite file, for dry runs without a cluster.
    Sqlite,
}

/// Citus Cluster Check
///
/// Connects to the coordinator, runs the schema, seed and query scripts,
/// reports cluster health and verifies that a dropped session can be
/// re-established. Exits with 0 when every gating phase passed, 1 otherwise.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    database: Option<String>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Directory holding `create_tables.sql`, `insert_test_data.sql` and `queries.sql`.
    #[arg(long)]
    sql_dir: Option<PathBuf>,

    /// Connection attempts, first one included.
    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Wait between the simulated disconnect and the reconnect.
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Fail the schema phase if any statement fails.
    #[arg(long)]
    strict_schema: bool,

    #[arg(short, long, value_enum, default_value_t = Engine::Postgres)]
    engine: Engine,

    /// Database file used with `--engine sqlite`.
    #[arg(long, default_value = "data/citus_check.db")]
    sqlite_path: PathBuf,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(database) = &self.database {
            config.connection.database = database.clone();
        }
        if let Some(user) = &self.user {
            config.connection.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.connection.password = password.clone();
        }
        if let Some(dir) = &self.sql_dir {
            config.scripts.dir = dir.clone();
        }
        if let Some(max_retries) = self.max_retries {
            config.connect_retry.max_attempts = max_retries;
            config.reconnect_retry.max_attempts = max_retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.connect_retry.delay_ms = delay;
            config.reconnect_retry.delay_ms = delay;
        }
        if let Some(delay) = self.settle_delay_ms {
            config.recovery.settle_delay_ms = delay;
        }
        if self.strict_schema {
            config.scripts.schema_policy = ScriptPolicy::Strict;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "unexpected error");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let driver: Arc<dyn Driver> = match args.engine {
        Engine::Postgres => Arc::new(PostgresDriver::default()),
        Engine::Sqlite => {
            if let Some(parent) = args.sqlite_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Arc::new(SqliteDriver::new(args.sqlite_path.clone()))
        }
    };
    tracing::info!(
        engine = driver.name(),
        coordinator = %config.connection.target(),
        sql_dir = %config.scripts.dir.display(),
        "starting cluster check"
    );

    let scripts = Arc::new(DirScriptSource::new(config.scripts.dir.clone()));
    let orchestrator = TestOrchestrator::new(config, driver, scripts, Arc::new(TracingSink));
    let report = orchestrator.run().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(ExitCode::from(report.exit_code() as u8))
}
