mod registry;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use futures_util::{StreamExt, stream};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use dbprof_core::{
    Error as CoreError, ProfilerConfig, RuleSet, migrate_table_meta, redact_connection_string,
};
use dbprof_engine::{RunOptions, postgres_profiler};
use registry::{RunContext, RunPaths, init_logging, read_previous, start_run, write_profile};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
    #[error("{failed} of {total} tables failed to profile")]
    TablesFailed { failed: usize, total: usize },
}

impl CliError {
    /// Query text behind a database failure, if any.
    fn query(&self) -> Option<&str> {
        match self {
            CliError::Core(err) => err.query(),
            _ => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "dbprof", version, about = "Relational table profiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Profile tables of one schema and write their snapshots.
    Profile(ProfileArgs),
    /// List schemas, without system schemas.
    Schemas(ConnArgs),
    /// List tables of a schema.
    Tables(TablesArgs),
}

#[derive(Args, Debug)]
struct ConnArgs {
    /// Database connection string (flag form).
    #[arg(long, value_name = "CONNECTION_STRING", conflicts_with = "conn_pos")]
    conn: Option<String>,
    /// Database connection string (positional form).
    #[arg(value_name = "CONNECTION_STRING", required_unless_present = "conn")]
    conn_pos: Option<String>,
}

impl ConnArgs {
    fn resolve(self) -> Result<String, CliError> {
        let conn = match (self.conn, self.conn_pos) {
            (Some(value), None) | (None, Some(value)) => value,
            (Some(_), Some(_)) => {
                return Err(CliError::InvalidConfig(
                    "use either --conn or positional connection string".to_string(),
                ));
            }
            (None, None) => {
                return Err(CliError::InvalidConfig(
                    "connection string is required".to_string(),
                ));
            }
        };
        detect_engine(&conn)?;
        Ok(conn)
    }
}

#[derive(Args, Debug)]
struct TablesArgs {
    #[command(flatten)]
    connection: ConnArgs,
    #[arg(long)]
    schema: String,
}

#[derive(Args, Debug)]
struct ProfileArgs {
    #[command(flatten)]
    connection: ConnArgs,
    /// Schema holding the tables.
    #[arg(long)]
    schema: String,
    /// Table(s) to profile; every table of the schema when omitted.
    #[arg(long, value_name = "TABLE")]
    table: Vec<String>,
    /// Profiler configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Validation rules (TOML or JSON).
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Directory of earlier snapshots whose annotations are carried forward.
    #[arg(long)]
    previous_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    skip_record_validation: bool,
    /// Per-query timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Extra directory receiving a copy of each snapshot.
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Flags that override fields of the loaded configuration.
#[derive(Args, Debug)]
struct ConfigOverrides {
    #[arg(long)]
    num_freq_values: Option<usize>,
    #[arg(long)]
    column_profiling_threshold: Option<u64>,
    #[arg(long)]
    parallel_degree: Option<usize>,
    #[arg(long)]
    fetch_size: Option<usize>,
    #[arg(long)]
    sample_rows_limit: Option<usize>,
    #[arg(long, default_value_t = false)]
    no_sample_rows: bool,
    #[arg(long, default_value_t = false)]
    skip_table_profiling: bool,
    #[arg(long, default_value_t = false)]
    skip_column_profiling: bool,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut ProfilerConfig) {
        if let Some(value) = self.num_freq_values {
            config.num_freq_values = value;
        }
        if let Some(value) = self.column_profiling_threshold {
            config.column_profiling_threshold = value;
        }
        if let Some(value) = self.parallel_degree {
            config.parallel_degree = value;
        }
        if let Some(value) = self.fetch_size {
            config.fetch_size = value;
        }
        if let Some(value) = self.sample_rows_limit {
            config.sample_rows_limit = value;
        }
        if self.no_sample_rows {
            config.profile_sample_rows = false;
        }
        config.skip_table_profiling |= self.skip_table_profiling;
        config.skip_column_profiling |= self.skip_column_profiling;
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Profile(args) => run_profile(args).await,
        Command::Schemas(args) => list_schemas(args).await,
        Command::Tables(args) => list_tables(args).await,
    }
}

async fn list_schemas(args: ConnArgs) -> Result<(), CliError> {
    let conn = args.resolve()?;
    init_logging(None)?;

    let mut profiler = postgres_profiler(&conn, ProfilerConfig::default())?;
    let schemas = profiler.schema_names().await?;
    profiler.disconnect().await?;

    for schema in schemas {
        println!("{schema}");
    }
    Ok(())
}

async fn list_tables(args: TablesArgs) -> Result<(), CliError> {
    let conn = args.connection.resolve()?;
    init_logging(None)?;

    let mut profiler = postgres_profiler(&conn, ProfilerConfig::default())?;
    let tables = profiler.table_names(&args.schema).await?;
    profiler.disconnect().await?;

    for table in tables {
        println!("{table}");
    }
    Ok(())
}

async fn run_profile(args: ProfileArgs) -> Result<(), CliError> {
    let ProfileArgs {
        connection,
        schema,
        table,
        config,
        rules,
        previous_dir,
        skip_record_validation,
        timeout_secs,
        run_dir,
        out,
        overrides,
    } = args;

    let conn = connection.resolve()?;
    let engine = detect_engine(&conn)?;

    let mut profiler_config = match &config {
        Some(path) => ProfilerConfig::load(path)?,
        None => ProfilerConfig::default(),
    };
    overrides.apply(&mut profiler_config);
    profiler_config.validate()?;

    let rule_set = rules.as_deref().map(RuleSet::load).transpose()?;

    let run_ctx = RunContext {
        run_id: Uuid::new_v4().to_string(),
        started_at: chrono::Utc::now(),
        engine: engine.to_string(),
        connection: redact_connection_string(&conn),
        schema: schema.clone(),
        tables: table.clone(),
        config: profiler_config.clone(),
        rules,
        previous_dir: previous_dir.clone(),
        skip_record_validation,
        timeout_secs,
        run_dir,
    };

    let run_paths = start_run(&run_ctx)?;
    init_logging(Some(&run_paths.logs_path))?;

    info!(event = "run_started", run_id = %run_ctx.run_id, engine = %engine);
    if let Some(rules) = &rule_set {
        info!(event = "rules_loaded", count = rules.len());
    }
    let timer = Instant::now();

    let tables = if table.is_empty() {
        let mut discovery = postgres_profiler(&conn, profiler_config.clone())?;
        let names = discovery.table_names(&schema).await?;
        discovery.disconnect().await?;
        names
    } else {
        table
    };
    info!(event = "tables_selected", schema = %schema, count = tables.len());

    let job = TableJob {
        conn: &conn,
        schema: &schema,
        config: &profiler_config,
        options: RunOptions {
            skip_record_validation,
            validation_rules: rule_set.as_ref(),
            timeout: timeout_secs.map(Duration::from_secs),
        },
        paths: &run_paths,
        previous_dir: previous_dir.as_deref(),
        out: out.as_deref(),
    };

    let total = tables.len();
    let outcomes: Vec<bool> = stream::iter(tables)
        .map(|table| {
            let span = info_span!("table", schema = %schema, table = %table);
            let job = &job;
            async move {
                match job.profile(&table).await {
                    Ok(path) => {
                        info!(event = "profile_written", path = %path.display());
                        true
                    }
                    Err(err) => {
                        error!(
                            event = "table_failed",
                            query = err.query().unwrap_or_default(),
                            error = %err
                        );
                        false
                    }
                }
            }
            .instrument(span)
        })
        .buffer_unordered(profiler_config.table_concurrency())
        .collect()
        .await;

    let failed = outcomes.iter().filter(|ok| !**ok).count();
    let duration_ms = timer.elapsed().as_millis();
    if failed > 0 {
        error!(event = "run_finished", status = "failed", failed, total, duration_ms);
        return Err(CliError::TablesFailed { failed, total });
    }

    info!(event = "run_finished", status = "success", total, duration_ms);
    Ok(())
}

/// Everything needed to profile one table on its own connection.
struct TableJob<'a> {
    conn: &'a str,
    schema: &'a str,
    config: &'a ProfilerConfig,
    options: RunOptions<'a>,
    paths: &'a RunPaths,
    previous_dir: Option<&'a Path>,
    out: Option<&'a Path>,
}

impl TableJob<'_> {
    async fn profile(&self, table: &str) -> Result<PathBuf, CliError> {
        let mut profiler = postgres_profiler(self.conn, self.config.clone())?;
        let result = profiler.run(self.schema, table, self.options).await;
        if let Err(err) = profiler.disconnect().await {
            error!(event = "disconnect_failed", error = %err);
        }
        let meta = result?;

        let previous = match self.previous_dir {
            Some(dir) => read_previous(dir, self.schema, table)?,
            None => None,
        };
        if previous.is_some() {
            info!(event = "metadata_migrated");
        }
        let meta = migrate_table_meta(previous.as_ref(), meta);

        Ok(write_profile(self.paths, &meta, self.out)?)
    }
}

fn detect_engine(conn: &str) -> Result<&'static str, CliError> {
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(CliError::UnsupportedEngine(redact_connection_string(conn)))
    }
}
