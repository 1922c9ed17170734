use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use dbprof_core::{PROFILE_VERSION, ProfilerConfig, TableMeta};

use super::{RegistryError, RegistryResult};

/// Metadata captured at run start.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub engine: String,
    /// Connection string with credentials masked.
    pub connection: String,
    pub schema: String,
    pub tables: Vec<String>,
    pub config: ProfilerConfig,
    pub rules: Option<PathBuf>,
    pub previous_dir: Option<PathBuf>,
    pub skip_record_validation: bool,
    pub timeout_secs: Option<u64>,
    #[serde(skip)]
    pub run_dir: PathBuf,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
struct RunConfig<'a> {
    profile_version: &'static str,
    #[serde(flatten)]
    context: &'a RunContext,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub profiles_dir: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx.run_dir.join(format!("{timestamp}__run_{}", ctx.run_id));
    let profiles_dir = root.join("profiles");
    create_dir_all(&profiles_dir)?;

    let logs_path = root.join("logs.ndjson");
    write_json(
        &root.join("config.json"),
        &RunConfig {
            profile_version: PROFILE_VERSION,
            context: ctx,
        },
    )?;
    OpenOptions::new().create(true).append(true).open(&logs_path)?;

    Ok(RunPaths {
        root,
        logs_path,
        profiles_dir,
    })
}

fn profile_file_name(schema: &str, table: &str) -> String {
    format!("{schema}.{table}.json")
}

/// Write a snapshot into the run, and into `out_dir` when given.
pub fn write_profile(
    paths: &RunPaths,
    meta: &TableMeta,
    out_dir: Option<&Path>,
) -> RegistryResult<PathBuf> {
    let name = profile_file_name(&meta.schema_name, &meta.table_name);
    let path = paths.profiles_dir.join(&name);
    write_json(&path, meta)?;

    if let Some(out_dir) = out_dir {
        create_dir_all(out_dir)?;
        write_json(&out_dir.join(&name), meta)?;
    }

    Ok(path)
}

/// Load the earlier snapshot of a table, if `dir` holds one.
pub fn read_previous(dir: &Path, schema: &str, table: &str) -> RegistryResult<Option<TableMeta>> {
    let path = dir.join(profile_file_name(schema, table));
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(RegistryError::from(err)),
    };
    let meta = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(meta))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new().create(true).truncate(true).write(true).open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}
