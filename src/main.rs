use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use verbena_config::{RoutineInput, TriggerPayload};
use verbena_engine::{EngineConfig, EngineDeps, NoopHeartbeat, NoopSink};
use verbena_plugin::{builtin, InMemoryCredentialStore, PluginRegistry};
use verbena_routine::validate;
use verbena_store::{SqliteStore, StoreSink};

/// Verbena - an automation platform that executes routine graphs
#[derive(Parser)]
#[command(name = "verbena")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.verbena)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a routine
  Run {
    /// Path to the routine file (JSON)
    routine_file: PathBuf,

    /// Persist the execution and its node timeline to the local database
    #[arg(long)]
    persist: bool,
  },

  /// Validate a routine without executing it
  Validate {
    /// Path to the routine file (JSON)
    routine_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".verbena")
  });

  match cli.command {
    Some(Commands::Run {
      routine_file,
      persist,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_routine(routine_file, persist, data_dir))?;
    }
    Some(Commands::Validate { routine_file }) => {
      validate_routine(routine_file)?;
    }
    None => {
      println!("verbena - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run_routine(routine_file: PathBuf, persist: bool, data_dir: PathBuf) -> Result<()> {
  let mut input = load_routine(&routine_file).await?;
  eprintln!("Loaded routine: {} ({} nodes)", input.routine_id, input.nodes.len());

  // Trigger payload comes from stdin unless the file embeds one.
  if input.trigger.is_none() {
    input.trigger = Some(TriggerPayload {
      trigger_type: "manual".to_string(),
      data: read_payload_from_stdin()?,
    });
  }

  let mut registry = PluginRegistry::new();
  builtin::register_all(&mut registry);

  let sink: Arc<dyn verbena_engine::ExecutionSink> = if persist {
    tokio::fs::create_dir_all(&data_dir)
      .await
      .with_context(|| format!("failed to create data dir: {}", data_dir.display()))?;
    let db_path = data_dir.join("verbena.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let store = SqliteStore::connect(&url)
      .await
      .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    Arc::new(StoreSink::new(store))
  } else {
    Arc::new(NoopSink)
  };

  let deps = EngineDeps {
    registry: Arc::new(registry),
    credentials: Arc::new(InMemoryCredentialStore::new()),
    sink,
    heartbeat: Arc::new(NoopHeartbeat),
  };

  let cancel = CancellationToken::new();
  let outcome = verbena_engine::run(&deps, &EngineConfig::default(), &input, cancel)
    .await
    .context("routine execution failed")?;

  eprintln!("Execution {}: {:?}", outcome.execution_id, outcome.status);
  eprintln!("Nodes executed: {}", outcome.execution_path.len());

  // Print completed node outputs as JSON, keyed by task.
  let output: serde_json::Map<String, serde_json::Value> = outcome
    .state
    .results()
    .filter(|(_, record)| record.status == verbena_engine::NodeStatus::Completed)
    .map(|(key, record)| {
      (
        key.to_string(),
        serde_json::to_value(&record.outputs).unwrap_or(serde_json::Value::Null),
      )
    })
    .collect();

  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

fn validate_routine(routine_file: PathBuf) -> Result<()> {
  let content = std::fs::read_to_string(&routine_file)
    .with_context(|| format!("failed to read routine file: {}", routine_file.display()))?;
  let input: RoutineInput = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse routine file: {}", routine_file.display()))?;

  let report = validate(&input);
  println!("{}", serde_json::to_string_pretty(&report)?);
  if !report.valid() {
    bail!("routine '{}' is invalid", input.routine_id);
  }
  eprintln!("Routine '{}' is valid", input.routine_id);
  Ok(())
}

async fn load_routine(routine_file: &PathBuf) -> Result<RoutineInput> {
  let content = tokio::fs::read_to_string(routine_file)
    .await
    .with_context(|| format!("failed to read routine file: {}", routine_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse routine file: {}", routine_file.display()))
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
