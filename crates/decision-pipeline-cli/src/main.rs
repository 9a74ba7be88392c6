// crates/decision-pipeline-cli/src/main.rs
// ============================================================================
// Module: Decision Pipeline CLI Entry Point
// Description: Command dispatcher for local primitive runs and store setup.
// Purpose: Run primitives against file inputs and manage the output store.
// Dependencies: clap, decision-pipeline-core, decision-pipeline-config, tracing-subscriber
// ============================================================================

//! ## Overview
//! `decision-pipeline` runs one primitive for one tenant against a JSON
//! inputs file and prints the run outcome as canonical JSON. Rows go to the
//! configured store, JSON Lines files under an output directory by default.
//! Supporting commands list the registered primitives, validate a config
//! file, and provision the `SQLite` output store. Logs go to stderr so stdout stays
//! machine-readable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use decision_pipeline_cli::FileInputsRepository;
use decision_pipeline_cli::FileOutputsRepository;
use decision_pipeline_config::LockMode;
use decision_pipeline_config::LogFormat;
use decision_pipeline_config::LoggingConfig;
use decision_pipeline_config::PipelineConfig;
use decision_pipeline_core::CancellationToken;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::LockManager;
use decision_pipeline_core::OutputsRepository;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunOutcome;
use decision_pipeline_core::RunRegistry;
use decision_pipeline_core::Runner;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::UpsertBackend;
use decision_pipeline_core::UpsertOptions;
use decision_pipeline_core::core::time::parse_timestamp;
use decision_pipeline_core::core::time::unix_millis;
use decision_pipeline_core::primitives::BUILTIN_PRIMITIVE_VERSION;
use decision_pipeline_core::runtime::InMemoryOutputsRepository;
use decision_pipeline_core::runtime::InMemoryRunRegistry;
use decision_pipeline_core::runtime::LocalLockManager;
use decision_pipeline_core::runtime::NoopLockManager;
use decision_pipeline_store_sqlite::SCHEMA_VERSION;
use decision_pipeline_store_sqlite::SqliteOutputStore;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Command-line interface for the decision pipeline.
#[derive(Parser, Debug)]
#[command(name = "decision-pipeline", disable_help_subcommand = true)]
struct Cli {
    /// Top-level command.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one primitive for one tenant.
    Run(RunCommand),
    /// Inspect registered primitives.
    Primitives {
        /// Selected primitives subcommand.
        #[command(subcommand)]
        command: PrimitivesCommand,
    },
    /// Config utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Output store utilities.
    Store {
        /// Selected store subcommand.
        #[command(subcommand)]
        command: StoreCommand,
    },
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Tenant identifier.
    #[arg(long, value_name = "TENANT")]
    tenant: String,
    /// Primitive name.
    #[arg(long, value_name = "NAME")]
    primitive: String,
    /// Tenant config version.
    #[arg(long, value_name = "VERSION")]
    config_version: String,
    /// Primitive version.
    #[arg(long, value_name = "VERSION", default_value = BUILTIN_PRIMITIVE_VERSION)]
    primitive_version: String,
    /// RFC 3339 as-of timestamp.
    #[arg(long, value_name = "TIMESTAMP")]
    as_of: String,
    /// Correlation identifier; generated when omitted.
    #[arg(long, value_name = "ID")]
    correlation_id: Option<String>,
    /// JSON inputs file keyed by primitive name.
    #[arg(long, value_name = "PATH")]
    inputs: PathBuf,
    /// Config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// `primitives` subcommands.
#[derive(Subcommand, Debug)]
enum PrimitivesCommand {
    /// List registered primitives as JSON.
    List,
}

/// `config` subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a config file, including primitive settings.
    Validate {
        /// Config file path.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

/// `store` subcommands.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Create the `SQLite` output tables.
    Init {
        /// Config file path.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(command) => command_run(command),
        Commands::Primitives {
            command: PrimitivesCommand::List,
        } => command_primitives_list(),
        Commands::Config {
            command: ConfigCommand::Validate {
                config,
            },
        } => command_config_validate(config.as_deref()),
        Commands::Store {
            command: StoreCommand::Init {
                config,
            },
        } => command_store_init(config.as_deref()),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs one primitive and prints the outcome.
fn command_run(command: RunCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    init_logging(&config.logging)?;

    let as_of = parse_timestamp(&command.as_of)
        .map_err(|err| CliError::new(format!("invalid --as-of: {err}")))?;
    let correlation_id = command.correlation_id.unwrap_or_else(generated_correlation_id);
    let ctx = RunContext::new(
        TenantId::new(command.tenant),
        PrimitiveName::new(command.primitive),
        PrimitiveVersion::new(command.primitive_version),
        as_of,
        ConfigVersion::new(command.config_version),
        CorrelationId::new(correlation_id),
    );
    let inputs = FileInputsRepository::load(&command.inputs)
        .map_err(|err| CliError::new(format!("{}: {err}", command.inputs.display())))?;

    let options = UpsertOptions {
        mode: config.store.write_mode,
        batch_size: config.store.batch_size,
    };
    let outcome = if let Some(sqlite) = config.store.sqlite_config() {
        let store = SqliteOutputStore::open(sqlite)
            .map_err(|err| CliError::new(format!("output store: {err}")))?;
        let run_registry: Arc<dyn RunRegistry + Send + Sync> = Arc::new(store.clone());
        execute_run(&config, &ctx, inputs, store, run_registry)?
    } else if let Some(dir) = config.store.output_dir() {
        let outputs = FileOutputsRepository::open(dir, options)
            .map_err(|err| CliError::new(format!("output store: {err}")))?;
        execute_run(&config, &ctx, inputs, outputs, Arc::new(InMemoryRunRegistry::new()))?
    } else {
        let outputs = InMemoryOutputsRepository::with_options(true, options);
        execute_run(&config, &ctx, inputs, outputs, Arc::new(InMemoryRunRegistry::new()))?
    };

    write_json_value(&outcome)?;
    if outcome.is_cancelled() { Ok(ExitCode::FAILURE) } else { Ok(ExitCode::SUCCESS) }
}

/// Prints the registered primitives.
fn command_primitives_list() -> CliResult<ExitCode> {
    write_json_value(&Registry::builtin().list())?;
    Ok(ExitCode::SUCCESS)
}

/// Validates a config file and its primitive settings.
fn command_config_validate(path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(path)?;
    config
        .validate_primitives(&Registry::builtin())
        .map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line("config ok")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Creates the output store schema.
fn command_store_init(path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(path)?;
    init_logging(&config.logging)?;
    let mut sqlite = config
        .store
        .sqlite_config()
        .ok_or_else(|| CliError::new("store init requires store.type = \"sqlite\"".to_string()))?;
    sqlite.create_schema = true;
    let store = SqliteOutputStore::open(sqlite)
        .map_err(|err| CliError::new(format!("output store: {err}")))?;
    let merge_supported = store.supports_merge();
    write_json_value(&json!({
        "path": store.config().path.display().to_string(),
        "schema_version": SCHEMA_VERSION,
        "sqlite_version": store.sqlite_version(),
        "merge_supported": merge_supported,
    }))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Run Wiring
// ============================================================================

/// Builds a runner over the configured side channels and executes it.
fn execute_run<O>(
    config: &PipelineConfig,
    ctx: &RunContext,
    inputs: FileInputsRepository,
    outputs: O,
    run_registry: Arc<dyn RunRegistry + Send + Sync>,
) -> CliResult<RunOutcome>
where
    O: OutputsRepository,
{
    let locks: Arc<dyn LockManager + Send + Sync> = match config.runner.lock {
        LockMode::Local => Arc::new(LocalLockManager::new()),
        LockMode::Noop => Arc::new(NoopLockManager),
    };
    let runner = Runner::new(
        config.config_provider(),
        inputs,
        outputs,
        Arc::new(Registry::builtin()),
    )
    .with_run_registry(run_registry)
    .with_lock_manager(locks)
    .with_retry_policy(config.retry);

    info!(
        tenant = %ctx.tenant_id(),
        primitive = %ctx.primitive_name(),
        correlation_id = %ctx.correlation_id(),
        "starting run"
    );
    runner.run(ctx, &CancellationToken::new()).map_err(|err| CliError::new(err.to_string()))
}

/// Loads and validates config, using the default search path when absent.
fn load_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    PipelineConfig::load(path).map_err(|err| CliError::new(err.to_string()))
}

/// Generates a correlation id for runs started without one.
fn generated_correlation_id() -> String {
    format!("cli-{}-{}", unix_millis(OffsetDateTime::now_utc()), std::process::id())
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Installs the stderr tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
fn init_logging(logging: &LoggingConfig) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|err| CliError::new(format!("invalid log filter: {err}")))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| CliError::new(format!("failed to install logger: {err}")))
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Writes canonical JSON to stdout followed by a newline.
fn write_json_value<T: Serialize>(value: &T) -> CliResult<()> {
    let mut bytes = serde_jcs::to_vec(value)
        .map_err(|err| CliError::new(format!("failed to encode json: {err}")))?;
    bytes.push(b'\n');
    let mut stdout = std::io::stdout();
    stdout
        .write_all(&bytes)
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
