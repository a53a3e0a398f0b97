//! Podkeeper CLI entrypoint.
//!
//! This is the main entrypoint for the podkeeper command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use halldyll_pod_keeper::cli::{Cli, Commands, LogFormat, OutputFormatter};
use halldyll_pod_keeper::config::{ConfigParser, ConfigValidator, KeeperSettings};
use halldyll_pod_keeper::error::Result;
use halldyll_pod_keeper::orchestrator::{OperationReport, Orchestrator};
use halldyll_pod_keeper::runpod::RunPodClient;
use halldyll_pod_keeper::state::{LocalRecordStore, RecordStore};
use halldyll_pod_keeper::transfer::ScpGateway;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type Keeper = Orchestrator<RunPodClient, ScpGateway, LocalRecordStore>;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag. Logs go to stderr so that
/// stdout carries only command output.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point. Returns whether the command fully succeeded.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<bool> {
    let settings = load_settings(cli.config.as_deref())?;
    let keeper = create_keeper(settings, cli.command.needs_api())?;

    match cli.command {
        Commands::List => {
            let pods = keeper.list().await?;
            emit(&formatter.format_pods(&pods))?;
            Ok(true)
        }
        Commands::Status => {
            let status = keeper.status().await?;
            emit(&formatter.format_status(&status))?;
            Ok(true)
        }
        Commands::Unlock { force } => cmd_unlock(&keeper, force, formatter).await,
        Commands::Terminate { yes } => {
            if !yes && !confirm_terminate(&keeper).await? {
                eprintln!("Termination cancelled.");
                return Ok(true);
            }
            report(formatter, &keeper.terminate().await?)
        }
        Commands::Create { .. } => {
            let options = cli.command.create_options().unwrap_or_default();
            report(formatter, &keeper.create(options).await?)
        }
        Commands::Start => report(formatter, &keeper.start().await?),
        Commands::Stop => report(formatter, &keeper.stop().await?),
        Commands::Connect => report(formatter, &keeper.connect().await?),
        Commands::Backup => report(formatter, &keeper.backup().await?),
        Commands::Restore => report(formatter, &keeper.restore().await?),
        Commands::Clean => report(formatter, &keeper.clean().await?),
    }
}

/// Shows or removes the record lock.
async fn cmd_unlock(keeper: &Keeper, force: bool, formatter: &OutputFormatter) -> Result<bool> {
    if force {
        let outcome = keeper.unlock().await?;
        emit(&formatter.format_unlock(outcome.lock.as_ref(), outcome.removed))?;
    } else {
        let lock = keeper.store().lock_info().await?;
        emit(&formatter.format_unlock(lock.as_ref(), false))?;
    }
    Ok(true)
}

/// Asks the user to confirm termination of the managed pod.
async fn confirm_terminate(keeper: &Keeper) -> Result<bool> {
    // A broken record is reported by the operation itself.
    let pod = keeper
        .store()
        .load()
        .await
        .ok()
        .and_then(|record| record.pod_id)
        .unwrap_or_else(|| String::from("(none)"));

    eprintln!("Pod {pod} will be terminated and its disk deleted.");
    eprint!("This action is IRREVERSIBLE. Type 'terminate' to confirm: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "terminate")
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Prints an operation report; a partial failure maps to a failing exit code.
fn report(formatter: &OutputFormatter, report: &OperationReport) -> Result<bool> {
    emit(&formatter.format_report(report))?;
    Ok(report.success)
}

fn emit(text: &str) -> Result<()> {
    OutputFormatter::emit(text)?;
    Ok(())
}

/// Loads, overrides and validates the settings.
fn load_settings(config_path: Option<&Path>) -> Result<KeeperSettings> {
    let base = config_path
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    debug!("Resolving settings from {}", base.display());

    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let settings = parser.resolve(config_path, |name| std::env::var(name).ok())?;
    ConfigValidator::new().validate(&settings)?;
    Ok(settings)
}

/// Wires the orchestrator to the `RunPod` API, scp and the local record.
///
/// Commands that never reach the provider do not require an API key.
fn create_keeper(settings: KeeperSettings, needs_api: bool) -> Result<Keeper> {
    let api_key = if needs_api {
        ConfigParser::get_runpod_api_key(|name| std::env::var(name).ok())?
    } else {
        ConfigParser::get_runpod_api_key(|name| std::env::var(name).ok()).unwrap_or_default()
    };

    let client = RunPodClient::with_timeout(&api_key, settings.timing.api_timeout_secs)?
        .with_max_retries(settings.timing.api_retries);
    let gateway = ScpGateway::new(
        &settings.ssh.key_path,
        settings.timing.connect_timeout(),
        settings.timing.transfer_timeout(),
    );
    let store = LocalRecordStore::with_base_dir(&settings.state.dir);
    info!("Pod record at {}", settings.state.dir.display());

    Ok(Orchestrator::new(client, gateway, store, settings))
}
