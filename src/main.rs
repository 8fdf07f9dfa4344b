//! hostprep - main entry point
//!
//! Loads configuration, takes the run lock, probes the host, runs the
//! provisioning steps and prints the summary. Logs go to stderr; stdout
//! carries only the summary.

use anyhow::{Context, Result};
use hostprep::cli::Cli;
use hostprep::config::ProvisionConfig;
use hostprep::executor::ExecutionMode;
use hostprep::host::SystemHost;
use hostprep::lock::RunLock;
use hostprep::orchestrator::Orchestrator;
use hostprep::probe::EnvironmentProbe;
use hostprep::prompt::TerminalPrompter;
use hostprep::report::{render, EXIT_ABORTED};
use hostprep::{process_guard, steps};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "HOSTPREP_LOG";

/// Initialize logging to stderr; `HOSTPREP_LOG` overrides the default level.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("hostprep {} starting", env!("CARGO_PKG_VERSION"));

    // Children spawned by step actions are terminated if we are interrupted
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    match run(&cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("hostprep: {:#}", e);
            ExitCode::from(EXIT_ABORTED as u8)
        }
    }
}

/// Package installs and service units need EUID 0.
fn ensure_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        anyhow::bail!("hostprep must be run as root")
    }
}

fn run(cli: &Cli) -> Result<i32> {
    ensure_root()?;
    let config = ProvisionConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    let lock = RunLock::acquire(&config.lock_path).context("Cannot start provisioning run")?;
    debug!(lock = %lock.path().display(), "holding run lock");

    let host = SystemHost::new(config.package_install_command.clone());
    let prompter = if cli.non_interactive {
        TerminalPrompter::non_interactive()
    } else {
        TerminalPrompter::new()
    };
    let mode = if cli.dry_run {
        info!("Dry-run mode: no changes will be made");
        ExecutionMode::DryRun
    } else {
        ExecutionMode::Apply
    };

    let probe = EnvironmentProbe::from_config(&host, &config);
    let report = Orchestrator::new(&host, &prompter)
        .with_prompt_timeout(config.prompt_timeout())
        .with_mode(mode)
        .run(&probe, steps::default_plan(&config))
        .context("Invalid step plan")?;

    print!("{}", render(&report));
    Ok(report.exit_code())
}
