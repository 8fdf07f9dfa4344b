use clap::Parser;
use std::path::PathBuf;

/// hostprep - bring a host to its provisioned state
///
/// Probes the machine, runs each provisioning step that is still needed and
/// prints a summary. Which steps run is decided by host state and operator
/// answers, never by flags.
#[derive(Parser, Debug)]
#[command(name = "hostprep")]
#[command(about = "Provision a host: timezone, monitoring agent, optional components")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: /etc/hostprep/config.json if present)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Answer every prompt with its default without waiting.
    #[arg(long)]
    pub non_interactive: bool,

    /// Dry-run mode: run detection and idempotency checks only.
    ///
    /// Steps whose desired state does not hold yet are reported as skipped
    /// instead of being changed.
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging (overridden by HOSTPREP_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
