#[cfg(feature = "cli")]
pub mod cli;
pub mod topology;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "stackctl")]
#[command(about = "Set up, start, stop and verify the distributed document library stack")]
pub struct CliConfig {
    /// Path to the stack topology (falls back to the built-in topology when missing)
    #[arg(long, global = true, env = "STACK_CONFIG", default_value = "stack.toml")]
    pub config: String,

    /// Machine this invocation runs on (auto-detected from local addresses when omitted)
    #[arg(long, global = true, env = "STACK_MACHINE")]
    pub machine: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit JSON log lines")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: cli::Commands,
}
