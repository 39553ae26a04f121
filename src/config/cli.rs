use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Check prerequisites, create directories, bootstrap virtualenvs and write .env files
    Setup(SetupArgs),
    /// Render .env files for this machine's services
    Env(EnvArgs),
    /// Start this machine's services in dependency order and wait until healthy
    Start(ServiceArgs),
    /// Stop this machine's services in reverse dependency order
    Stop(ServiceArgs),
    /// Show PID state, resource usage and health of this machine's services
    Status(OutputArgs),
    /// Probe service health once
    Health(HealthArgs),
    /// Run the distributed system test (connectivity, health, smoke test)
    Test(TestArgs),
    /// Print the resolved topology as TOML
    Topology,
}

#[derive(Debug, Clone, Args)]
pub struct SetupArgs {
    /// Overwrite existing .env files
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub skip_prereqs: bool,

    #[arg(long)]
    pub skip_venv: bool,
}

#[derive(Debug, Clone, Args)]
pub struct EnvArgs {
    /// Overwrite existing .env files
    #[arg(long)]
    pub force: bool,

    /// Print the rendered files instead of writing them
    #[arg(long)]
    pub print: bool,

    /// Restrict to a single service
    #[arg(long)]
    pub only: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Restrict to a single service
    #[arg(long)]
    pub only: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct HealthArgs {
    /// Probe every service in the topology, not only this machine's
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TestArgs {
    #[arg(long)]
    pub skip_connectivity: bool,

    #[arg(long)]
    pub skip_smoke: bool,

    /// Override the number of health-check attempts per service
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Document to upload during the smoke test
    #[arg(long)]
    pub document: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}
