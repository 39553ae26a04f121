pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use app::StackContext;
pub use config::topology::StackConfig;
pub use utils::error::{DeployError, Result};
