pub mod compose;
pub mod envfile;
pub mod health;
pub mod network;
pub mod pidfile;
pub mod plan;
pub mod prereq;
pub mod process;
pub mod smoke;

pub use crate::domain::model::{HealthStatus, PidState, ProbeTarget, RetryPolicy};
pub use crate::domain::ports::{HealthProbe, PathProvider};
pub use crate::utils::error::Result;
