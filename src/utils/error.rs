use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Prerequisite '{command}' not satisfied: {message}")]
    PrerequisiteError { command: String, message: String },

    #[error("PID file {path} is invalid: {message}")]
    PidFileError { path: String, message: String },

    #[error("Service '{service}' is already running (pid {pid})")]
    AlreadyRunning { service: String, pid: u32 },

    #[error("Process error for '{service}': {message}")]
    ProcessError { service: String, message: String },

    #[error("Service '{service}' did not become healthy after {attempts} attempts")]
    HealthCheckTimeout { service: String, attempts: u32 },

    #[error("Service '{service}' exited before becoming healthy ({status})")]
    ServiceExited { service: String, status: String },

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Dependency cycle between services: {services}")]
    DependencyCycle { services: String },

    #[error("Smoke test step '{step}' failed: {message}")]
    SmokeTestError { step: String, message: String },

    #[error("{failed} of {total} system checks failed")]
    SystemTestFailed { failed: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Environment,
    Process,
    Network,
    Verification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DeployError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeployError::ConfigValidationError { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::MissingConfigError { .. }
            | DeployError::DependencyCycle { .. }
            | DeployError::SerializationError(_) => ErrorCategory::Configuration,
            DeployError::PrerequisiteError { .. }
            | DeployError::IoError(_)
            | DeployError::CommandFailed { .. } => ErrorCategory::Environment,
            DeployError::PidFileError { .. }
            | DeployError::AlreadyRunning { .. }
            | DeployError::ProcessError { .. }
            | DeployError::ServiceExited { .. } => ErrorCategory::Process,
            DeployError::HttpError(_) | DeployError::HealthCheckTimeout { .. } => {
                ErrorCategory::Network
            }
            DeployError::SmokeTestError { .. } | DeployError::SystemTestFailed { .. } => {
                ErrorCategory::Verification
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DeployError::AlreadyRunning { .. } => ErrorSeverity::Low,
            DeployError::HttpError(_)
            | DeployError::HealthCheckTimeout { .. }
            | DeployError::SmokeTestError { .. }
            | DeployError::SystemTestFailed { .. } => ErrorSeverity::Medium,
            DeployError::ConfigValidationError { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::MissingConfigError { .. }
            | DeployError::DependencyCycle { .. }
            | DeployError::SerializationError(_)
            | DeployError::PidFileError { .. }
            | DeployError::ProcessError { .. }
            | DeployError::ServiceExited { .. }
            | DeployError::CommandFailed { .. } => ErrorSeverity::High,
            DeployError::IoError(_) | DeployError::PrerequisiteError { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            DeployError::HttpError(e) => format!("Could not reach a service: {}", e),
            DeployError::HealthCheckTimeout { service, .. } => {
                format!("{} is not responding to health checks", service)
            }
            DeployError::AlreadyRunning { service, pid } => {
                format!("{} is already running with pid {}", service, pid)
            }
            DeployError::SystemTestFailed { failed, total } => {
                format!("System test finished with {}/{} failures", failed, total)
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check stack.toml (run `stackctl topology` to see the resolved config)",
            ErrorCategory::Environment => "Run `stackctl setup` on this machine and install any missing tools",
            ErrorCategory::Process => "Inspect the service log under the log directory, then retry `stackctl start`",
            ErrorCategory::Network => "Verify the machine is reachable on the LAN and the service port is open",
            ErrorCategory::Verification => "Run `stackctl health --all` to find the failing service",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl From<toml::de::Error> for DeployError {
    fn from(e: toml::de::Error) -> Self {
        DeployError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
