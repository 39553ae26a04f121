use crate::domain::model::{ProbeTarget, RetryPolicy, ServiceKind};
use crate::domain::ports::PathProvider;
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_TOPOLOGY: &str = include_str!("../../deploy/stack.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackInfo,
    #[serde(default)]
    pub health: HealthSettings,
    pub machines: Vec<Machine>,
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<SmokeSettings>,
    /// 相對路徑的基準目錄（設定檔所在目錄）
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_pid_dir")]
    pub pid_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_seconds: default_delay_seconds(),
            timeout_seconds: default_timeout_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub machine: String,
    pub kind: ServiceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub venv: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_project: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub command: String,
    #[serde(default = "default_version_arg")]
    pub version_arg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// 空陣列代表所有機器
    #[serde(default)]
    pub machines: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Prerequisite {
    pub fn applies_to(&self, machine: &str) -> bool {
        self.machines.is_empty() || self.machines.iter().any(|m| m == machine)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeSettings {
    /// 提供 REST API 的服務名稱
    pub service: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default)]
    pub wait_for_processing: bool,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_pid_dir() -> String {
    "./pids".to_string()
}

fn default_attempts() -> u32 {
    30
}

fn default_delay_seconds() -> u64 {
    2
}

fn default_timeout_seconds() -> u64 {
    5
}

fn default_stop_grace_seconds() -> u64 {
    10
}

fn default_version_arg() -> String {
    "--version".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

/// 已解析成絕對位置的本機目錄
#[derive(Debug, Clone)]
pub struct StackPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pid_dir: PathBuf,
}

impl PathProvider for StackPaths {
    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn pid_dir(&self) -> &Path {
        &self.pid_dir
    }
}

impl StackConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    /// 設定檔存在就讀檔，否則使用內建拓撲
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::debug!("Loading topology from {}", path.display());
            Self::from_file(path)
        } else {
            tracing::info!(
                "📁 {} not found, using the built-in three-machine topology",
                path.display()
            );
            Self::default_topology()
        }
    }

    pub fn default_topology() -> Result<Self> {
        Self::from_toml_str(DEFAULT_TOPOLOGY)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content);
        let mut config: StackConfig = toml::from_str(&processed_content)?;
        config.base_dir = PathBuf::from(".");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DeployError::ConfigValidationError {
            field: "toml_serialization".to_string(),
            message: e.to_string(),
        })
    }

    pub fn machine(&self, name: &str) -> Result<&Machine> {
        self.machines
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| DeployError::InvalidConfigValueError {
                field: "machine".to_string(),
                value: name.to_string(),
                reason: format!(
                    "Unknown machine. Known machines: {}",
                    self.machines
                        .iter()
                        .map(|m| m.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
    }

    pub fn service(&self, name: &str) -> Result<&ServiceSpec> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| DeployError::InvalidConfigValueError {
                field: "service".to_string(),
                value: name.to_string(),
                reason: "Unknown service".to_string(),
            })
    }

    pub fn services_on(&self, machine: &str) -> Vec<&ServiceSpec> {
        self.services
            .iter()
            .filter(|s| s.machine == machine)
            .collect()
    }

    pub fn service_host(&self, service: &ServiceSpec) -> Result<&str> {
        Ok(self.machine(&service.machine)?.ip.as_str())
    }

    pub fn service_url(&self, service: &ServiceSpec) -> Result<String> {
        let port = validation::validate_required_field(
            &format!("services.{}.port", service.name),
            &service.port,
        )?;
        Ok(format!("http://{}:{}", self.service_host(service)?, port))
    }

    pub fn probe_target(&self, service: &ServiceSpec) -> Result<ProbeTarget> {
        let host = self.service_host(service)?;
        Ok(match (service.port, &service.health_path) {
            (Some(port), Some(path)) => ProbeTarget::Http {
                url: format!("http://{}:{}{}", host, port, path),
            },
            (Some(port), None) => ProbeTarget::Tcp {
                host: host.to_string(),
                port,
            },
            (None, _) => ProbeTarget::None,
        })
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn working_dir(&self, service: &ServiceSpec) -> PathBuf {
        match &service.working_dir {
            Some(dir) => self.resolve_path(dir),
            None => self.base_dir.clone(),
        }
    }

    pub fn env_file_path(&self, service: &ServiceSpec) -> PathBuf {
        match &service.env_file {
            Some(file) => self.resolve_path(file),
            None => self.working_dir(service).join(".env"),
        }
    }

    pub fn paths(&self) -> StackPaths {
        StackPaths {
            data_dir: self.resolve_path(&self.stack.data_dir),
            log_dir: self.resolve_path(&self.stack.log_dir),
            pid_dir: self.resolve_path(&self.stack.pid_dir),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.health.attempts,
            Duration::from_secs(self.health.delay_seconds),
        )
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.health.stop_grace_seconds)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("stack.name", &self.stack.name)?;
        validation::validate_path("stack.data_dir", &self.stack.data_dir)?;
        validation::validate_path("stack.log_dir", &self.stack.log_dir)?;
        validation::validate_path("stack.pid_dir", &self.stack.pid_dir)?;
        validation::validate_positive_number("health.attempts", self.health.attempts as usize, 1)?;
        validation::validate_positive_number(
            "health.timeout_seconds",
            self.health.timeout_seconds as usize,
            1,
        )?;

        let mut machine_names = HashSet::new();
        for machine in &self.machines {
            validation::validate_name("machines.name", &machine.name)?;
            validation::validate_non_empty_string("machines.ip", &machine.ip)?;
            if !machine_names.insert(machine.name.as_str()) {
                return Err(DeployError::ConfigValidationError {
                    field: "machines.name".to_string(),
                    message: format!("Duplicate machine '{}'", machine.name),
                });
            }
        }

        let mut service_names = HashSet::new();
        for service in &self.services {
            validation::validate_name("services.name", &service.name)?;
            if !service_names.insert(service.name.as_str()) {
                return Err(DeployError::ConfigValidationError {
                    field: "services.name".to_string(),
                    message: format!("Duplicate service '{}'", service.name),
                });
            }
        }

        for service in &self.services {
            self.validate_service(service, &service_names)?;
        }

        for prereq in &self.prerequisites {
            validation::validate_non_empty_string("prerequisites.command", &prereq.command)?;
            for machine in &prereq.machines {
                self.machine(machine)?;
            }
        }

        if let Some(smoke) = &self.smoke {
            let service = self.service(&smoke.service)?;
            validation::validate_url("smoke.service", &self.service_url(service)?)?;
            validation::validate_non_empty_string("smoke.username", &smoke.username)?;
            validation::validate_non_empty_string("smoke.password", &smoke.password)?;
        }

        Ok(())
    }

    fn validate_service(&self, service: &ServiceSpec, known: &HashSet<&str>) -> Result<()> {
        let field = |name: &str| format!("services.{}.{}", service.name, name);

        self.machine(&service.machine)?;

        if let Some(port) = service.port {
            validation::validate_range(&field("port"), port, 1, u16::MAX)?;
        }

        if let Some(path) = &service.health_path {
            if !path.starts_with('/') {
                return Err(DeployError::InvalidConfigValueError {
                    field: field("health_path"),
                    value: path.clone(),
                    reason: "Health path must start with '/'".to_string(),
                });
            }
            validation::validate_required_field(&field("port"), &service.port)?;
        }

        match service.kind {
            ServiceKind::Process => {
                let command = validation::validate_required_field(&field("command"), &service.command)?;
                validation::validate_non_empty_string(&field("command"), command)?;
            }
            ServiceKind::Compose => {
                let file = validation::validate_required_field(&field("compose_file"), &service.compose_file)?;
                validation::validate_path(&field("compose_file"), file)?;
            }
            ServiceKind::External => {}
        }

        for dep in &service.depends_on {
            if dep == &service.name {
                return Err(DeployError::ConfigValidationError {
                    field: field("depends_on"),
                    message: "A service cannot depend on itself".to_string(),
                });
            }
            if !known.contains(dep.as_str()) {
                return Err(DeployError::InvalidConfigValueError {
                    field: field("depends_on"),
                    value: dep.clone(),
                    reason: "Unknown service".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for StackConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

/// 替換環境變數 (例如 ${HF_TOKEN})；未設定的變數原樣保留
pub fn substitute_env_vars(content: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[stack]
name = "mini"

[[machines]]
name = "local"
ip = "127.0.0.1"

[[services]]
name = "api"
machine = "local"
kind = "process"
port = 8000
health_path = "/health"
command = "uvicorn"
depends_on = ["db"]

[[services]]
name = "db"
machine = "local"
kind = "external"
port = 27017
"#;

    #[test]
    fn test_default_topology_is_valid() {
        let config = StackConfig::default_topology().unwrap();
        config.validate().unwrap();

        assert_eq!(config.machines.len(), 3);
        assert_eq!(config.machine("dell-laptop").unwrap().ip, "192.168.100.42");

        let milvus = config.service("milvus").unwrap();
        assert_eq!(milvus.kind, ServiceKind::Compose);
        assert_eq!(
            config.probe_target(milvus).unwrap(),
            ProbeTarget::Tcp {
                host: "192.168.100.42".to_string(),
                port: 19530
            }
        );

        let llm = config.service("llm-service").unwrap();
        assert_eq!(
            config.probe_target(llm).unwrap(),
            ProbeTarget::Http {
                url: "http://192.168.100.43:8001/health".to_string()
            }
        );
        assert_eq!(config.services_on("mac-mini").len(), 4);
    }

    #[test]
    fn test_parse_minimal_config_applies_defaults() {
        let config = StackConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.health.attempts, 30);
        assert_eq!(config.retry_policy().delay, Duration::from_secs(2));
        assert_eq!(config.stack.pid_dir, "./pids");
        assert!(config.smoke.is_none());
        assert_eq!(config.service_url(config.service("api").unwrap()).unwrap(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DOCSTACK_TEST_IP", "10.0.0.7");

        let content = MINIMAL.replace("127.0.0.1", "${DOCSTACK_TEST_IP}");
        let config = StackConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.machine("local").unwrap().ip, "10.0.0.7");

        std::env::remove_var("DOCSTACK_TEST_IP");
    }

    #[test]
    fn test_unset_env_var_is_kept_verbatim() {
        assert_eq!(
            substitute_env_vars("token=${DOCSTACK_SURELY_UNSET_VAR}"),
            "token=${DOCSTACK_SURELY_UNSET_VAR}"
        );
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let content = MINIMAL.replace(r#"depends_on = ["db"]"#, r#"depends_on = ["cache"]"#);
        let config = StackConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_process_service_requires_command() {
        let content = MINIMAL.replace("command = \"uvicorn\"\n", "");
        let config = StackConfig::from_toml_str(&content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DeployError::MissingConfigError { .. }));
    }

    #[test]
    fn test_duplicate_service_is_rejected() {
        let content = format!(
            "{}\n[[services]]\nname = \"db\"\nmachine = \"local\"\nkind = \"external\"\n",
            MINIMAL
        );
        let config = StackConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file_resolves_relative_paths() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = StackConfig::from_file(temp_file.path()).unwrap();
        let parent = temp_file.path().parent().unwrap();
        assert_eq!(config.paths().pid_dir, parent.join("./pids"));
        assert_eq!(
            config.env_file_path(config.service("api").unwrap()),
            parent.join(".env")
        );
    }

    #[test]
    fn test_round_trip_through_toml_keeps_services() {
        let config = StackConfig::default_topology().unwrap();
        let rendered = config.to_toml_string().unwrap();
        let reparsed = StackConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.services.len(), config.services.len());
    }
}
