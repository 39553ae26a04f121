pub mod lifecycle;
pub mod setup;

use crate::config::topology::{ServiceSpec, StackConfig, StackPaths};
use crate::core::envfile::{self, EnvWriteOutcome};
use crate::core::health::HttpProber;
use crate::core::process::ProcessLauncher;
use crate::domain::ports::HealthProbe;
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::Validate;
use std::collections::BTreeMap;
use std::net::UdpSocket;

/// 單台機器上執行 stackctl 所需的一切
pub struct StackContext {
    pub config: StackConfig,
    pub machine: String,
    pub paths: StackPaths,
    pub prober: Box<dyn HealthProbe>,
    pub launcher: ProcessLauncher,
}

impl StackContext {
    pub fn new(config: StackConfig, machine: Option<String>) -> Result<Self> {
        let prober = HttpProber::new(config.probe_timeout())?;
        Self::with_prober(config, machine, Box::new(prober))
    }

    pub fn with_prober(
        config: StackConfig,
        machine: Option<String>,
        prober: Box<dyn HealthProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let machine = match machine {
            Some(name) => config.machine(&name)?.name.clone(),
            None => detect_local_machine(&config)?,
        };
        let paths = config.paths();
        let launcher = ProcessLauncher::from_paths(&paths);

        Ok(Self {
            config,
            machine,
            paths,
            prober,
            launcher,
        })
    }

    /// 本機服務，`only` 指定時只取該服務
    pub fn local_services(&self, only: Option<&str>) -> Result<Vec<&ServiceSpec>> {
        let local = self.config.services_on(&self.machine);
        match only {
            None => Ok(local),
            Some(name) => {
                let service = self.config.service(name)?;
                if service.machine != self.machine {
                    return Err(DeployError::InvalidConfigValueError {
                        field: "--only".to_string(),
                        value: name.to_string(),
                        reason: format!(
                            "Service runs on {}, not on {}",
                            service.machine, self.machine
                        ),
                    });
                }
                Ok(vec![service])
            }
        }
    }

    pub fn render_env(&self, service: &ServiceSpec) -> Result<BTreeMap<String, String>> {
        envfile::render_template(&service.env, &self.config)
    }

    /// 沒有 env 模板的服務不寫檔
    pub fn write_env(&self, service: &ServiceSpec, force: bool) -> Result<Option<EnvWriteOutcome>> {
        if service.env.is_empty() {
            return Ok(None);
        }
        let vars = self.render_env(service)?;
        let path = self.config.env_file_path(service);
        envfile::write_env_file(&path, &service.name, &vars, force).map(Some)
    }

    /// 啟動時匯出的環境變數：已存在的 .env 優先，否則即時渲染模板
    pub fn launch_env(&self, service: &ServiceSpec) -> Result<BTreeMap<String, String>> {
        let path = self.config.env_file_path(service);
        if path.is_file() {
            envfile::read_env_file(&path)
        } else {
            self.render_env(service)
        }
    }
}

/// 能 bind 到的 IP 就是本機的 IP
pub fn detect_local_machine(config: &StackConfig) -> Result<String> {
    if let [only] = config.machines.as_slice() {
        return Ok(only.name.clone());
    }

    config
        .machines
        .iter()
        .find(|m| UdpSocket::bind((m.ip.as_str(), 0)).is_ok())
        .map(|m| {
            tracing::debug!("Detected local machine {} ({})", m.name, m.ip);
            m.name.clone()
        })
        .ok_or_else(|| DeployError::MissingConfigError {
            field: "--machine (could not match any local address to the topology)".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MACHINES: &str = r#"
[stack]
name = "detect"

[[machines]]
name = "remote"
ip = "203.0.113.10"

[[machines]]
name = "here"
ip = "127.0.0.1"

[[services]]
name = "api"
machine = "here"
kind = "external"
port = 8000

[[services]]
name = "llm"
machine = "remote"
kind = "external"
port = 8001
"#;

    #[test]
    fn test_detects_machine_by_local_address() {
        let config = StackConfig::from_toml_str(TWO_MACHINES).unwrap();
        assert_eq!(detect_local_machine(&config).unwrap(), "here");
    }

    #[test]
    fn test_only_rejects_services_on_other_machines() {
        let config = StackConfig::from_toml_str(TWO_MACHINES).unwrap();
        let ctx = StackContext::new(config, Some("here".to_string())).unwrap();
        assert_eq!(ctx.local_services(None).unwrap().len(), 1);
        assert!(ctx.local_services(Some("api")).is_ok());
        assert!(ctx.local_services(Some("llm")).is_err());
    }
}
