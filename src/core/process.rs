//! 背景進程啟動與停止
//!
//! - 啟動前檢查 PID 檔，清除殘留的 PID 檔
//! - stdout/stderr 追加寫入 `<log_dir>/<service>.log`
//! - 停止時先對整個進程群組送 SIGTERM，寬限期後 SIGKILL

use crate::config::topology::ServiceSpec;
use crate::core::pidfile::PidFile;
use crate::core::prereq::find_in_path;
use crate::domain::model::PidState;
use crate::domain::ports::PathProvider;
use crate::utils::error::{DeployError, Result};
use crate::utils::monitor::ProcessMonitor;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const KILL_WAIT: Duration = Duration::from_secs(5);

/// 已啟動的服務進程
pub struct Launched {
    pub pid: u32,
    pub child: Child,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32, forced: bool },
}

pub struct ProcessLauncher {
    pid_dir: PathBuf,
    log_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(pid_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid_dir: pid_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    pub fn from_paths<P: PathProvider + ?Sized>(paths: &P) -> Self {
        Self::new(paths.pid_dir(), paths.log_dir())
    }

    pub fn pid_file(&self, service: &str) -> PidFile {
        PidFile::new(&self.pid_dir, service)
    }

    pub fn log_path(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", service))
    }

    /// venv 內的同名執行檔優先
    fn resolve_program(spec: &ServiceSpec, working_dir: &Path) -> Result<PathBuf> {
        let command = spec.command.as_deref().ok_or_else(|| DeployError::MissingConfigError {
            field: format!("services.{}.command", spec.name),
        })?;

        if spec.venv {
            let candidate = working_dir.join("venv").join("bin").join(command);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        let relative = working_dir.join(command);
        if command.contains('/') && relative.is_file() {
            return Ok(relative);
        }

        find_in_path(command).ok_or_else(|| DeployError::ProcessError {
            service: spec.name.clone(),
            message: format!("command '{}' not found (run `stackctl setup` first?)", command),
        })
    }

    pub fn launch(
        &self,
        spec: &ServiceSpec,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Launched> {
        let pid_file = self.pid_file(&spec.name);
        let mut monitor = ProcessMonitor::new();
        match pid_file.state(&mut monitor)? {
            PidState::Running(pid) => {
                return Err(DeployError::AlreadyRunning {
                    service: spec.name.clone(),
                    pid,
                })
            }
            PidState::Stale(pid) => {
                tracing::warn!("🧹 Removing stale PID file for {} (pid {})", spec.name, pid);
                pid_file.remove()?;
            }
            PidState::Absent => {}
        }

        if !working_dir.is_dir() {
            return Err(DeployError::ProcessError {
                service: spec.name.clone(),
                message: format!("working directory {} does not exist", working_dir.display()),
            });
        }

        let program = Self::resolve_program(spec, working_dir)?;

        std::fs::create_dir_all(&self.log_dir)?;
        let log_path = self.log_path(&spec.name);
        let mut log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        writeln!(
            log_file,
            "=== {} starting at {} ===",
            spec.name,
            chrono::Utc::now().to_rfc3339()
        )?;
        let stderr_log = log_file.try_clone()?;

        let mut std_command = std::process::Command::new(&program);
        std_command
            .args(&spec.args)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_log));

        if spec.venv {
            let venv = working_dir.join("venv");
            if venv.is_dir() {
                let mut path_var = venv.join("bin").into_os_string();
                if let Some(existing) = std::env::var_os("PATH") {
                    path_var.push(":");
                    path_var.push(existing);
                }
                std_command.env("VIRTUAL_ENV", &venv).env("PATH", path_var);
            }
        }

        // 與 stackctl 脫離同一個進程群組，Ctrl+C 不會連帶終止服務
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        let child = Command::from(std_command)
            .spawn()
            .map_err(|e| DeployError::ProcessError {
                service: spec.name.clone(),
                message: format!("failed to spawn {}: {}", program.display(), e),
            })?;

        let pid = child.id().ok_or_else(|| DeployError::ProcessError {
            service: spec.name.clone(),
            message: "process exited immediately".to_string(),
        })?;
        pid_file.write(pid)?;

        tracing::info!(
            "🚀 Started {} (pid {}), logging to {}",
            spec.name,
            pid,
            log_path.display()
        );

        Ok(Launched {
            pid,
            child,
            log_path,
        })
    }

    pub async fn stop(&self, service: &str, grace: Duration) -> Result<StopOutcome> {
        let pid_file = self.pid_file(service);
        let mut monitor = ProcessMonitor::new();

        let pid = match pid_file.state(&mut monitor)? {
            PidState::Absent => {
                tracing::info!("{} is not running (no PID file)", service);
                return Ok(StopOutcome::NotRunning);
            }
            PidState::Stale(pid) => {
                tracing::warn!("🧹 {} was not running, removing stale PID file (pid {})", service, pid);
                pid_file.remove()?;
                return Ok(StopOutcome::NotRunning);
            }
            PidState::Running(pid) => pid,
        };

        tracing::info!("🛑 Stopping {} (pid {})", service, pid);
        if !signal_group(pid, "TERM").await {
            monitor.terminate(pid);
        }
        if wait_for_exit(&mut monitor, pid, grace).await {
            pid_file.remove()?;
            return Ok(StopOutcome::Stopped { pid, forced: false });
        }

        tracing::warn!(
            "⚠️  {} did not exit within {:?}, sending SIGKILL",
            service,
            grace
        );
        if !signal_group(pid, "KILL").await {
            monitor.kill(pid);
        }
        if !wait_for_exit(&mut monitor, pid, KILL_WAIT).await {
            return Err(DeployError::ProcessError {
                service: service.to_string(),
                message: format!("pid {} survived SIGKILL", pid),
            });
        }

        pid_file.remove()?;
        Ok(StopOutcome::Stopped { pid, forced: true })
    }
}

/// 啟動時以 `process_group(0)` 建立群組，群組 ID 等於 PID；uvicorn/vLLM 的 worker 一併收到訊號
#[cfg(unix)]
async fn signal_group(pid: u32, signal: &str) -> bool {
    let group = format!("-{}", pid);
    match Command::new("kill")
        .args(["-s", signal, "--", group.as_str()])
        .output()
        .await
    {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            tracing::debug!(
                "kill -s {} -- {} failed: {}",
                signal,
                group,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            tracing::debug!("kill unavailable: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
async fn signal_group(_pid: u32, _signal: &str) -> bool {
    false
}

async fn wait_for_exit(monitor: &mut ProcessMonitor, pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if !monitor.is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}
