use crate::app::StackContext;
use crate::config::topology::ServiceSpec;
use crate::core::compose::{self, ComposeCommand};
use crate::core::health::{wait_until_healthy, wait_with_exit_watch};
use crate::core::plan;
use crate::core::process::StopOutcome;
use crate::domain::model::{
    CheckOutcome, HealthStatus, PidState, ProbeTarget, RetryPolicy, ServiceKind, TestPhase,
};
use crate::utils::error::{DeployError, Result};
use crate::utils::monitor::{ProcessMonitor, ProcessStats};
use serde::Serialize;
use std::time::{Duration, Instant};

const NO_PROBE_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub kind: ServiceKind,
    pub pid: Option<u32>,
    pub pid_state: String,
    pub stats: Option<ProcessStats>,
    pub target: String,
    pub healthy: bool,
    pub detail: String,
}

/// compose 指令只在第一次需要時偵測
struct ComposeCache(Option<ComposeCommand>);

impl ComposeCache {
    async fn get(&mut self) -> Result<&ComposeCommand> {
        let command = match self.0.take() {
            Some(command) => command,
            None => {
                let detected = compose::detect_compose_command().await?;
                tracing::debug!("Using `{}`", detected.display());
                detected
            }
        };
        Ok(self.0.insert(command))
    }
}

fn hint_for(service: &ServiceSpec) {
    if let Some(hint) = &service.hint {
        tracing::error!("💡 {}", hint);
    }
}

async fn check_remote_dependencies(ctx: &StackContext, local: &[&ServiceSpec]) -> Result<()> {
    let policy = ctx.config.retry_policy();
    for dep in plan::remote_dependencies(local, &ctx.config.services) {
        let target = ctx.config.probe_target(dep)?;
        tracing::info!("🔍 Waiting for {} on {} ({})", dep.name, dep.machine, target);
        if let Err(e) = wait_until_healthy(&*ctx.prober, &dep.name, &target, policy).await {
            hint_for(dep);
            return Err(e);
        }
        tracing::info!("✅ {} is up", dep.name);
    }
    Ok(())
}

async fn start_process(ctx: &StackContext, service: &ServiceSpec, policy: RetryPolicy) -> Result<u32> {
    let target = ctx.config.probe_target(service)?;
    let working_dir = ctx.config.working_dir(service);
    let env = ctx.launch_env(service)?;

    match ctx.launcher.launch(service, &working_dir, &env) {
        Ok(mut launched) => {
            if target == ProbeTarget::None {
                tokio::time::sleep(NO_PROBE_SETTLE).await;
                if let Ok(Some(status)) = launched.child.try_wait() {
                    ctx.launcher.pid_file(&service.name).remove()?;
                    return Err(DeployError::ServiceExited {
                        service: service.name.clone(),
                        status: status.to_string(),
                    });
                }
                return Ok(1);
            }

            let result =
                wait_with_exit_watch(&*ctx.prober, &service.name, &target, policy, &mut launched.child).await;
            match &result {
                Ok(_) => ProcessMonitor::new().log_stats(&service.name, launched.pid),
                Err(DeployError::ServiceExited { .. }) => {
                    ctx.launcher.pid_file(&service.name).remove()?;
                    tracing::error!("💡 See {}", launched.log_path.display());
                }
                Err(_) => {}
            }
            result
        }
        Err(DeployError::AlreadyRunning { pid, .. }) => {
            tracing::info!("{} already running (pid {}), checking health", service.name, pid);
            wait_until_healthy(&*ctx.prober, &service.name, &target, policy).await
        }
        Err(e) => Err(e),
    }
}

/// 依相依順序啟動本機服務，每個服務健康後才啟動下一個
pub async fn start(ctx: &StackContext, only: Option<&str>) -> Result<Vec<String>> {
    let local = ctx.local_services(only)?;
    check_remote_dependencies(ctx, &local).await?;

    let policy = ctx.config.retry_policy();
    let mut compose_cache = ComposeCache(None);
    let mut started = Vec::new();

    for service in plan::start_order(&local)? {
        let begin = Instant::now();
        tracing::info!("▶️  Starting {} ({})", service.name, service.kind);

        let attempts = match service.kind {
            ServiceKind::Process => start_process(ctx, service, policy).await?,
            ServiceKind::Compose => {
                let file = ctx.config.resolve_path(service.compose_file.as_deref().unwrap_or_default());
                compose::up(compose_cache.get().await?, service, &file).await?;
                let target = ctx.config.probe_target(service)?;
                wait_until_healthy(&*ctx.prober, &service.name, &target, policy).await?
            }
            ServiceKind::External => {
                let target = ctx.config.probe_target(service)?;
                match wait_until_healthy(&*ctx.prober, &service.name, &target, policy).await {
                    Ok(attempts) => attempts,
                    Err(e) => {
                        hint_for(service);
                        return Err(e);
                    }
                }
            }
        };

        tracing::info!(
            "✅ {} healthy after {} attempt(s) in {:.1}s",
            service.name,
            attempts,
            begin.elapsed().as_secs_f32()
        );
        started.push(service.name.clone());
    }

    Ok(started)
}

/// 反向順序停止；外部管理的服務略過。個別失敗不中斷其餘服務
pub async fn stop(ctx: &StackContext, only: Option<&str>) -> Result<Vec<(String, String)>> {
    let local = ctx.local_services(only)?;
    let grace = ctx.config.stop_grace();
    let mut compose_cache = ComposeCache(None);
    let mut results = Vec::new();
    let mut first_error = None;

    for service in plan::stop_order(&local)? {
        let outcome = match service.kind {
            ServiceKind::Process => ctx
                .launcher
                .stop(&service.name, grace)
                .await
                .map(|o| match o {
                    StopOutcome::NotRunning => "not running".to_string(),
                    StopOutcome::Stopped { pid, forced: false } => format!("stopped (pid {})", pid),
                    StopOutcome::Stopped { pid, forced: true } => format!("killed (pid {})", pid),
                }),
            ServiceKind::Compose => {
                let file = ctx.config.resolve_path(service.compose_file.as_deref().unwrap_or_default());
                match compose_cache.get().await {
                    Ok(cmd) => compose::down(cmd, service, &file)
                        .await
                        .map(|_| "containers removed".to_string()),
                    Err(e) => Err(e),
                }
            }
            ServiceKind::External => Ok("managed externally, skipped".to_string()),
        };

        match outcome {
            Ok(detail) => {
                tracing::info!("⏹️  {}: {}", service.name, detail);
                results.push((service.name.clone(), detail));
            }
            Err(e) => {
                tracing::error!("❌ {}: {}", service.name, e);
                results.push((service.name.clone(), format!("error: {}", e)));
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

pub async fn status(ctx: &StackContext) -> Result<Vec<ServiceStatus>> {
    let mut monitor = ProcessMonitor::new();
    let mut statuses = Vec::new();

    for service in ctx.local_services(None)? {
        let (pid, pid_state, stats) = if service.kind == ServiceKind::Process {
            match ctx.launcher.pid_file(&service.name).state(&mut monitor)? {
                PidState::Running(pid) => (Some(pid), "running".to_string(), monitor.stats(pid)),
                PidState::Stale(pid) => (Some(pid), "stale pid file".to_string(), None),
                PidState::Absent => (None, "stopped".to_string(), None),
            }
        } else {
            (None, service.kind.to_string(), None)
        };

        let target = ctx.config.probe_target(service)?;
        let health = ctx.prober.probe(&target).await;

        statuses.push(ServiceStatus {
            name: service.name.clone(),
            kind: service.kind,
            pid,
            pid_state,
            stats,
            target: target.to_string(),
            healthy: health.is_healthy(),
            detail: match health {
                HealthStatus::Healthy => "ok".to_string(),
                HealthStatus::Unhealthy(reason) => reason,
            },
        });
    }

    Ok(statuses)
}

pub fn render_status_table(statuses: &[ServiceStatus]) -> String {
    let width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(7).max(7);
    let mut out = format!(
        "{:<width$} {:<9} {:<15} {:>8} {:>7}  {:<8} {}\n",
        "SERVICE", "KIND", "STATE", "PID", "MEM", "HEALTH", "TARGET"
    );
    for s in statuses {
        out.push_str(&format!(
            "{:<width$} {:<9} {:<15} {:>8} {:>7}  {:<8} {}\n",
            s.name,
            s.kind.to_string(),
            s.pid_state,
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            s.stats
                .as_ref()
                .map(|st| format!("{}MB", st.memory_usage_mb))
                .unwrap_or_else(|| "-".to_string()),
            if s.healthy { "up" } else { "down" },
            s.target
        ));
    }
    out
}

/// 單次健康檢查（不重試）
pub async fn health(ctx: &StackContext, all: bool) -> Result<Vec<CheckOutcome>> {
    let services: Vec<&ServiceSpec> = if all {
        ctx.config.services.iter().collect()
    } else {
        ctx.local_services(None)?
    };

    let mut outcomes = Vec::new();
    for service in services {
        let target = ctx.config.probe_target(service)?;
        if target == ProbeTarget::None {
            continue;
        }
        let started = Instant::now();
        let label = target.to_string();
        outcomes.push(match ctx.prober.probe(&target).await {
            HealthStatus::Healthy => {
                CheckOutcome::pass(TestPhase::Health, &service.name, &label, "healthy", started.elapsed())
            }
            HealthStatus::Unhealthy(reason) => {
                CheckOutcome::fail(TestPhase::Health, &service.name, &label, reason, started.elapsed())
            }
        });
    }
    Ok(outcomes)
}
