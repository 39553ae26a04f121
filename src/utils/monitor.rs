use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub name: String,
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime: Duration,
}

/// 以 PID 觀察、終止服務進程
pub struct ProcessMonitor {
    system: System,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, pid: Pid) {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }

    /// 殭屍進程視為已結束
    pub fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.refresh(pid);
        match self.system.process(pid) {
            Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            None => false,
        }
    }

    pub fn stats(&mut self, pid: u32) -> Option<ProcessStats> {
        let sys_pid = Pid::from_u32(pid);
        self.refresh(sys_pid);
        self.system.refresh_memory();

        let total_memory = self.system.total_memory() / 1024 / 1024;
        let process = self.system.process(sys_pid)?;
        let memory_mb = process.memory() / 1024 / 1024;
        let memory_percent = if total_memory > 0 {
            (memory_mb as f32 / total_memory as f32) * 100.0
        } else {
            0.0
        };

        Some(ProcessStats {
            pid,
            name: process.name().to_string_lossy().into_owned(),
            cpu_usage: process.cpu_usage(),
            memory_usage_mb: memory_mb,
            memory_usage_percent: memory_percent,
            uptime: Duration::from_secs(process.run_time()),
        })
    }

    /// 送出 SIGTERM；平台不支援時退回強制終止
    pub fn terminate(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.refresh(sys_pid);
        match self.system.process(sys_pid) {
            Some(process) => process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill()),
            None => false,
        }
    }

    pub fn kill(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.refresh(sys_pid);
        self.system
            .process(sys_pid)
            .map(|process| process.kill())
            .unwrap_or(false)
    }

    pub fn log_stats(&mut self, service: &str, pid: u32) {
        if let Some(stats) = self.stats(pid) {
            tracing::info!(
                "📊 {} (pid {}) - CPU: {:.1}%, Memory: {}MB ({:.1}%), Uptime: {:?}",
                service,
                stats.pid,
                stats.cpu_usage,
                stats.memory_usage_mb,
                stats.memory_usage_percent,
                stats.uptime
            );
        }
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}
