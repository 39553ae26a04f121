use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 服務的啟動方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// 以背景進程啟動，PID 寫入 PID 檔
    Process,
    /// 以 docker compose 管理的容器
    Compose,
    /// 由使用者手動管理（例如 Neo4j Desktop），只做健康檢查
    External,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Process => "process",
            ServiceKind::Compose => "compose",
            ServiceKind::External => "external",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    Http { url: String },
    Tcp { host: String, port: u16 },
    None,
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTarget::Http { url } => write!(f, "GET {}", url),
            ProbeTarget::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ProbeTarget::None => f.write_str("-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidState {
    Running(u32),
    /// PID 檔存在，但進程已不在
    Stale(u32),
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Connectivity,
    Health,
    Smoke,
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestPhase::Connectivity => "connectivity",
            TestPhase::Health => "health",
            TestPhase::Smoke => "smoke",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub phase: TestPhase,
    pub name: String,
    pub target: String,
    pub passed: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

impl CheckOutcome {
    pub fn pass(phase: TestPhase, name: &str, target: &str, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            phase,
            name: name.to_string(),
            target: target.to_string(),
            passed: true,
            detail: detail.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn fail(phase: TestPhase, name: &str, target: &str, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            passed: false,
            ..Self::pass(phase, name, target, detail, elapsed)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub stack: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub checks: Vec<CheckOutcome>,
}

impl TestReport {
    pub fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            checks: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: CheckOutcome) {
        if outcome.passed {
            tracing::info!("✅ [{}] {} ({})", outcome.phase, outcome.name, outcome.detail);
        } else {
            tracing::error!("❌ [{}] {} ({})", outcome.phase, outcome.name, outcome.detail);
        }
        self.checks.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failed(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    pub fn phase_passed(&self, phase: TestPhase) -> bool {
        self.checks
            .iter()
            .filter(|c| c.phase == phase)
            .all(|c| c.passed)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// 以固定欄寬輸出摘要表
    pub fn render_table(&self) -> String {
        let name_width = self
            .checks
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(4)
            .max(4);
        let mut out = format!(
            "{:<13} {:<name_width$} {:<6} {:>8}  {}\n",
            "PHASE", "NAME", "RESULT", "TIME", "DETAIL"
        );
        for check in &self.checks {
            out.push_str(&format!(
                "{:<13} {:<name_width$} {:<6} {:>6}ms  {}\n",
                check.phase.to_string(),
                check.name,
                if check.passed { "PASS" } else { "FAIL" },
                check.elapsed_ms,
                check.detail
            ));
        }
        out.push_str(&format!(
            "\n{} checks, {} failed\n",
            self.checks.len(),
            self.failed()
        ));
        out
    }
}
