use crate::core::prereq::find_in_path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable(String),
    Unreachable(String),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            Reachability::Reachable(detail) | Reachability::Unreachable(detail) => detail,
        }
    }
}

/// `ping -c 1 -W <wait>`：Linux 的 -W 單位是秒，macOS/BSD 是毫秒
pub fn ping_args(ip: &str, timeout: Duration) -> Vec<String> {
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    let wait = timeout.as_millis().max(1).to_string();
    #[cfg(not(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )))]
    let wait = timeout.as_secs().max(1).to_string();

    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait,
        ip.to_string(),
    ]
}

async fn icmp_ping(ip: &str, timeout: Duration) -> Option<bool> {
    find_in_path("ping")?;
    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        Command::new("ping").args(ping_args(ip, timeout)).output(),
    )
    .await
    .ok()?
    .ok()?;
    Some(output.status.success())
}

pub async fn tcp_reachable(ip: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

/// 先用系統 ping；沒有 ping 或被防火牆擋掉 ICMP 時，嘗試連線該機器上任一服務埠
pub async fn check_machine(ip: &str, fallback_ports: &[u16], timeout: Duration) -> Reachability {
    match icmp_ping(ip, timeout).await {
        Some(true) => return Reachability::Reachable("ping ok".to_string()),
        Some(false) => tracing::debug!("ping {} failed, trying service ports", ip),
        None => tracing::debug!("ping unavailable, trying service ports on {}", ip),
    }

    for port in fallback_ports {
        if tcp_reachable(ip, *port, timeout).await {
            return Reachability::Reachable(format!("tcp {} open", port));
        }
    }

    Reachability::Unreachable(if fallback_ports.is_empty() {
        "no ping reply".to_string()
    } else {
        format!("no ping reply and ports {:?} closed", fallback_ports)
    })
}
