use crate::domain::model::{HealthStatus, ProbeTarget, RetryPolicy};
use crate::domain::ports::HealthProbe;
use crate::utils::error::{DeployError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Child;

/// HTTP 目標以 2xx 視為健康；TCP 目標只要能建立連線即可
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HealthProbe for HttpProber {
    async fn probe(&self, target: &ProbeTarget) -> HealthStatus {
        match target {
            ProbeTarget::Http { url } => match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => HealthStatus::Healthy,
                Ok(response) => HealthStatus::Unhealthy(format!("HTTP {}", response.status())),
                Err(e) => HealthStatus::Unhealthy(e.to_string()),
            },
            ProbeTarget::Tcp { host, port } => {
                match tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), *port))).await {
                    Ok(Ok(_)) => HealthStatus::Healthy,
                    Ok(Err(e)) => HealthStatus::Unhealthy(e.to_string()),
                    Err(_) => HealthStatus::Unhealthy(format!("connect timed out after {:?}", self.timeout)),
                }
            }
            ProbeTarget::None => HealthStatus::Healthy,
        }
    }
}

async fn poll<P, F>(
    probe: &P,
    service: &str,
    target: &ProbeTarget,
    policy: RetryPolicy,
    mut exited: F,
) -> Result<u32>
where
    P: HealthProbe + ?Sized,
    F: FnMut() -> Option<String>,
{
    for attempt in 1..=policy.attempts {
        if let Some(status) = exited() {
            return Err(DeployError::ServiceExited {
                service: service.to_string(),
                status,
            });
        }

        match probe.probe(target).await {
            HealthStatus::Healthy => {
                tracing::debug!("{} healthy after {} attempt(s)", service, attempt);
                return Ok(attempt);
            }
            HealthStatus::Unhealthy(reason) => {
                tracing::debug!(
                    "⏳ {} not ready ({}/{}): {}",
                    service,
                    attempt,
                    policy.attempts,
                    reason
                );
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(DeployError::HealthCheckTimeout {
        service: service.to_string(),
        attempts: policy.attempts,
    })
}

/// 固定次數、固定間隔輪詢，回傳成功時用掉的嘗試次數
pub async fn wait_until_healthy<P: HealthProbe + ?Sized>(
    probe: &P,
    service: &str,
    target: &ProbeTarget,
    policy: RetryPolicy,
) -> Result<u32> {
    poll(probe, service, target, policy, || None).await
}

/// 同上，但剛啟動的子進程若提前結束就立即失敗
pub async fn wait_with_exit_watch<P: HealthProbe + ?Sized>(
    probe: &P,
    service: &str,
    target: &ProbeTarget,
    policy: RetryPolicy,
    child: &mut Child,
) -> Result<u32> {
    poll(probe, service, target, policy, || match child.try_wait() {
        Ok(Some(status)) => Some(status.to_string()),
        Ok(None) => None,
        Err(e) => Some(e.to_string()),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 第 N 次探測開始回報健康
    struct FlakyProbe {
        healthy_from: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn probe(&self, _target: &ProbeTarget) -> HealthStatus {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.healthy_from {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy("starting".to_string())
            }
        }
    }

    fn target() -> ProbeTarget {
        ProbeTarget::Http {
            url: "http://127.0.0.1:1/health".to_string(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_within_budget() {
        let probe = FlakyProbe {
            healthy_from: 3,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let attempts = wait_until_healthy(&probe, "embedding-service", &target(), policy)
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_fixed_attempts() {
        let probe = FlakyProbe {
            healthy_from: 10,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let err = wait_until_healthy(&probe, "llm-service", &target(), policy)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::HealthCheckTimeout { attempts: 4, .. }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exited_child_fails_fast() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        child.wait().await.unwrap();

        let probe = FlakyProbe {
            healthy_from: 100,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy::new(50, Duration::from_millis(1));
        let err = wait_with_exit_watch(&probe, "docling-service", &target(), policy, &mut child)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ServiceExited { .. }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tcp_probe_against_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = HttpProber::new(Duration::from_secs(1)).unwrap();

        let open = ProbeTarget::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        };
        assert!(prober.probe(&open).await.is_healthy());

        drop(listener);
        assert!(!prober.probe(&open).await.is_healthy());
    }
}
