use crate::domain::model::{HealthStatus, ProbeTarget};
use async_trait::async_trait;
use std::path::Path;

/// 對單一目標做一次健康探測，重試策略由呼叫端決定
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> HealthStatus;
}

/// 本機上服務檔案（日誌、PID、資料）的擺放位置
pub trait PathProvider: Send + Sync {
    fn data_dir(&self) -> &Path;
    fn log_dir(&self) -> &Path;
    fn pid_dir(&self) -> &Path;
}
