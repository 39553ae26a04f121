//! Orchestrator smoke test: signup, login, upload, optional status polling

use crate::config::topology::SmokeSettings;
use crate::domain::model::{CheckOutcome, RetryPolicy, TestPhase};
use crate::utils::error::{DeployError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const SAMPLE_DOCUMENT: &str = "Smoke test document.\n\nAlice works for Example Corp in Berlin and uses Rust for the ingestion pipeline.\n";

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedDocument {
    #[serde(alias = "_id")]
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    Created,
    AlreadyExists,
}

pub struct SmokeClient {
    client: Client,
    api_base: String,
}

/// 依副檔名決定上傳的 Content-Type
pub fn mime_for(filename: &str) -> &'static str {
    let extension = std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("doc") => "application/msword",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("html") | Some("htm") => "text/html",
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// FastAPI 錯誤回應的 `detail`，取不到時回傳原文
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").map(|d| d.to_string()))
        .unwrap_or(body);
    format!("HTTP {}: {}", status, detail)
}

impl SmokeClient {
    pub fn new(base_url: &str, api_prefix: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                api_prefix.trim_matches('/')
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<SignupOutcome> {
        let response = self
            .client
            .post(self.url("/auth/signup"))
            .json(&SignupRequest { username, password })
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(SignupOutcome::Created),
            StatusCode::CONFLICT => Ok(SignupOutcome::AlreadyExists),
            _ => Err(DeployError::SmokeTestError {
                step: "signup".to_string(),
                message: error_detail(response).await,
            }),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::SmokeTestError {
                step: "login".to_string(),
                message: error_detail(response).await,
            });
        }

        let token: TokenResponse = response.json().await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            tracing::warn!("Unexpected token type '{}'", token.token_type);
        }
        Ok(token.access_token)
    }

    pub async fn upload(&self, token: &str, filename: &str, content: Vec<u8>) -> Result<UploadedDocument> {
        let part = Part::bytes(content)
            .file_name(filename.to_string())
            .mime_str(mime_for(filename))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/documents/upload"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::SmokeTestError {
                step: "upload".to_string(),
                message: error_detail(response).await,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn document_status(&self, token: &str, id: &str) -> Result<UploadedDocument> {
        let response = self
            .client
            .get(self.url(&format!("/documents/{}/status", id)))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeployError::SmokeTestError {
                step: "status".to_string(),
                message: error_detail(response).await,
            });
        }

        Ok(response.json().await?)
    }

    /// 固定間隔輪詢直到 completed / failed
    pub async fn wait_for_processing(
        &self,
        token: &str,
        id: &str,
        policy: RetryPolicy,
    ) -> Result<UploadedDocument> {
        let mut last = None;
        for attempt in 1..=policy.attempts {
            let doc = self.document_status(token, id).await?;
            tracing::debug!("Document {} is {:?} ({}/{})", id, doc.status, attempt, policy.attempts);
            if doc.status.is_terminal() {
                return Ok(doc);
            }
            last = Some(doc.status);
            if attempt < policy.attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        Err(DeployError::SmokeTestError {
            step: "status".to_string(),
            message: format!(
                "document {} still {:?} after {} checks",
                id,
                last.unwrap_or(DocumentStatus::Queued),
                policy.attempts
            ),
        })
    }
}

fn record(
    outcomes: &mut Vec<CheckOutcome>,
    step: &str,
    target: &str,
    started: Instant,
    result: std::result::Result<String, String>,
) -> bool {
    let passed = result.is_ok();
    outcomes.push(match result {
        Ok(detail) => CheckOutcome::pass(TestPhase::Smoke, step, target, detail, started.elapsed()),
        Err(detail) => CheckOutcome::fail(TestPhase::Smoke, step, target, detail, started.elapsed()),
    });
    passed
}

/// 依序執行各步驟；前一步失敗時停止
pub async fn run_smoke_test(
    settings: &SmokeSettings,
    base_url: &str,
    document: Option<(String, Vec<u8>)>,
    timeout: Duration,
    policy: RetryPolicy,
) -> Result<Vec<CheckOutcome>> {
    let client = SmokeClient::new(base_url, &settings.api_prefix, timeout)?;
    let mut outcomes = Vec::new();

    let started = Instant::now();
    let signup = client
        .signup(&settings.username, &settings.password)
        .await
        .map(|o| match o {
            SignupOutcome::Created => format!("created {}", settings.username),
            SignupOutcome::AlreadyExists => format!("{} already exists", settings.username),
        })
        .map_err(|e| e.to_string());
    if !record(&mut outcomes, "signup", &client.url("/auth/signup"), started, signup) {
        return Ok(outcomes);
    }

    let started = Instant::now();
    let token = match client.login(&settings.username, &settings.password).await {
        Ok(token) => {
            record(&mut outcomes, "login", &client.url("/auth/login"), started, Ok("token issued".to_string()));
            token
        }
        Err(e) => {
            record(&mut outcomes, "login", &client.url("/auth/login"), started, Err(e.to_string()));
            return Ok(outcomes);
        }
    };

    let (filename, content) =
        document.unwrap_or_else(|| ("smoke_test.txt".to_string(), SAMPLE_DOCUMENT.as_bytes().to_vec()));
    let started = Instant::now();
    let uploaded = match client.upload(&token, &filename, content).await {
        Ok(doc) => {
            record(
                &mut outcomes,
                "upload",
                &client.url("/documents/upload"),
                started,
                Ok(format!("{} accepted as {} ({:?})", doc.filename, doc.id, doc.status)),
            );
            doc
        }
        Err(e) => {
            record(&mut outcomes, "upload", &client.url("/documents/upload"), started, Err(e.to_string()));
            return Ok(outcomes);
        }
    };

    if settings.wait_for_processing {
        let started = Instant::now();
        let target = client.url(&format!("/documents/{}/status", uploaded.id));
        let result = match client.wait_for_processing(&token, &uploaded.id, policy).await {
            Ok(doc) if doc.status == DocumentStatus::Completed => Ok("completed".to_string()),
            Ok(doc) => Err(format!(
                "processing failed: {}",
                doc.error_message.unwrap_or_else(|| "no error message".to_string())
            )),
            Err(e) => Err(e.to_string()),
        };
        record(&mut outcomes, "processing", &target, started, result);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploaded_document_accepts_mongo_id_alias() {
        let doc: UploadedDocument = serde_json::from_str(
            r#"{"_id": "abc", "filename": "a.pdf", "status": "queued", "user_id": "u1"}"#,
        )
        .unwrap();
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.status, DocumentStatus::Queued);
        assert!(!doc.status.is_terminal());
    }

    #[test]
    fn test_api_base_joins_cleanly() {
        let client = SmokeClient::new("http://192.168.100.41:8000/", "/api/v1", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/auth/login"),
            "http://192.168.100.41:8000/api/v1/auth/login"
        );
    }

    #[test]
    fn test_mime_follows_extension() {
        assert_eq!(mime_for("smoke_test.txt"), "text/plain");
        assert_eq!(mime_for("Report.PDF"), "application/pdf");
        assert_eq!(
            mime_for("contract.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(mime_for("archive"), "application/octet-stream");
    }
}
