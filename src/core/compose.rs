//! Docker Compose wrapper for containerised services (Milvus)

use crate::config::topology::ServiceSpec;
use crate::core::prereq::find_in_path;
use crate::utils::error::{DeployError, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

const COMPOSE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    pub program: String,
    pub base_args: Vec<String>,
}

impl ComposeCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Prefer the `docker compose` plugin, fall back to standalone `docker-compose`
pub async fn detect_compose_command() -> Result<ComposeCommand> {
    if find_in_path("docker").is_some() {
        let plugin = Command::new("docker")
            .args(["compose", "version"])
            .output()
            .await;
        if plugin.map(|o| o.status.success()).unwrap_or(false) {
            return Ok(ComposeCommand {
                program: "docker".to_string(),
                base_args: vec!["compose".to_string()],
            });
        }
    }

    if find_in_path("docker-compose").is_some() {
        return Ok(ComposeCommand {
            program: "docker-compose".to_string(),
            base_args: vec![],
        });
    }

    Err(DeployError::PrerequisiteError {
        command: "docker compose".to_string(),
        message: "neither `docker compose` nor `docker-compose` is available".to_string(),
    })
}

/// `-f <file> [-p <project>] <action...>`
pub fn compose_args(spec: &ServiceSpec, compose_file: &Path, action: &[&str]) -> Vec<String> {
    let mut args = vec!["-f".to_string(), compose_file.display().to_string()];
    if let Some(project) = &spec.compose_project {
        args.push("-p".to_string());
        args.push(project.clone());
    }
    args.extend(action.iter().map(|a| a.to_string()));
    args
}

async fn run(compose: &ComposeCommand, args: Vec<String>, work_dir: &Path) -> Result<()> {
    let rendered = format!("{} {}", compose.display(), args.join(" "));
    tracing::info!(">>> {}", rendered);

    let output = tokio::time::timeout(
        COMPOSE_TIMEOUT,
        Command::new(&compose.program)
            .args(&compose.base_args)
            .args(&args)
            .current_dir(work_dir)
            .output(),
    )
    .await
    .map_err(|_| DeployError::CommandFailed {
        command: rendered.clone(),
        message: format!("timed out after {:?}", COMPOSE_TIMEOUT),
    })??;

    if !output.stdout.is_empty() {
        tracing::debug!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
    }

    if output.status.success() {
        Ok(())
    } else {
        Err(DeployError::CommandFailed {
            command: rendered,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn ensure_compose_file(spec: &ServiceSpec, resolved: &Path) -> Result<()> {
    if resolved.is_file() {
        Ok(())
    } else {
        Err(DeployError::ProcessError {
            service: spec.name.clone(),
            message: format!("compose file {} not found", resolved.display()),
        })
    }
}

pub async fn up(compose: &ComposeCommand, spec: &ServiceSpec, file: &Path) -> Result<()> {
    ensure_compose_file(spec, file)?;
    let work_dir = file.parent().unwrap_or_else(|| Path::new("."));
    run(compose, compose_args(spec, file, &["up", "-d"]), work_dir).await
}

pub async fn down(compose: &ComposeCommand, spec: &ServiceSpec, file: &Path) -> Result<()> {
    ensure_compose_file(spec, file)?;
    let work_dir = file.parent().unwrap_or_else(|| Path::new("."));
    run(compose, compose_args(spec, file, &["down"]), work_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::topology::StackConfig;

    #[test]
    fn test_compose_args_include_project() {
        let config = StackConfig::default_topology().unwrap();
        let milvus = config.service("milvus").unwrap();
        let args = compose_args(milvus, Path::new("/opt/vector_db/docker-compose.yml"), &["up", "-d"]);
        assert_eq!(
            args,
            vec!["-f", "/opt/vector_db/docker-compose.yml", "-p", "milvus", "up", "-d"]
        );
    }

    #[tokio::test]
    async fn test_missing_compose_file_is_reported() {
        let config = StackConfig::default_topology().unwrap();
        let milvus = config.service("milvus").unwrap();
        let compose = ComposeCommand {
            program: "docker".to_string(),
            base_args: vec!["compose".to_string()],
        };
        let err = up(&compose, milvus, Path::new("/nonexistent/docker-compose.yml"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ProcessError { .. }));
    }

    #[tokio::test]
    async fn test_failing_command_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("docker-compose.yml");
        std::fs::write(&file, "services: {}\n").unwrap();

        let config = StackConfig::default_topology().unwrap();
        let milvus = config.service("milvus").unwrap();
        // sh -c 'echo boom >&2; exit 1' 取代真正的 docker
        let compose = ComposeCommand {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), "echo boom >&2; exit 1".to_string(), "compose".to_string()],
        };
        let err = up(&compose, milvus, &file).await.unwrap_err();
        match err {
            DeployError::CommandFailed { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
