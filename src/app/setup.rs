use crate::app::StackContext;
use crate::config::topology::ServiceSpec;
use crate::core::envfile::EnvWriteOutcome;
use crate::core::prereq::{self, PrereqOutcome};
use crate::domain::model::ServiceKind;
use crate::domain::ports::PathProvider;
use crate::utils::error::{DeployError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub force: bool,
    pub skip_prereqs: bool,
    pub skip_venv: bool,
}

#[derive(Debug, Default)]
pub struct SetupSummary {
    pub prereqs: Vec<PrereqOutcome>,
    pub directories: Vec<PathBuf>,
    pub venvs: Vec<String>,
    pub env_files: Vec<(String, EnvWriteOutcome)>,
}

async fn run_step(program: &Path, args: &[&str], work_dir: &Path) -> Result<()> {
    let rendered = format!("{} {}", program.display(), args.join(" "));
    tracing::info!(">>> {}", rendered);

    let output = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .output()
        .await
        .map_err(|e| DeployError::CommandFailed {
            command: rendered.clone(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DeployError::CommandFailed {
            command: rendered,
            message: stderr.lines().last().unwrap_or("non-zero exit").to_string(),
        })
    }
}

/// `python3 -m venv venv`，再 `venv/bin/pip install -r <requirements>`
async fn bootstrap_venv(ctx: &StackContext, service: &ServiceSpec) -> Result<bool> {
    let working_dir = ctx.config.working_dir(service);
    if !working_dir.is_dir() {
        tracing::warn!(
            "⚠️  {}: working directory {} missing, skipping virtualenv",
            service.name,
            working_dir.display()
        );
        return Ok(false);
    }

    let venv = working_dir.join("venv");
    if !venv.join("bin").join("python").exists() {
        let python = prereq::find_in_path("python3").ok_or_else(|| DeployError::PrerequisiteError {
            command: "python3".to_string(),
            message: "needed to create virtual environments".to_string(),
        })?;
        run_step(&python, &["-m", "venv", "venv"], &working_dir).await?;
    } else {
        tracing::info!("{}: reusing existing virtualenv", service.name);
    }

    if let Some(requirements) = &service.requirements {
        if working_dir.join(requirements).is_file() {
            let pip = venv.join("bin").join("pip");
            run_step(&pip, &["install", "--upgrade", "pip"], &working_dir).await?;
            run_step(&pip, &["install", "-r", requirements.as_str()], &working_dir).await?;
        } else {
            tracing::warn!("⚠️  {}: {} not found, nothing to install", service.name, requirements);
        }
    }

    Ok(true)
}

pub async fn run_setup(ctx: &StackContext, options: &SetupOptions) -> Result<SetupSummary> {
    let mut summary = SetupSummary::default();
    tracing::info!("🔧 Setting up {} for stack '{}'", ctx.machine, ctx.config.stack.name);

    if options.skip_prereqs {
        tracing::info!("Skipping prerequisite checks");
    } else {
        summary.prereqs = prereq::check_all(&ctx.config.prerequisites, &ctx.machine).await?;
    }

    let mut directories = vec![
        ctx.paths.data_dir().to_path_buf(),
        ctx.paths.log_dir().to_path_buf(),
        ctx.paths.pid_dir().to_path_buf(),
    ];
    // 上傳檔案與抽取結果只存在 API 所在的機器
    let hosts_api = ctx
        .config
        .smoke
        .as_ref()
        .and_then(|s| ctx.config.service(&s.service).ok())
        .is_some_and(|s| s.machine == ctx.machine);
    if hosts_api {
        directories.push(ctx.paths.data_dir().join("user_files"));
        directories.push(ctx.paths.data_dir().join("extracted"));
    }
    for dir in directories {
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Ensured {}", dir.display());
        summary.directories.push(dir);
    }

    for service in ctx.local_services(None)? {
        if service.kind == ServiceKind::Process && service.venv && !options.skip_venv {
            if bootstrap_venv(ctx, service).await? {
                summary.venvs.push(service.name.clone());
            }
        }

        if let Some(outcome) = ctx.write_env(service, options.force)? {
            summary.env_files.push((service.name.clone(), outcome));
        }
    }

    tracing::info!(
        "✅ Setup finished: {} directories, {} virtualenvs, {} env files",
        summary.directories.len(),
        summary.venvs.len(),
        summary.env_files.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::topology::StackConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_setup_creates_directories_and_env_files() {
        let dir = TempDir::new().unwrap();
        let mut config = StackConfig::default_topology().unwrap();
        config.base_dir = dir.path().to_path_buf();
        let ctx = StackContext::new(config, Some("mac-mini".to_string())).unwrap();

        let options = SetupOptions {
            force: false,
            skip_prereqs: true,
            skip_venv: true,
        };
        let summary = run_setup(&ctx, &options).await.unwrap();

        assert!(dir.path().join("data/user_files").is_dir());
        assert!(dir.path().join("pids").is_dir());
        assert_eq!(summary.env_files.len(), 2);

        let env = crate::core::envfile::read_env_file(
            &dir.path().join("orchestrator_api/.env"),
        )
        .unwrap();
        assert_eq!(env["MILVUS_HOST"], "192.168.100.42");
        assert_eq!(env["LLM_SERVICE_URL"], "http://192.168.100.43:8001");
        assert_eq!(env["DOCLING_SERVICE_URL"], "http://localhost:8004");

        // 第二次執行不覆寫
        let again = run_setup(&ctx, &options).await.unwrap();
        assert!(again
            .env_files
            .iter()
            .all(|(_, outcome)| *outcome == EnvWriteOutcome::Skipped));
    }

    const VENV_TOPOLOGY: &str = r#"
[stack]
name = "venv-test"

[[machines]]
name = "local"
ip = "127.0.0.1"

[[services]]
name = "embedding-service"
machine = "local"
kind = "process"
command = "uvicorn"
working_dir = "embedding_service"
venv = true
requirements = "requirements.txt"

[[services]]
name = "llm-service"
machine = "local"
kind = "process"
command = "python"
working_dir = "llm_service"
venv = true
requirements = "requirements.txt"
"#;

    /// 預先放好 venv/bin/python 與記錄參數的假 pip，避免真的建立虛擬環境
    #[cfg(unix)]
    fn fake_venv(service_dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let bin = service_dir.join("venv/bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), "").unwrap();
        let pip = bin.join("pip");
        std::fs::write(&pip, "#!/bin/sh\necho \"$@\" >> pip.log\n").unwrap();
        std::fs::set_permissions(&pip, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn venv_context(dir: &TempDir) -> StackContext {
        let mut config = StackConfig::from_toml_str(VENV_TOPOLOGY).unwrap();
        config.base_dir = dir.path().to_path_buf();
        StackContext::new(config, Some("local".to_string())).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_venv_bootstrap_installs_requirements() {
        let dir = TempDir::new().unwrap();
        let service_dir = dir.path().join("embedding_service");
        fake_venv(&service_dir);
        std::fs::write(service_dir.join("requirements.txt"), "fastapi\n").unwrap();
        let ctx = venv_context(&dir);

        let options = SetupOptions {
            skip_prereqs: true,
            ..Default::default()
        };
        let summary = run_setup(&ctx, &options).await.unwrap();

        // llm_service 目錄不存在，略過
        assert_eq!(summary.venvs, vec!["embedding-service".to_string()]);
        let log = std::fs::read_to_string(service_dir.join("pip.log")).unwrap();
        assert_eq!(
            log.lines().collect::<Vec<_>>(),
            vec!["install --upgrade pip", "install -r requirements.txt"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_venv_bootstrap_without_requirements_file() {
        let dir = TempDir::new().unwrap();
        let service_dir = dir.path().join("embedding_service");
        fake_venv(&service_dir);
        let ctx = venv_context(&dir);

        let options = SetupOptions {
            skip_prereqs: true,
            ..Default::default()
        };
        let summary = run_setup(&ctx, &options).await.unwrap();

        assert_eq!(summary.venvs, vec!["embedding-service".to_string()]);
        assert!(!service_dir.join("pip.log").exists());
    }

    #[tokio::test]
    async fn test_skip_venv_leaves_services_untouched() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("embedding_service")).unwrap();
        let ctx = venv_context(&dir);

        let options = SetupOptions {
            skip_prereqs: true,
            skip_venv: true,
            ..Default::default()
        };
        let summary = run_setup(&ctx, &options).await.unwrap();

        assert!(summary.venvs.is_empty());
        assert!(!dir.path().join("embedding_service/venv").exists());
    }
}
