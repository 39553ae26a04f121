use crate::config::topology::Prerequisite;
use crate::utils::error::{DeployError, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone)]
pub struct PrereqOutcome {
    pub command: String,
    pub path: Option<PathBuf>,
    pub version: Option<Version>,
    pub satisfied: bool,
    pub optional: bool,
    pub message: String,
}

/// 取出字串中第一個 `major.minor[.patch]`
pub fn parse_version(text: &str) -> Option<Version> {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let re = VERSION.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("valid regex"));

    let caps = re.captures(text)?;
    Some(Version {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        patch: caps
            .get(3)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0),
    })
}

/// 等同 `command -v`
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    if command.contains('/') {
        let path = PathBuf::from(command);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

async fn read_version(path: &Path, version_arg: &str) -> Option<Version> {
    let output = tokio::time::timeout(
        VERSION_TIMEOUT,
        Command::new(path).arg(version_arg).output(),
    )
    .await
    .ok()?
    .ok()?;

    // 有些工具把版本印到 stderr
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    parse_version(&text)
}

pub async fn check(prereq: &Prerequisite) -> PrereqOutcome {
    let mut outcome = PrereqOutcome {
        command: prereq.command.clone(),
        path: None,
        version: None,
        satisfied: false,
        optional: prereq.optional,
        message: String::new(),
    };

    let Some(path) = find_in_path(&prereq.command) else {
        outcome.message = "not found in PATH".to_string();
        return outcome;
    };
    outcome.version = read_version(&path, &prereq.version_arg).await;
    outcome.path = Some(path);

    match (&prereq.min_version, outcome.version) {
        (None, version) => {
            outcome.satisfied = true;
            outcome.message = version
                .map(|v| format!("found {}", v))
                .unwrap_or_else(|| "found".to_string());
        }
        (Some(min), Some(found)) => match parse_version(min) {
            Some(required) if found >= required => {
                outcome.satisfied = true;
                outcome.message = format!("found {} (>= {})", found, required);
            }
            Some(required) => {
                outcome.message = format!("found {}, need >= {}", found, required);
            }
            None => {
                outcome.message = format!("cannot interpret required version '{}'", min);
            }
        },
        (Some(min), None) => {
            outcome.message = format!("could not determine version (need >= {})", min);
        }
    }

    outcome
}

/// 檢查適用於該機器的所有前置需求；缺少必要項目時回傳錯誤
pub async fn check_all(prereqs: &[Prerequisite], machine: &str) -> Result<Vec<PrereqOutcome>> {
    let mut outcomes = Vec::new();
    let mut first_failure = None;

    for prereq in prereqs.iter().filter(|p| p.applies_to(machine)) {
        let outcome = check(prereq).await;
        if outcome.satisfied {
            tracing::info!("✅ {}: {}", outcome.command, outcome.message);
        } else if outcome.optional {
            tracing::warn!("⚠️  {} (optional): {}", outcome.command, outcome.message);
            if let Some(hint) = &prereq.hint {
                tracing::warn!("💡 {}", hint);
            }
        } else {
            tracing::error!("❌ {}: {}", outcome.command, outcome.message);
            if let Some(hint) = &prereq.hint {
                tracing::error!("💡 {}", hint);
            }
            first_failure.get_or_insert_with(|| DeployError::PrerequisiteError {
                command: outcome.command.clone(),
                message: outcome.message.clone(),
            });
        }
        outcomes.push(outcome);
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(outcomes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prereq(command: &str, min_version: Option<&str>, optional: bool) -> Prerequisite {
        Prerequisite {
            command: command.to_string(),
            version_arg: "--version".to_string(),
            min_version: min_version.map(str::to_string),
            machines: vec![],
            optional,
            hint: None,
        }
    }

    #[test]
    fn test_parse_version_banners() {
        assert_eq!(
            parse_version("Python 3.11.4"),
            Some(Version { major: 3, minor: 11, patch: 4 })
        );
        assert_eq!(
            parse_version("Docker version 24.0.7, build afdd53b"),
            Some(Version { major: 24, minor: 0, patch: 7 })
        );
        assert_eq!(
            parse_version("3.10"),
            Some(Version { major: 3, minor: 10, patch: 0 })
        );
        assert_eq!(parse_version("no digits here"), None);
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(parse_version("3.10").unwrap() > parse_version("3.9.18").unwrap());
        assert!(parse_version("20.10").unwrap() < parse_version("24.0.7").unwrap());
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-binary-4821").is_none());
        assert!(find_in_path("/bin/sh").is_some());
    }

    #[tokio::test]
    async fn test_missing_required_command_fails() {
        let prereqs = vec![prereq("definitely-not-a-real-binary-4821", None, false)];
        let err = check_all(&prereqs, "mac-mini").await.unwrap_err();
        assert!(matches!(err, DeployError::PrerequisiteError { .. }));
    }

    #[tokio::test]
    async fn test_missing_optional_command_only_warns() {
        let prereqs = vec![prereq("definitely-not-a-real-binary-4821", None, true)];
        let outcomes = check_all(&prereqs, "lenovo-laptop").await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].satisfied);
    }

    #[tokio::test]
    async fn test_prerequisite_scoped_to_other_machine_is_skipped() {
        let mut docker = prereq("definitely-not-a-real-binary-4821", None, false);
        docker.machines = vec!["dell-laptop".to_string()];
        let outcomes = check_all(&[docker], "mac-mini").await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, banner: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("tool");
        std::fs::write(&path, format!("#!/bin/sh\necho \"{}\"\n", banner)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_below_minimum_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "tool 1.9.0");

        let outcome = check(&prereq(&tool, Some("2.0"), false)).await;
        assert!(!outcome.satisfied);
        assert_eq!(outcome.version, Some(Version { major: 1, minor: 9, patch: 0 }));
        assert_eq!(outcome.message, "found 1.9.0, need >= 2.0.0");

        let err = check_all(&[prereq(&tool, Some("2.0"), false)], "dell-laptop")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::PrerequisiteError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_at_minimum_passes() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "Docker version 20.10.0, build abc");

        let outcome = check(&prereq(&tool, Some("20.10"), false)).await;
        assert!(outcome.satisfied);
        assert!(outcome.message.contains(">= 20.10.0"));
    }
}
