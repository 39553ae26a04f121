use crate::domain::model::PidState;
use crate::utils::error::{DeployError, Result};
use crate::utils::monitor::ProcessMonitor;
use std::path::{Path, PathBuf};

/// `<pid_dir>/<service>.pid`，內容只有一個十進位 PID
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(pid_dir: &Path, service: &str) -> Self {
        Self {
            path: pid_dir.join(format!("{}.pid", service)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", pid))?;
        Ok(())
    }

    pub fn read(&self) -> Result<Option<u32>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        content
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid > 0)
            .map(Some)
            .ok_or_else(|| DeployError::PidFileError {
                path: self.path.display().to_string(),
                message: format!("expected a process id, found {:?}", content.trim()),
            })
    }

    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn state(&self, monitor: &mut ProcessMonitor) -> Result<PidState> {
        Ok(match self.read()? {
            Some(pid) if monitor.is_alive(pid) => PidState::Running(pid),
            Some(pid) => PidState::Stale(pid),
            None => PidState::Absent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path(), "embedding-service");
        assert_eq!(pid_file.path(), dir.path().join("embedding-service.pid"));

        assert_eq!(pid_file.read().unwrap(), None);
        pid_file.write(4242).unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(4242));

        pid_file.remove().unwrap();
        assert_eq!(pid_file.read().unwrap(), None);
        // 不存在時移除也不算錯誤
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_garbage_pid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path(), "llm-service");
        std::fs::write(pid_file.path(), "not-a-pid").unwrap();
        assert!(matches!(
            pid_file.read(),
            Err(DeployError::PidFileError { .. })
        ));
    }

    #[test]
    fn test_state_distinguishes_running_and_stale() {
        let dir = TempDir::new().unwrap();
        let mut monitor = ProcessMonitor::new();

        let running = PidFile::new(dir.path(), "self");
        running.write(std::process::id()).unwrap();
        assert_eq!(
            running.state(&mut monitor).unwrap(),
            PidState::Running(std::process::id())
        );

        let stale = PidFile::new(dir.path(), "gone");
        stale.write(u32::MAX - 1).unwrap();
        assert_eq!(stale.state(&mut monitor).unwrap(), PidState::Stale(u32::MAX - 1));

        let absent = PidFile::new(dir.path(), "never-started");
        assert_eq!(absent.state(&mut monitor).unwrap(), PidState::Absent);
    }
}
