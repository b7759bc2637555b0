//! Detached process launcher
//!
//! Starts a game executable in its own process group with null stdio and
//! forgets about it. The launcher reports whether the spawn itself worked and
//! nothing about what happens inside the game afterwards.

use crate::error::{LauncherError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Everything needed to start one game process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub executable_path: PathBuf,
    /// Parent directory of the executable, so relative asset paths resolve
    pub working_directory: PathBuf,
    pub arguments: Vec<String>,
}

impl LaunchRequest {
    pub fn new<P: Into<PathBuf>>(executable_path: P, arguments: Vec<String>) -> Self {
        let executable_path = executable_path.into();
        let working_directory = executable_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            executable_path,
            working_directory,
            arguments,
        }
    }
}

/// Outcome of a successful spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReceipt {
    /// OS process id, when the platform reported one
    pub pid: Option<u32>,
    pub executable_path: PathBuf,
}

/// Starts processes the caller will never wait on
pub trait ProcessSpawner: Send + Sync {
    fn spawn_detached(&self, request: &LaunchRequest) -> Result<LaunchReceipt>;
}

/// Spawner backed by the operating system
#[derive(Debug, Clone, Default)]
pub struct DetachedLauncher;

impl DetachedLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for DetachedLauncher {
    fn spawn_detached(&self, request: &LaunchRequest) -> Result<LaunchReceipt> {
        let path = &request.executable_path;
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(LauncherError::LaunchFailed {
                    path: path.clone(),
                    reason: format!("'{}' is not a file", path.display()),
                    source: None,
                });
            }
            Err(e) => {
                return Err(LauncherError::LaunchFailed {
                    path: path.clone(),
                    reason: format!("executable not found at '{}'", path.display()),
                    source: Some(e),
                });
            }
        }

        let mut command = Command::new(path);
        command
            .args(&request.arguments)
            .current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // New process group: a signal to the launcher's group must not reach the game.
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);

        let child = command.spawn().map_err(|e| LauncherError::LaunchFailed {
            path: path.clone(),
            reason: format!("failed to start '{}': {}", path.display(), e),
            source: Some(e),
        })?;

        let pid = child.id();
        // Dropping the handle detaches; the runtime reaps the process when it exits.
        drop(child);

        info!("Launched {} (pid {:?})", path.display(), pid);
        Ok(LaunchReceipt {
            pid,
            executable_path: path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn working_directory_is_executable_parent() {
        let request = LaunchRequest::new("/games/abc/game.exe", vec!["-key".into()]);
        assert_eq!(request.working_directory, PathBuf::from("/games/abc"));
    }

    #[tokio::test]
    async fn missing_executable_names_the_path() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("game.exe");

        let err = DetachedLauncher::new()
            .spawn_detached(&LaunchRequest::new(&exe, Vec::new()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        assert!(err.to_string().contains(&exe.display().to_string()));
    }

    #[tokio::test]
    async fn directory_is_not_launchable() {
        let dir = tempdir().unwrap();
        let err = DetachedLauncher::new()
            .spawn_detached(&LaunchRequest::new(dir.path(), Vec::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawns_with_arguments_in_executable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let game_dir = dir.path().join("games").join("demo");
        std::fs::create_dir_all(&game_dir).unwrap();
        let exe = game_dir.join("game.exe");
        std::fs::write(&exe, "#!/bin/sh\nprintf '%s\\n' \"$PWD\" \"$@\" > launched.tmp\nmv launched.tmp launched.txt\n")
            .unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let args = vec!["-key".to_string(), "k3y".to_string(), "-name".to_string(), "Retro Gamer".to_string()];
        let receipt = DetachedLauncher::new()
            .spawn_detached(&LaunchRequest::new(&exe, args))
            .unwrap();
        assert!(receipt.pid.is_some());

        let marker = game_dir.join("launched.txt");
        let mut waited = Duration::ZERO;
        while !marker.exists() && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }

        let output = std::fs::read_to_string(&marker).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            std::fs::canonicalize(lines[0]).unwrap(),
            std::fs::canonicalize(&game_dir).unwrap()
        );
        assert_eq!(&lines[1..], &["-key", "k3y", "-name", "Retro Gamer"]);
    }

    /// Process group id, field 5 of a `/proc/<pid>/stat` line
    #[cfg(target_os = "linux")]
    fn process_group_of(stat: &str) -> u32 {
        let after_comm = &stat[stat.rfind(')').unwrap() + 2..];
        after_comm.split_whitespace().nth(2).unwrap().parse().unwrap()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn game_runs_in_its_own_process_group() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let exe = dir.path().join("game.exe");
        std::fs::write(&exe, "#!/bin/sh
cat /proc/$$/stat > stat.tmp
mv stat.tmp stat.txt
").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let receipt = DetachedLauncher::new()
            .spawn_detached(&LaunchRequest::new(&exe, Vec::new()))
            .unwrap();

        let marker = dir.path().join("stat.txt");
        let mut waited = Duration::ZERO;
        while !marker.exists() && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }

        let child_group = process_group_of(&std::fs::read_to_string(&marker).unwrap());
        let own_group = process_group_of(&std::fs::read_to_string("/proc/self/stat").unwrap());

        assert_ne!(child_group, own_group);
        assert_eq!(Some(child_group), receipt.pid);
    }
}
