//! Daemon auto-spawn.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

/// Launches a daemon when a connection runs out of retries.
pub trait DaemonSpawner: Send + Sync {
    fn spawn(&self, addr: SocketAddr) -> io::Result<()>;
}

/// Spawns `<exe> daemon --port <port>` with detached stdio.
///
/// Uses the current executable unless another program is given.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    program: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Pass `--data-dir` to the spawned daemon.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    fn command(&self, addr: SocketAddr) -> io::Result<Command> {
        let exe = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let mut cmd = Command::new(exe);
        cmd.arg("daemon").arg("--port").arg(addr.port().to_string());
        if let Some(dir) = &self.data_dir {
            cmd.arg("--data-dir").arg(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so the editor's signals do not reach the daemon.
            cmd.process_group(0);
        }
        Ok(cmd)
    }

    /// Start the daemon and reap it on a background thread. Returns its pid.
    fn launch(&self, addr: SocketAddr) -> io::Result<u32> {
        let mut cmd = self.command(addr)?;
        debug!("Spawning daemon: {:?}", cmd);
        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!("Spawned daemon process {} for {}", pid, addr);

        std::thread::Builder::new()
            .name(format!("daemon-reaper-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("Daemon process {} exited: {}", pid, status),
                Err(e) => warn!("Failed to wait for daemon process {}: {}", pid, e),
            })?;
        Ok(pid)
    }
}

impl DaemonSpawner for ProcessSpawner {
    fn spawn(&self, addr: SocketAddr) -> io::Result<()> {
        self.launch(addr).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let spawner = ProcessSpawner::new()
            .with_program("/usr/bin/bugbuddy")
            .with_data_dir("/tmp/bb");
        let cmd = spawner.command("127.0.0.1:4545".parse().unwrap()).unwrap();

        assert_eq!(cmd.get_program(), "/usr/bin/bugbuddy");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["daemon", "--port", "4545", "--data-dir", "/tmp/bb"]);
    }

    #[test]
    fn test_defaults_to_current_exe() {
        let cmd = ProcessSpawner::new()
            .command("127.0.0.1:3434".parse().unwrap())
            .unwrap();
        assert_eq!(cmd.get_program(), std::env::current_exe().unwrap().as_os_str());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_exited_daemon_is_reaped() {
        let pid = ProcessSpawner::new()
            .with_program("/bin/true")
            .launch("127.0.0.1:3434".parse().unwrap())
            .unwrap();

        let proc_entry = std::path::PathBuf::from(format!("/proc/{}", pid));
        for _ in 0..200 {
            if !proc_entry.exists() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("process {} was never reaped", pid);
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let spawner = ProcessSpawner::new().with_program("/nonexistent/bugbuddy-test-binary");
        assert!(spawner.spawn("127.0.0.1:3434".parse().unwrap()).is_err());
    }
}
