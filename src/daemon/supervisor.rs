//! Daemon supervisor: start, stop and status for the background server.
//!
//! State as seen from outside the daemon:
//!
//! ```text
//! NotRunning ──start──▶ (build) ──bind──▶ Ready ──stop──▶ NotRunning
//!                                           │
//!                                           └── pid gone ──▶ Crashed
//! ```
//!
//! A daemon records its pid only once it holds the port, so while it is
//! still building resources the outside world sees `NotRunning` and
//! clients resolve locally. `Starting` is a recorded, live pid that does
//! not own the port.
//!
//! The pid file is only a hint. Whoever wins the bind owns the port;
//! the pid check just avoids spawning a process that is bound to lose.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, TbError};
use crate::resolver::CommandResolver;

use super::pid::PidRegistry;
use super::process::{self, Signal};
use super::server::ConnectionServer;

/// How long a SIGTERM'd daemon gets before SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    NotRunning,
    /// A pid is recorded but that process no longer exists.
    Crashed { pid: u32 },
    /// Alive, but not the process listening on the port.
    Starting { pid: u32 },
    Ready { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning { pid: u32 },
    /// Detached child launched; poll `status()` for readiness.
    Spawned { pid: u32 },
    /// Foreground accept loop returned.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// Recorded pid was already gone; its pid file was removed.
    Stale { pid: u32 },
    Terminated { pid: u32 },
    Killed { pid: u32 },
    /// Recorded pid survived SIGTERM but does not own the port. It may be
    /// an unrelated process that reused the pid, so it was not killed.
    Spared { pid: u32 },
}

pub struct DaemonSupervisor {
    config: ServerConfig,
    registry: PidRegistry,
    grace: Duration,
    /// Forwarded to the detached child as `--config`.
    config_path: Option<PathBuf>,
    /// Binary re-run for detached starts; the current executable if unset.
    executable: Option<PathBuf>,
}

impl DaemonSupervisor {
    pub fn new(config: ServerConfig) -> Self {
        let registry = PidRegistry::new(config.pid_file.clone());
        Self {
            config,
            registry,
            grace: DEFAULT_GRACE,
            config_path: None,
            executable: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_executable(mut self, exe: PathBuf) -> Self {
        self.executable = Some(exe);
        self
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current daemon state. Never connects to the daemon.
    pub fn status(&self) -> DaemonStatus {
        let Some(pid) = self.registry.load() else {
            return DaemonStatus::NotRunning;
        };

        if !process::process_alive(pid) {
            return DaemonStatus::Crashed { pid };
        }

        if self.owns_port(pid) {
            DaemonStatus::Ready { pid }
        } else {
            DaemonStatus::Starting { pid }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), DaemonStatus::Ready { .. })
    }

    fn port_bound(&self) -> bool {
        self.config.addr().map(process::port_in_use).unwrap_or(false)
    }

    fn owns_port(&self, pid: u32) -> bool {
        match process::port_owner(self.config.port) {
            Some(owner) if owner == pid => true,
            Some(owner) => {
                debug!(pid, owner, port = self.config.port, "port held by another process");
                false
            }
            // owner unknown: fall back to "is anything bound at all"
            None => self.port_bound(),
        }
    }

    /// Pid of a live daemon, ready or still starting.
    fn live_pid(&self) -> Option<u32> {
        match self.status() {
            DaemonStatus::Ready { pid } | DaemonStatus::Starting { pid } => Some(pid),
            DaemonStatus::NotRunning | DaemonStatus::Crashed { .. } => None,
        }
    }

    /// Start the daemon, detached or in this process.
    ///
    /// `build` runs only in foreground mode, before the socket is bound.
    pub fn start<F>(&self, daemonize: bool, build: F) -> Result<StartOutcome>
    where
        F: FnOnce() -> Result<CommandResolver>,
    {
        if let Some(pid) = self.live_pid() {
            info!(pid, "server already running");
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        if daemonize {
            self.spawn_detached()
        } else {
            self.run_foreground(build)
        }
    }

    /// Re-run this executable as `server up --no-daemonize` in a new session.
    fn spawn_detached(&self) -> Result<StartOutcome> {
        let exe = match &self.executable {
            Some(exe) => exe.clone(),
            None => std::env::current_exe()?,
        };

        let mut args: Vec<std::ffi::OsString> = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".into());
            args.push(path.clone().into_os_string());
        }
        args.extend(["server", "up", "--no-daemonize"].map(std::ffi::OsString::from));

        let pid = process::spawn_detached(&exe, &args, Some(self.config.log_file.as_path()))?;
        info!(pid, log = %self.config.log_file.display(), "daemon spawned");
        Ok(StartOutcome::Spawned { pid })
    }

    /// Build resources, bind, publish our pid, serve.
    ///
    /// Nothing listens until the resolver exists, so clients arriving
    /// during the build (or after a failed one) resolve locally.
    pub fn run_foreground<F>(&self, build: F) -> Result<StartOutcome>
    where
        F: FnOnce() -> Result<CommandResolver>,
    {
        let addr = self.config.addr()?;
        if process::port_in_use(addr) {
            return Err(TbError::AddrInUse { addr });
        }

        let resolver = Arc::new(build()?);
        let server = ConnectionServer::bind(addr, self.config.read_buffer)?;

        let pid = std::process::id();
        self.registry.save(pid)?;
        let _guard = PidGuard {
            registry: &self.registry,
            pid,
        };
        info!(pid, pid_file = %self.registry.path().display(), "pid published");

        server.serve(resolver)?;
        Ok(StartOutcome::Stopped)
    }

    /// Stop the daemon: SIGTERM, wait up to the grace period, then SIGKILL.
    ///
    /// Never fails. Signal errors mean the process is already gone. SIGKILL
    /// is only sent to a pid that owns the port.
    pub fn stop(&self) -> StopOutcome {
        let Some(pid) = self.registry.load() else {
            return StopOutcome::NotRunning;
        };

        if !process::process_alive(pid) {
            info!(pid, "removing stale pid file");
            self.registry.remove();
            return StopOutcome::Stale { pid };
        }

        let owns_port = self.owns_port(pid);
        if !owns_port {
            warn!(pid, port = self.config.port, "recorded pid does not own the port, pid may have been reused");
        }

        if let Err(e) = process::send_signal(pid, Signal::Terminate) {
            debug!(pid, error = %e, "SIGTERM failed, treating as stopped");
            self.registry.remove();
            return StopOutcome::Terminated { pid };
        }

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if !process::process_alive(pid) {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let outcome = if !process::process_alive(pid) {
            StopOutcome::Terminated { pid }
        } else if !owns_port {
            warn!(pid, "process survived SIGTERM, not killing a pid that does not own the port");
            StopOutcome::Spared { pid }
        } else {
            warn!(pid, grace_ms = self.grace.as_millis() as u64, "daemon ignored SIGTERM, killing");
            if let Err(e) = process::send_signal(pid, Signal::Kill) {
                debug!(pid, error = %e, "SIGKILL failed, treating as stopped");
            }
            StopOutcome::Killed { pid }
        };

        self.registry.remove();
        info!(pid, ?outcome, "daemon stopped");
        outcome
    }
}

/// Removes the pid file when the foreground server exits, unless another
/// daemon has replaced it meanwhile.
struct PidGuard<'a> {
    registry: &'a PidRegistry,
    pid: u32,
}

impl Drop for PidGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove_if_owned(self.pid);
    }
}
