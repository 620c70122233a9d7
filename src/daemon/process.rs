//! OS process capabilities used by the supervisor.
//!
//! Liveness and termination go through `kill(2)`. Port ownership is read
//! from `/proc` on Linux; elsewhere only a bind probe is available.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Check whether `pid` exists (signal 0 = check existence).
///
/// EPERM means the process exists but belongs to someone else.
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid_t(pid) else {
        return false;
    };
    unsafe {
        if libc::kill(pid, 0) == 0 {
            return true;
        }
    }
    matches!(io::Error::last_os_error().raw_os_error(), Some(libc::EPERM))
}

/// Deliver `signal` to `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let Some(raw_pid) = to_pid_t(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {}", pid),
        ));
    };
    let rc = unsafe { libc::kill(raw_pid, signal.raw()) };
    if rc == 0 {
        debug!(pid, ?signal, "signal sent");
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether something is already listening on `addr`.
///
/// Probes by binding; the probe socket is dropped immediately.
pub fn port_in_use(addr: SocketAddr) -> bool {
    match TcpListener::bind(addr) {
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::AddrInUse,
    }
}

/// Pid of the process holding a listening TCP socket on `port`.
///
/// `None` when nothing listens, or when the owner cannot be read (other
/// users' fds are not visible without privileges).
#[cfg(target_os = "linux")]
pub fn port_owner(port: u16) -> Option<u32> {
    let inodes = listening_inodes(port);
    if inodes.is_empty() {
        return None;
    }

    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = std::fs::read_link(fd.path()) else {
                continue;
            };
            if let Some(inode) = socket_inode(target.as_os_str()) {
                if inodes.contains(&inode) {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn port_owner(_port: u16) -> Option<u32> {
    None
}

/// Socket inodes in LISTEN state bound to `port`, IPv4 and IPv6.
#[cfg(target_os = "linux")]
fn listening_inodes(port: u16) -> Vec<u64> {
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(text) = std::fs::read_to_string(table) {
            inodes.extend(parse_listening_inodes(&text, port));
        }
    }
    inodes
}

const TCP_LISTEN: &str = "0A";

fn parse_listening_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let local_port = fields[1].rsplit(':').next()?;
            if u16::from_str_radix(local_port, 16).ok()? != port {
                return None;
            }
            fields[9].parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}

fn socket_inode(link: &OsStr) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Spawn `exe args..` detached from the caller's terminal.
///
/// stdin is `/dev/null`; stdout and stderr append to `log` when it can be
/// opened, else `/dev/null`. The child leads a new session so it survives
/// the parent's exit. Returns the child pid.
pub fn spawn_detached<I, S>(exe: &Path, args: I, log: Option<&Path>) -> io::Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(exe);
    cmd.args(args).stdin(Stdio::null());

    let log_file = log.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match log_file {
        Some(file) => {
            let stdout = file
                .try_clone()
                .map(Stdio::from)
                .unwrap_or_else(|_| Stdio::null());
            cmd.stdout(stdout).stderr(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    debug!(pid = child.id(), exe = %exe.display(), "spawned detached process");
    Ok(child.id())
}
