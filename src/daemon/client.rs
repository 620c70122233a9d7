//! Client side: ask the daemon, or answer locally when it is absent.
//!
//! The daemon is only a warm cache: failing to connect is never an error,
//! it just means one-off resolution. So does a daemon that closes the
//! connection without a reply. Once a daemon has accepted the connection,
//! I/O failures are reported instead of silently recomputed.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Result, TbError};

/// Cap on accepted reply size.
const MAX_REPLY: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Daemon,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub command: String,
    pub route: Route,
}

#[derive(Debug, Clone)]
pub struct ClientDispatcher {
    addr: SocketAddr,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl ClientDispatcher {
    pub fn new(addr: SocketAddr, connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            response_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self::new(
            config.addr()?,
            config.connect_timeout(),
            config.response_timeout(),
        ))
    }

    /// Resolve `query` through the daemon, falling back to `local`.
    pub fn dispatch<F>(&self, query: &str, local: F) -> Result<Answer>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        match self.ask_daemon(query)? {
            Some(command) => Ok(Answer {
                command,
                route: Route::Daemon,
            }),
            None => {
                debug!(addr = %self.addr, "resolving locally");
                Ok(Answer {
                    command: local(query)?,
                    route: Route::Local,
                })
            }
        }
    }

    /// `Ok(None)` when no daemon could be reached or it declined to answer.
    pub fn ask_daemon(&self, query: &str) -> Result<Option<String>> {
        let mut stream = match TcpStream::connect_timeout(&self.addr, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "daemon unreachable");
                return Ok(None);
            }
        };

        match self.exchange(&mut stream, query) {
            Ok(reply) if reply.is_empty() => {
                debug!(addr = %self.addr, "daemon closed the connection without a reply");
                Ok(None)
            }
            Ok(reply) => Ok(Some(reply)),
            Err(e) => Err(TbError::Daemon(e.to_string())),
        }
    }

    fn exchange(&self, stream: &mut TcpStream, query: &str) -> std::io::Result<String> {
        stream.set_read_timeout(Some(self.response_timeout))?;
        stream.set_write_timeout(Some(self.response_timeout))?;

        stream.write_all(query.as_bytes())?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let mut reply = Vec::new();
        (&mut *stream).take(MAX_REPLY).read_to_end(&mut reply)?;

        debug!(addr = %self.addr, bytes = reply.len(), "daemon replied");
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}
