//! Daemon server: TCP listener answering one query per connection.
//!
//! Protocol: the client writes raw UTF-8 query text; the server does a
//! single bounded read, resolves, writes the command back and closes.
//! Queries longer than the read buffer are truncated to what that one
//! read returned. A connection that ends with no reply tells the client
//! to resolve locally.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TbError};
use crate::resolver::CommandResolver;

/// How long a connection may stay silent before its thread gives up.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on discarded trailing input per connection.
const DRAIN_LIMIT: u64 = 1 << 20;

pub struct ConnectionServer {
    listener: TcpListener,
    read_buffer: usize,
}

impl ConnectionServer {
    /// Bind the listening socket.
    ///
    /// `AddrInUse` is the proof that another daemon owns the port.
    pub fn bind(addr: SocketAddr, read_buffer: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => TbError::AddrInUse { addr },
            _ => TbError::Io(e),
        })?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            read_buffer: read_buffer.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one thread each.
    pub fn serve(self, resolver: Arc<CommandResolver>) -> Result<()> {
        info!("accepting connections");
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let resolver = Arc::clone(&resolver);
                    let read_buffer = self.read_buffer;
                    thread::spawn(move || {
                        if let Err(e) = handle_client(stream, &resolver, read_buffer) {
                            debug!(error = %e, "client handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
        Ok(())
    }
}

/// Handle a single client connection.
fn handle_client(mut stream: TcpStream, resolver: &CommandResolver, read_buffer: usize) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;

    let mut buf = vec![0u8; read_buffer];
    let n = stream.read(&mut buf)?;
    let query = String::from_utf8_lossy(&buf[..n]).into_owned();

    if n == 0 {
        debug!(%peer, "empty request, closing");
        return Ok(());
    }

    info!(%peer, query = %query, "query received");

    let command = match resolver.resolve(&query) {
        Ok(command) => command,
        Err(e) => {
            warn!(%peer, error = %e, "resolve failed");
            return Ok(());
        }
    };

    stream.write_all(command.as_bytes())?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;

    // Unread input would turn close into a reset and lose the reply.
    let _ = io::copy(&mut (&stream).take(DRAIN_LIMIT), &mut io::sink());

    debug!(%peer, bytes = command.len(), "reply sent");
    Ok(())
}
