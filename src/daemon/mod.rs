//! Daemon module: background process that keeps resources warm.
//!
//! Building resources (loading and embedding the example set) is slow.
//! The daemon does it once and then answers queries over a local TCP
//! socket. The CLI asks the daemon first and resolves locally when none
//! is listening, so the daemon is an optimization, never a requirement.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           tb server up                  │
//! │  - resources in memory                  │
//! │  - TCP listener, thread per connection  │
//! │  - pid file (/tmp/tb_server.pid)        │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ 127.0.0.1:65432, raw text
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           tb query                      │
//! │  - sends the query, prints the reply    │
//! │  - no daemon: one-off resolution        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! There is no authentication: any local process can query the daemon.
//! This is a single-user tool bound to loopback by default.

pub mod client;
pub mod pid;
pub mod process;
pub mod server;
pub mod supervisor;

pub use client::{Answer, ClientDispatcher, Route};
pub use pid::{PidRecord, PidRegistry};
pub use server::ConnectionServer;
pub use supervisor::{DaemonStatus, DaemonSupervisor, StartOutcome, StopOutcome};
