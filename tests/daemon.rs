//! End-to-end daemon tests: foreground server, client dispatch, fallback.
//!
//! The model endpoint is replaced by a bag-of-letters embedder and a
//! generator that answers with the closest example's command, so the
//! whole pipeline runs offline and deterministically.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tbuddy::daemon::process::{self, Signal};
use tbuddy::daemon::{
    ClientDispatcher, ConnectionServer, DaemonStatus, DaemonSupervisor, Route, StartOutcome,
    StopOutcome,
};
use tbuddy::resolver::PromptTemplate;
use tbuddy::{
    CommandGenerator, CommandResolver, Embedder, Result, ResourceBuilder, SelectionConfig,
    ServerConfig, TbError,
};
use tempfile::tempdir;

struct LetterEmbedder;

impl LetterEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; 26];
        for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
            v[(c - b'a') as usize] += 1.0;
        }
        v
    }
}

impl Embedder for LetterEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

struct NearestExample;

impl CommandGenerator for NearestExample {
    fn terminal_command(&self, query: &str, prompt: &PromptTemplate) -> Result<String> {
        prompt
            .select(&LetterEmbedder::vector(query))
            .first()
            .map(|e| e.command.clone())
            .ok_or_else(|| TbError::Generation("no examples".to_string()))
    }
}

fn stub_resolver() -> Result<CommandResolver> {
    let resources =
        ResourceBuilder::new(None, SelectionConfig::default(), Arc::new(LetterEmbedder)).build()?;
    Ok(CommandResolver::new(resources, Arc::new(NearestExample)))
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn server_config(dir: &Path, port: u16) -> ServerConfig {
    ServerConfig {
        port,
        pid_file: dir.join("tb_server.pid"),
        log_file: dir.join("tb_server.log"),
        ..ServerConfig::default()
    }
}

/// Run a foreground daemon on a background thread and wait until ready.
fn start_foreground(config: ServerConfig) {
    let supervisor = DaemonSupervisor::new(config.clone());
    thread::spawn(move || {
        let _ = DaemonSupervisor::new(config).start(false, stub_resolver);
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if supervisor.is_running() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("daemon did not become ready");
}

fn dispatcher(config: &ServerConfig) -> ClientDispatcher {
    ClientDispatcher::from_config(config).unwrap()
}

#[test]
fn test_status_without_pid_file() {
    let dir = tempdir().unwrap();
    let supervisor = DaemonSupervisor::new(server_config(dir.path(), free_port()));
    assert_eq!(supervisor.status(), DaemonStatus::NotRunning);
}

#[test]
fn test_foreground_start_publishes_pid_and_serves() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    start_foreground(config.clone());

    let supervisor = DaemonSupervisor::new(config.clone());
    let pid = std::process::id();
    assert_eq!(supervisor.registry().load(), Some(pid));
    assert_eq!(supervisor.status(), DaemonStatus::Ready { pid });

    let answer = dispatcher(&config)
        .dispatch("list files", |_| panic!("daemon is up, no fallback expected"))
        .unwrap();
    assert_eq!(answer.route, Route::Daemon);
    assert!(!answer.command.is_empty());
}

#[test]
fn test_daemon_and_one_off_agree() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    start_foreground(config.clone());

    let local = stub_resolver().unwrap();
    for query in [
        "list all files including hidden ones",
        "show free disk space in human readable form",
        "which process is listening on port 8080",
    ] {
        let via_daemon = dispatcher(&config)
            .dispatch(query, |_| panic!("daemon is up"))
            .unwrap();
        assert_eq!(via_daemon.route, Route::Daemon);
        assert_eq!(via_daemon.command, local.resolve(query).unwrap());
    }

    assert_eq!(local.resolve("list all files including hidden ones").unwrap(), "ls -la");
}

#[test]
fn test_daemon_and_one_off_agree_on_blank_queries() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    start_foreground(config.clone());

    let local = stub_resolver().unwrap();
    for query in ["   ", "\t\n"] {
        let via_daemon = dispatcher(&config)
            .dispatch(query, |q| stub_resolver()?.resolve(q))
            .unwrap();
        assert_eq!(via_daemon.command, local.resolve(query).unwrap());
    }

    // Zero bytes get no reply from the daemon; the client resolves locally.
    let empty = dispatcher(&config)
        .dispatch("", |q| stub_resolver()?.resolve(q))
        .unwrap();
    assert_eq!(empty.route, Route::Local);
    assert_eq!(empty.command, local.resolve("").unwrap());
}

#[test]
fn test_slow_failing_build_does_not_strand_clients() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    let supervisor = DaemonSupervisor::new(config.clone());

    let daemon_config = config.clone();
    let daemon = thread::spawn(move || {
        DaemonSupervisor::new(daemon_config).start(false, || {
            thread::sleep(Duration::from_millis(1500));
            Err(TbError::Generation("model endpoint down".to_string()))
        })
    });

    thread::sleep(Duration::from_millis(300));
    assert_eq!(supervisor.status(), DaemonStatus::NotRunning);

    let answer = dispatcher(&config)
        .dispatch("list files", |q| stub_resolver()?.resolve(q))
        .unwrap();
    assert_eq!(answer.route, Route::Local);
    assert!(!answer.command.is_empty());

    let result = daemon.join().unwrap();
    assert!(matches!(result, Err(TbError::Generation(_))));
    assert_eq!(supervisor.status(), DaemonStatus::NotRunning);
    assert!(!process::port_in_use(config.addr().unwrap()));
}

#[test]
fn test_second_daemon_cannot_bind() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    start_foreground(config.clone());

    let second = DaemonSupervisor::new(config.clone());
    let outcome = second.start(false, || panic!("must not build")).unwrap();
    assert_eq!(outcome, StartOutcome::AlreadyRunning { pid: std::process::id() });

    // Skipping the pid check, the bind itself refuses.
    let err = second.run_foreground(stub_resolver).err().unwrap();
    assert!(matches!(err, TbError::AddrInUse { .. }));
    assert!(matches!(
        ConnectionServer::bind(config.addr().unwrap(), 4096),
        Err(TbError::AddrInUse { .. })
    ));

    // The loser leaves the winner's pid record alone.
    assert_eq!(second.registry().load(), Some(std::process::id()));
}

#[test]
fn test_concurrent_queries() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    start_foreground(config.clone());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let client = dispatcher(&config);
            thread::spawn(move || {
                client
                    .dispatch("show memory usage", |_| panic!("daemon is up"))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        let answer = handle.join().unwrap();
        assert_eq!(answer.route, Route::Daemon);
        assert_eq!(answer.command, "free -h");
    }
}

#[test]
fn test_oversized_query_is_truncated_not_fatal() {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        read_buffer: 32,
        ..server_config(dir.path(), free_port())
    };
    start_foreground(config.clone());

    let query = format!("show memory usage {}", "padding ".repeat(500));
    let answer = dispatcher(&config)
        .dispatch(&query, |_| panic!("daemon is up"))
        .unwrap();
    assert_eq!(answer.route, Route::Daemon);
    assert!(!answer.command.is_empty());
}

#[test]
fn test_crashed_daemon_falls_back() {
    let dir = tempdir().unwrap();
    let config = server_config(dir.path(), free_port());
    let supervisor = DaemonSupervisor::new(config.clone());

    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    supervisor.registry().save(pid).unwrap();

    assert_eq!(supervisor.status(), DaemonStatus::Crashed { pid });
    assert!(!supervisor.is_running());

    let answer = dispatcher(&config)
        .dispatch("list files", |q| stub_resolver()?.resolve(q))
        .unwrap();
    assert_eq!(answer.route, Route::Local);
    assert!(!answer.command.is_empty());
}

#[test]
fn test_stop_twice() {
    let dir = tempdir().unwrap();
    let supervisor = DaemonSupervisor::new(server_config(dir.path(), free_port()));
    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
}

#[test]
fn test_stop_removes_pid_file() {
    let dir = tempdir().unwrap();
    let supervisor = DaemonSupervisor::new(server_config(dir.path(), free_port()))
        .with_grace(Duration::from_millis(500));

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();
    supervisor.registry().save(pid).unwrap();
    let reaper = thread::spawn(move || child.wait());

    assert_eq!(supervisor.stop(), StopOutcome::Terminated { pid });
    assert!(!supervisor.registry().path().exists());
    reaper.join().unwrap().unwrap();
    assert_eq!(supervisor.status(), DaemonStatus::NotRunning);
}

/// Stand-in for the model server: bag-of-letters embeddings, and every
/// generation answers `ls -la`. Embedding requests wait `embed_delay`.
fn fake_model_server(embed_delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || answer_model_request(stream, embed_delay));
        }
    });
    addr
}

fn answer_model_request(mut stream: TcpStream, embed_delay: Duration) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).unwrap();
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();
    let request: serde_json::Value = serde_json::from_slice(&body).unwrap();

    let reply = if request_line.contains("/api/embed") {
        thread::sleep(embed_delay);
        let embeddings: Vec<Vec<f32>> = request["input"]
            .as_array()
            .unwrap()
            .iter()
            .map(|text| LetterEmbedder::vector(text.as_str().unwrap()))
            .collect();
        serde_json::json!({ "embeddings": embeddings })
    } else {
        serde_json::json!({ "response": "ls -la" })
    };

    let body = reply.to_string();
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
    .unwrap();
}

fn write_config(dir: &Path, port: u16, model: SocketAddr) -> PathBuf {
    let path = dir.join("config.toml");
    let text = format!(
        "[server]\nport = {}\npid_file = {:?}\nlog_file = {:?}\n\n[model]\nollama_url = \"http://{}\"\n",
        port,
        dir.join("tb_server.pid").display().to_string(),
        dir.join("tb_server.log").display().to_string(),
        model,
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn reap(pid: u32) {
    let mut status = 0;
    unsafe {
        libc::waitpid(pid as libc::pid_t, &mut status, 0);
    }
}

#[test]
fn test_detached_daemon_serves_then_crash_falls_back() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let model = fake_model_server(Duration::from_millis(500));
    let config_path = write_config(dir.path(), port, model);
    let config = server_config(dir.path(), port);

    let supervisor = DaemonSupervisor::new(config.clone())
        .with_config_path(Some(config_path))
        .with_executable(PathBuf::from(env!("CARGO_BIN_EXE_tb")));

    let outcome = supervisor
        .start(true, || panic!("detached start builds in the child"))
        .unwrap();
    let StartOutcome::Spawned { pid } = outcome else {
        panic!("expected a spawned child, got {:?}", outcome);
    };

    // The child publishes its own pid after building; the parent never does.
    assert_eq!(supervisor.registry().load(), None);
    assert_ne!(unsafe { libc::getsid(pid as libc::pid_t) }, unsafe { libc::getsid(0) });

    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline && !supervisor.is_running() {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(supervisor.status(), DaemonStatus::Ready { pid });

    let answer = dispatcher(&config)
        .dispatch("list files", |_| panic!("daemon is up"))
        .unwrap();
    assert_eq!(answer.route, Route::Daemon);
    assert_eq!(answer.command, "ls -la");

    let log = std::fs::read_to_string(&config.log_file).unwrap();
    assert!(log.contains("listening"), "daemon log was {:?}", log);

    // Kill the daemon behind the supervisor's back.
    process::send_signal(pid, Signal::Kill).unwrap();
    reap(pid);

    assert_eq!(supervisor.status(), DaemonStatus::Crashed { pid });
    let answer = dispatcher(&config)
        .dispatch("list files", |q| stub_resolver()?.resolve(q))
        .unwrap();
    assert_eq!(answer.route, Route::Local);
    assert!(!answer.command.is_empty());

    assert_eq!(supervisor.stop(), StopOutcome::Stale { pid });
    assert!(!supervisor.registry().path().exists());
}
