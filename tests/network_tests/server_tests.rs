//! End-to-end server tests over TCP
//!
//! These tests verify:
//! - Request/response for every built-in command
//! - Errors are replied and the connection stays usable
//! - MONITOR hijacks the connection and streams executed commands
//! - Hijacked sessions end on disconnect, unexpected input, idle timeout
//!   and shutdown, but never while events are still streaming
//! - The connection cap

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bitraft::config::SyncPolicy;
use bitraft::consensus::LogOptions;
use bitraft::machine::Consensus;
use bitraft::network::{Server, ShutdownHandle};
use bitraft::protocol::{read_reply, write_command, Command, Reply};
use bitraft::config::ConfigBuilder;
use bitraft::{Config, LocalLog, StateMachine, Store};
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    _temp: TempDir,
    addr: SocketAddr,
    server: Arc<Server>,
    machine: Arc<StateMachine>,
    log: Arc<LocalLog>,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn stop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
        self.log.shutdown();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn setup_server(max_connections: usize) -> TestServer {
    setup_server_with(|builder| builder.max_connections(max_connections))
}

fn setup_server_with(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> TestServer {
    let temp_dir = TempDir::new().unwrap();
    let builder = Config::builder()
        .data_dir(temp_dir.path())
        .sync_policy(SyncPolicy::Never)
        .bind("127.0.0.1:0")
        .snapshot_threshold(0);
    let config = configure(builder).build();

    let store = Store::open(&config.db_dir(), config.store_options()).unwrap();
    let machine = Arc::new(StateMachine::new(&config, store));
    let log = Arc::new(
        LocalLog::start(Arc::clone(&machine), LogOptions::from_config(&config)).unwrap(),
    );
    let consensus: Arc<dyn Consensus> = Arc::clone(&log) as Arc<dyn Consensus>;

    let server = Arc::new(Server::bind(config, Arc::clone(&machine), consensus).unwrap());
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let runner = Arc::clone(&server);
    let thread = thread::spawn(move || runner.run().unwrap());

    TestServer {
        _temp: temp_dir,
        addr,
        server,
        machine,
        log,
        shutdown,
        thread: Some(thread),
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: BufWriter::new(stream),
        }
    }

    fn call(&mut self, name: &str, args: &[&str]) -> Reply {
        self.send(name, args);
        read_reply(&mut self.reader).unwrap()
    }

    fn send(&mut self, name: &str, args: &[&str]) {
        let command = Command::new(
            name,
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        );
        write_command(&mut self.writer, &command).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    fn next_line(&mut self) -> String {
        match read_reply(&mut self.reader).unwrap() {
            Reply::Status(line) => line,
            other => panic!("expected status line, got {:?}", other),
        }
    }

    /// True once the server has closed the connection
    fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(self.reader.read(&mut buf), Ok(0) | Err(_))
    }
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

fn bulk(value: &str) -> Reply {
    Reply::Bulk(Bytes::copy_from_slice(value.as_bytes()))
}

// =============================================================================
// Request / Response
// =============================================================================

#[test]
fn test_command_round_trips() {
    let server = setup_server(16);
    let mut client = Client::connect(server.addr);

    assert_eq!(client.call("SET", &["a", "1"]), Reply::Ok);
    assert_eq!(client.call("SET", &["b", "2"]), Reply::Ok);
    assert_eq!(client.call("GET", &["a"]), bulk("1"));
    assert_eq!(
        client.call("KEYS", &[""]),
        Reply::Array(vec![bulk("a"), bulk("b")])
    );
    assert_eq!(client.call("DEL", &["a", "zzz"]), Reply::Integer(1));
    assert_eq!(client.call("GET", &["a"]), Reply::Nil);
    assert_eq!(client.call("DBSIZE", &[]), Reply::Integer(1));
}

#[test]
fn test_inline_commands() {
    let server = setup_server(16);
    let mut client = Client::connect(server.addr);

    client.send_raw(b"SET k v\r\nGET k\r\n");

    assert_eq!(read_reply(&mut client.reader).unwrap(), Reply::Ok);
    assert_eq!(read_reply(&mut client.reader).unwrap(), bulk("v"));
}

#[test]
fn test_errors_keep_connection_open() {
    let server = setup_server(16);
    let mut client = Client::connect(server.addr);

    match client.call("FLUSHALL", &[]) {
        Reply::Error(message) => assert_eq!(message, "ERR unknown command 'flushall'"),
        other => panic!("expected error, got {:?}", other),
    }
    match client.call("GET", &[]) {
        Reply::Error(message) => {
            assert_eq!(message, "ERR wrong number of arguments for 'get' command")
        }
        other => panic!("expected error, got {:?}", other),
    }

    let oversized = "k".repeat(65);
    assert!(matches!(
        client.call("SET", &[oversized.as_str(), "v"]),
        Reply::Error(_)
    ));
    assert_eq!(client.call("DBSIZE", &[]), Reply::Integer(0));
}

#[test]
fn test_writes_visible_to_other_clients() {
    let server = setup_server(16);
    let mut writer = Client::connect(server.addr);
    let mut reader = Client::connect(server.addr);

    writer.call("SET", &["shared", "yes"]);

    assert_eq!(reader.call("GET", &["shared"]), bulk("yes"));
    assert_eq!(server.log.applied_index(), 1);
}

// =============================================================================
// MONITOR
// =============================================================================

#[test]
fn test_monitor_streams_executed_commands() {
    let server = setup_server(16);
    let mut monitor = Client::connect(server.addr);
    let mut client = Client::connect(server.addr);

    assert_eq!(monitor.call("MONITOR", &[]), Reply::Ok);
    assert_eq!(server.machine.monitor().observer_count(), 1);

    client.call("SET", &["a", "1"]);
    client.call("GET", &["a"]);
    client.call("DEL", &["a"]);

    let set = monitor.next_line();
    assert!(set.ends_with("\"set\" \"a\" \"1\""), "line: {}", set);
    assert!(set.contains(" [0 127.0.0.1:"), "line: {}", set);
    assert!(monitor.next_line().ends_with("\"get\" \"a\""));
    assert!(monitor.next_line().ends_with("\"del\" \"a\""));
}

#[test]
fn test_monitor_ignores_rejected_commands() {
    let server = setup_server(16);
    let mut monitor = Client::connect(server.addr);
    let mut client = Client::connect(server.addr);

    monitor.call("MONITOR", &[]);
    client.call("NOPE", &[]);
    client.call("DBSIZE", &[]);

    assert!(monitor.next_line().ends_with("\"dbsize\""));
}

#[test]
fn test_monitor_disconnect_releases_observer() {
    let server = setup_server(16);
    let mut monitor = Client::connect(server.addr);

    monitor.call("MONITOR", &[]);
    assert_eq!(server.machine.monitor().observer_count(), 1);
    drop(monitor);

    wait_for("observer release", || server.machine.monitor().observer_count() == 0);

    // Publishing with no observers is fine
    let mut client = Client::connect(server.addr);
    assert_eq!(client.call("SET", &["x", "1"]), Reply::Ok);
}

#[test]
fn test_monitor_input_ends_session() {
    let server = setup_server(16);
    let mut monitor = Client::connect(server.addr);

    monitor.call("MONITOR", &[]);
    monitor.send("GET", &["a"]);

    assert!(monitor.is_closed());
    wait_for("observer release", || server.machine.monitor().observer_count() == 0);
}

#[test]
fn test_shutdown_closes_monitor_sessions() {
    let mut server = setup_server(16);
    let mut monitor = Client::connect(server.addr);
    let mut idle = Client::connect(server.addr);

    monitor.call("MONITOR", &[]);
    idle.call("DBSIZE", &[]);

    server.stop();

    assert!(monitor.is_closed());
    assert!(idle.is_closed());
    assert_eq!(server.machine.monitor().observer_count(), 0);
    assert_eq!(server.server.connection_count(), 0);
}

#[test]
fn test_streaming_monitor_outlives_idle_timeout() {
    let server = setup_server_with(|builder| builder.monitor_idle_timeout_ms(300));
    let mut monitor = Client::connect(server.addr);
    let mut client = Client::connect(server.addr);

    assert_eq!(monitor.call("MONITOR", &[]), Reply::Ok);

    // One second of traffic, well past the timeout, with short gaps
    for n in 0..20 {
        let value = n.to_string();
        assert_eq!(client.call("SET", &["tick", value.as_str()]), Reply::Ok);
        thread::sleep(Duration::from_millis(50));
    }

    for n in 0..20 {
        let line = monitor.next_line();
        let expected = format!("\"set\" \"tick\" \"{}\"", n);
        assert!(line.ends_with(&expected), "line: {}", line);
    }
    assert_eq!(server.machine.monitor().observer_count(), 1);
}

#[test]
fn test_silent_monitor_hits_idle_timeout() {
    let server = setup_server_with(|builder| builder.monitor_idle_timeout_ms(200));
    let mut monitor = Client::connect(server.addr);
    let mut client = Client::connect(server.addr);

    monitor.call("MONITOR", &[]);
    client.call("SET", &["a", "1"]);
    assert!(monitor.next_line().ends_with("\"set\" \"a\" \"1\""));

    // Nothing is executed after that, so the session times out
    assert!(monitor.is_closed());
    wait_for("observer release", || server.machine.monitor().observer_count() == 0);

    // Ordinary connections are not subject to the monitor timeout
    assert_eq!(client.call("DBSIZE", &[]), Reply::Integer(1));
}

// =============================================================================
// Connection Limits
// =============================================================================

#[test]
fn test_max_connections() {
    let server = setup_server(1);
    let mut first = Client::connect(server.addr);
    assert_eq!(first.call("DBSIZE", &[]), Reply::Integer(0));

    let mut second = Client::connect(server.addr);
    match read_reply(&mut second.reader).unwrap() {
        Reply::Error(message) => assert_eq!(message, "ERR max number of clients reached"),
        other => panic!("expected error, got {:?}", other),
    }

    // The first connection is unaffected
    assert_eq!(first.call("SET", &["a", "1"]), Reply::Ok);
    assert_eq!(server.server.connection_count(), 1);

    // Closing it frees the slot
    drop(first);
    wait_for("connection release", || server.server.connection_count() == 0);
    let mut third = Client::connect(server.addr);
    assert_eq!(third.call("GET", &["a"]), bulk("1"));
}
