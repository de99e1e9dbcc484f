#![cfg(feature = "cli")]

use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// A loopback address nobody is listening on right now.
fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    listener
        .local_addr()
        .expect("listener should have an address")
        .to_string()
}

struct ServeProcess(Child);

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_serve(addr: &str) -> ServeProcess {
    let child = Command::new(env!("CARGO_BIN_EXE_corrwire"))
        .args(["--log-level", "error", "--format", "json", "serve", addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");
    let server = ServeProcess(child);

    let start = Instant::now();
    while TcpStream::connect(addr).is_err() {
        if start.elapsed() >= Duration::from_secs(5) {
            panic!("server did not start listening on {addr}");
        }
        thread::sleep(Duration::from_millis(25));
    }
    server
}

fn corrwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_corrwire"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("corrwire should run")
}

#[test]
fn send_prints_echoed_response() {
    let addr = free_addr();
    let _server = spawn_serve(&addr);

    let output = corrwire(&["--format", "json", "send", &addr, "--data", "Hello"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("send should emit json");
    assert_eq!(report["kind"], "send");
    assert_eq!(report["sent_size"], 5);
    assert_eq!(report["reply_expected"], true);
    let response = report["response"].as_str().expect("response text");
    assert!(response.starts_with("message from 127.0.0.1:"));
    assert!(response.ends_with(&format!("to {addr}: Hello")));
}

#[test]
fn send_no_reply_succeeds_without_response() {
    let addr = free_addr();
    let _server = spawn_serve(&addr);

    let output = corrwire(&[
        "--format",
        "json",
        "send",
        &addr,
        "--data",
        "fire",
        "--no-reply",
    ]);

    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(report["reply_expected"], false);
    assert!(report.get("response").is_none());
}

#[test]
fn send_raw_prints_only_payload() {
    let addr = free_addr();
    let _server = spawn_serve(&addr);

    let output = corrwire(&["--format", "raw", "send", &addr, "--json", "{\"ok\":true}"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.ends_with(": {\"ok\":true}"), "{stdout}");
}

#[test]
fn send_without_server_times_out_with_124() {
    let addr = free_addr();
    let output = corrwire(&["send", &addr, "--data", "x", "--timeout", "300ms"]);
    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no connection"));
}

#[test]
fn send_with_zero_connections_is_usage_error() {
    let output = corrwire(&["send", "127.0.0.1:9", "--data", "x", "--connections", "0"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_with_unknown_network_is_usage_error() {
    let output = corrwire(&["send", "127.0.0.1:9", "--network", "udp", "--data", "x"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn ping_gives_up_with_124() {
    let addr = free_addr();
    let output = corrwire(&[
        "--format",
        "json",
        "ping",
        &addr,
        "--max-retry",
        "2",
        "--interval",
        "10ms",
        "--timeout",
        "100ms",
    ]);

    assert_eq!(output.status.code(), Some(124), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let attempts: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each attempt is json"))
        .collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a["ok"] == false));
    assert_eq!(attempts[1]["failures"], 2);
}

#[test]
fn version_reports_package_version() {
    let output = corrwire(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("corrwire {}", env!("CARGO_PKG_VERSION"))
    );

    let extended = corrwire(&["version", "--extended"]);
    assert!(extended.status.success());
    assert!(String::from_utf8_lossy(&extended.stdout).contains("magic=0x00123456"));
}
