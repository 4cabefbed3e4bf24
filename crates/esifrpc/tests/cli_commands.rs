#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/esifcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("server socket never appeared");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return Some(status);
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn serve(dir: &Path, sock_path: &Path, count: usize) -> Child {
    let config = dir.join("esifrpc.json");
    std::fs::write(
        &config,
        r#"{"values": {"dptf:/power/limit": 15000, "dptf:/name": "demo-host"}}"#,
    )
    .expect("config should be writable");

    let child = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("--config")
        .arg(&config)
        .arg("serve")
        .arg(sock_path)
        .arg("--count")
        .arg(count.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

#[test]
fn get_config_reads_a_served_value() {
    let dir = unique_temp_dir("get");
    let sock_path = dir.join("host.sock");
    let mut host = serve(&dir, &sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(&sock_path)
        .arg("get-config")
        .arg("--path")
        .arg("/power/limit")
        .output()
        .expect("call should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"result\":\"OK\""));
    assert!(stdout.contains("\"value\":15000"));

    let status = wait_for_exit(&mut host, Duration::from_secs(5));
    assert!(status.is_some_and(|s| s.success()));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn get_config_grows_a_small_buffer() {
    let dir = unique_temp_dir("grow");
    let sock_path = dir.join("host.sock");
    let mut host = serve(&dir, &sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--format")
        .arg("raw")
        .arg("--log-level")
        .arg("error")
        .arg("call")
        .arg(&sock_path)
        .arg("get-config")
        .arg("--path")
        .arg("/name")
        .arg("--buf-len")
        .arg("2")
        .output()
        .expect("call should run");

    assert!(output.status.success());
    assert_eq!(output.stdout, b"demo-host\0");

    let _ = wait_for_exit(&mut host, Duration::from_secs(5));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_value_exits_with_failure() {
    let dir = unique_temp_dir("miss");
    let sock_path = dir.join("host.sock");
    let mut host = serve(&dir, &sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(&sock_path)
        .arg("get-config")
        .arg("--path")
        .arg("/nope")
        .output()
        .expect("call should run");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("NOT_FOUND"));

    let _ = wait_for_exit(&mut host, Duration::from_secs(5));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn info_reports_the_session() {
    let dir = unique_temp_dir("info");
    let sock_path = dir.join("host.sock");
    let mut host = serve(&dir, &sock_path, 1);

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("info")
        .arg(&sock_path)
        .arg("--app-name")
        .arg("probe")
        .output()
        .expect("info should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"session_handle\":"));
    assert!(stdout.contains("\"app_name\":\"probe\""));
    assert!(stdout.contains("\"connected\":true"));

    let _ = wait_for_exit(&mut host, Duration::from_secs(5));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn info_timeout_returns_124() {
    let missing = PathBuf::from(format!(
        "/tmp/esifcli-missing-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("info")
        .arg(&missing)
        .arg("--timeout")
        .arg("1s")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn bad_config_file_is_data_invalid() {
    let dir = unique_temp_dir("badcfg");
    let config = dir.join("bad.json");
    std::fs::write(&config, r#"{"wrokers": 2}"#).expect("config should be writable");

    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("--config")
        .arg(&config)
        .arg("version")
        .output()
        .expect("version should run");

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_esifrpc"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("esifrpc {}", env!("CARGO_PKG_VERSION")));
}
