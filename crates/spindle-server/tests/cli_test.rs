use spindle_core::{Pipeline, PipelineConfig};
use spindle_shutdown::CancellationToken;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use tokio::process::Command;
use tokio::time::timeout;

async fn start_pipeline() -> Pipeline {
    let config = PipelineConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    };
    Pipeline::start(config, &CancellationToken::new())
        .await
        .unwrap()
}

async fn probe(port: u16, extra: &[&str]) -> std::process::Output {
    let run = Command::new(env!("CARGO_BIN_EXE_spindle-probe"))
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .args(extra)
        .output();
    timeout(Duration::from_secs(10), run)
        .await
        .expect("probe timed out")
        .unwrap()
}

#[tokio::test]
async fn test_probe_sample_report_is_acked() {
    let pipeline = start_pipeline().await;
    let mut snapshots = pipeline.subscribe_snapshots();

    let output = probe(pipeline.local_addr().port(), &[]).await;
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ACK");

    timeout(
        Duration::from_secs(2),
        snapshots.wait_for(|t| t.contains("iSpindel000.ABCDEF")),
    )
    .await
    .unwrap()
    .unwrap();

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_probe_raw_garbage_is_nacked() {
    let pipeline = start_pipeline().await;

    let output = probe(pipeline.local_addr().port(), &["--raw", "request type 02"]).await;
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "NAK");

    let table = pipeline.shutdown().await.unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_probe_without_server_fails() {
    // 先占用再释放一个端口，确保没有服务在监听
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let output = probe(port, &[]).await;
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_print_config_applies_file_env_and_flags() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("spindle.toml");
    fs::write(&path, "[server]\nport = 9999\n\n[logging]\nlevel = \"debug\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_spindle-server"))
        .arg("--config")
        .arg(&path)
        .arg("--print-config")
        .env("SPINDLE__AGGREGATOR__EVENT_CAPACITY", "64")
        .output()
        .await
        .unwrap();
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("port = 9999"));
    assert!(text.contains("level = \"debug\""));
    assert!(text.contains("event_capacity = 64"));

    let output = Command::new(env!("CARGO_BIN_EXE_spindle-server"))
        .args(["--bind", "127.0.0.1:9100", "--print-config"])
        .output()
        .await
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("host = \"127.0.0.1\""));
    assert!(text.contains("port = 9100"));
}

#[tokio::test]
async fn test_invalid_config_aborts_startup() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("spindle.toml");
    fs::write(&path, "[server]\nmax_line_bytes = 0\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_spindle-server"))
        .arg("--config")
        .arg(&path)
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_line_bytes"));
}
