use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value;
use spindle_core::{ACK, NAK};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SAMPLE_REPORT: &str = r#"{"ID":"ABCDEF","name":"iSpindel000","angle":25.5}"#;

/// 测试客户端：发送一行上报并打印服务器的应答
#[derive(Parser, Debug)]
#[command(author, version, about = "Send one report line to a spindle server", long_about = None)]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long, default_value_t = 9999)]
    port: u16,

    /// JSON payload; defaults to a sample iSpindel report
    payload: Option<String>,

    /// Send the payload as-is without checking that it is a JSON object
    #[arg(long)]
    raw: bool,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let line = payload_line(args.payload.as_deref(), args.raw)?;

    let addr = format!("{}:{}", args.host, args.port);
    let reply = tokio::time::timeout(Duration::from_secs(args.timeout), exchange(&addr, &line))
        .await
        .map_err(|_| anyhow!("No reply from {} within {}s", addr, args.timeout))??;

    match reply {
        Some(ACK) => {
            println!("ACK");
            Ok(ExitCode::SUCCESS)
        }
        Some(NAK) => {
            println!("NAK");
            Ok(ExitCode::from(2))
        }
        Some(other) => Err(anyhow!("Unexpected reply byte 0x{:02x}", other)),
        None => Err(anyhow!("Connection closed without a reply")),
    }
}

/// 准备要发送的一行
///
/// 非 raw 模式下先校验为 JSON 对象并压缩成单行。
fn payload_line(payload: Option<&str>, raw: bool) -> Result<String> {
    let payload = payload.unwrap_or(SAMPLE_REPORT);
    if raw {
        return Ok(payload.to_string());
    }

    let value: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    if !value.is_object() {
        return Err(anyhow!("Payload must be a JSON object, use --raw to send it anyway"));
    }
    Ok(value.to_string())
}

async fn exchange(addr: &str, line: &str) -> Result<Option<u8>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    debug!(%addr, %line, "Sending report");

    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;

    let mut reply = [0u8; 1];
    match stream.read(&mut reply).await? {
        0 => Ok(None),
        _ => Ok(Some(reply[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload_is_sample() {
        assert_eq!(payload_line(None, false).unwrap(), SAMPLE_REPORT);
    }

    #[test]
    fn test_payload_is_compacted() {
        let line = payload_line(Some("{\n  \"ID\": \"1\",\n  \"name\": \"x\"\n}"), false).unwrap();
        assert_eq!(line, r#"{"ID":"1","name":"x"}"#);
    }

    #[test]
    fn test_non_object_needs_raw() {
        assert!(payload_line(Some("request type 02"), false).is_err());
        assert!(payload_line(Some("[1,2]"), false).is_err());
        assert_eq!(
            payload_line(Some("request type 02"), true).unwrap(),
            "request type 02"
        );
    }
}
