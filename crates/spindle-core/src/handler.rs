use spindle_types::{ArrivalTime, TimestampedReport};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::{self, ACK, LINE_DELIMITER, NAK};
use crate::queue::ReportSender;

/// 单行默认上限
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// 一次交换的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// 解析成功，已回复 ACK 并入队
    Accepted,
    /// 解析失败，已回复 NAK
    Rejected,
    /// 对端未发送任何数据就关闭了连接
    Empty,
}

/// 连接处理器
///
/// 每个连接只处理一次请求：读一行、回一个字节，然后结束。
#[derive(Clone, Debug)]
pub struct ConnectionHandler {
    sender: ReportSender,
    max_line_bytes: usize,
}

impl ConnectionHandler {
    pub fn new(sender: ReportSender) -> Self {
        Self {
            sender,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// 处理一个连接
    ///
    /// 只有解析成功后才写 ACK。读写出错不重试，直接返回错误，
    /// 连接随 `stream` 一起被丢弃关闭。
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<HandleOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        let limit = self.max_line_bytes as u64 + 1;
        let read = (&mut reader)
            .take(limit)
            .read_until(LINE_DELIMITER, &mut buf)
            .await?;

        if read == 0 {
            debug!(%peer, "Connection closed without data");
            return Ok(HandleOutcome::Empty);
        }

        let terminated = buf.last() == Some(&LINE_DELIMITER);
        let line = protocol::strip_delimiter(&buf);
        debug!(%peer, raw = %String::from_utf8_lossy(line), "Received {} bytes", read);

        let decoded = if !terminated && buf.len() > self.max_line_bytes {
            Err(ProtocolError::LineTooLong {
                limit: self.max_line_bytes,
            })
        } else {
            protocol::decode_line(line)
        };

        let mut stream = reader.into_inner();
        let outcome = match decoded {
            Ok(report) => {
                let received_at = ArrivalTime::now();
                info!(%peer, %received_at, %report, "Report decoded");

                stream.write_all(&[ACK]).await?;
                stream.flush().await?;

                self.sender
                    .push(TimestampedReport::new(received_at, report).with_peer(peer))?;
                HandleOutcome::Accepted
            }
            Err(e) => {
                warn!(%peer, "Decode error: {}", e);
                stream.write_all(&[NAK]).await?;
                stream.flush().await?;
                HandleOutcome::Rejected
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!(%peer, "Shutdown after reply failed: {}", e);
        }
        Ok(outcome)
    }
}
