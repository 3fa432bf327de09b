use spindle_shutdown::ConnectionTracker;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SpindleError};
use crate::handler::ConnectionHandler;

// accept 失败（例如文件描述符耗尽）后的退避
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 上报接入服务器
///
/// 并发接受连接，每个连接交给独立任务中的连接处理器。
/// 不限制并发连接数。
pub struct IngestServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: ConnectionHandler,
    tracker: ConnectionTracker,
}

impl IngestServer {
    /// 绑定监听地址
    ///
    /// # 错误
    /// * `Bind` - 地址无法绑定，启动应当中止
    pub async fn bind(
        addr: &str,
        handler: ConnectionHandler,
        tracker: ConnectionTracker,
    ) -> Result<Self> {
        let bind_err = |source| SpindleError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(target: "ingest", "Ingestion server listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            handler,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 启动 accept 循环，立即返回
    pub fn start(self, cancel: CancellationToken) -> ServerHandle {
        let local_addr = self.local_addr;
        let tracker = self.tracker.clone();
        let task = tokio::spawn(self.accept_loop(cancel.clone()));

        ServerHandle {
            local_addr,
            task,
            cancel,
            tracker,
        }
    }

    async fn accept_loop(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => self.dispatch(socket, peer),
                    Err(e) => {
                        error!(target: "ingest", "Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        info!(
            target: "ingest",
            in_flight = self.tracker.active_count(),
            served = self.tracker.served_count(),
            "Ingestion server stopped accepting on {}",
            self.local_addr
        );
    }

    fn dispatch(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        let Some(guard) = self.tracker.acquire(peer) else {
            debug!(target: "ingest", %peer, "Dropping connection during shutdown");
            return;
        };

        debug!(target: "ingest", %peer, "Connection accepted");
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match handler.handle(socket, peer).await {
                Ok(outcome) => debug!(target: "ingest", %peer, ?outcome, "Connection finished"),
                Err(e) => warn!(target: "ingest", %peer, "Connection error: {}", e),
            }
        });
    }
}

/// 运行中的服务器
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
    cancel: CancellationToken,
    tracker: ConnectionTracker,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 正在处理的连接数
    pub fn active_connections(&self) -> usize {
        self.tracker.active_count()
    }

    /// 停止接受新连接并释放监听地址，然后等待正在处理的连接
    ///
    /// 等待时间受连接跟踪器的排空期限约束；返回是否全部完成。
    pub async fn stop(self) -> Result<bool> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| SpindleError::Task(format!("ingest server: {}", e)))?;
        Ok(self.tracker.drain().await)
    }
}
