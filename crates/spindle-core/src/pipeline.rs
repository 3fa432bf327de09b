use spindle_shutdown::ConnectionTracker;
use spindle_types::DeviceEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{AggregatorHandle, DeviceAggregator, DeviceTable};
use crate::bus::EventBus;
use crate::error::{Result, SpindleError};
use crate::handler::{ConnectionHandler, DEFAULT_MAX_LINE_BYTES};
use crate::queue::report_queue;
use crate::server::{IngestServer, ServerHandle};

/// 管线参数
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bind_addr: String,
    pub max_line_bytes: usize,
    pub event_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9901".to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            event_capacity: 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// 接入管线：服务器 → 上报队列 → 聚合器
///
/// 队列在这里创建一次，显式交给服务器和聚合器。
/// 服务器使用根令牌的子令牌；聚合器使用独立令牌，只由 [`shutdown`](Self::shutdown)
/// 在服务器排空之后停止，在途连接已确认的上报因此都能进入设备表。
pub struct Pipeline {
    server: ServerHandle,
    aggregator: AggregatorHandle,
    events: EventBus,
    tracker: ConnectionTracker,
}

impl PipelineConfig {
    /// 检查参数
    ///
    /// # 错误
    /// * `Config` - 行上限或事件总线容量为 0
    pub fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(SpindleError::config("max_line_bytes must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(SpindleError::config("event_capacity must be greater than 0"));
        }
        Ok(())
    }
}

impl Pipeline {
    /// 绑定地址并启动两个长期任务
    ///
    /// # 错误
    /// * `Config` - 参数不合法
    /// * `Bind` - 监听地址不可用
    ///
    /// 出错时不会启动任何任务。
    pub async fn start(config: PipelineConfig, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let (sender, receiver) = report_queue();
        let tracker = ConnectionTracker::new(config.drain_timeout);

        let handler = ConnectionHandler::new(sender).with_max_line_bytes(config.max_line_bytes);
        let server = IngestServer::bind(&config.bind_addr, handler, tracker.clone()).await?;

        let aggregator =
            DeviceAggregator::new(receiver, events.clone()).spawn(CancellationToken::new());
        let server = server.start(cancel.child_token());

        info!(addr = %server.local_addr(), "Pipeline started");
        Ok(Self {
            server,
            aggregator,
            events,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DeviceTable> {
        self.aggregator.snapshot()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<DeviceTable>> {
        self.aggregator.subscribe_snapshots()
    }

    /// 与服务器共享的连接跟踪器
    pub fn connection_tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// 先停服务器（等待在途连接），再停聚合器，返回最终设备表
    pub async fn shutdown(self) -> Result<DeviceTable> {
        let drained = self.server.stop().await?;
        if !drained {
            warn!("Some connections were still in flight at shutdown");
        }
        let table = self.aggregator.stop().await?;
        info!(devices = table.len(), "Pipeline stopped");
        Ok(table)
    }
}
