use crate::connection::ConnectionTracker;
use crate::signal::{ShutdownSignal, SignalHandler};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 停机结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// 所有在途连接都已结束
    Complete,
    /// 排空超时，仍有连接在处理
    TimedOut,
}

/// 一次停机的摘要
#[derive(Debug, Clone, Copy)]
pub struct ShutdownReport {
    pub signal: ShutdownSignal,
    pub phase: ShutdownPhase,
    /// 超时时仍未结束的连接数
    pub in_flight: usize,
    pub elapsed: Duration,
}

/// 停机协调器
///
/// 等到第一个停机信号后取消根令牌，持有子令牌的任务（例如接入循环）据此退出；
/// 然后在 `drain_timeout` 内等待在途连接结束。
pub struct ShutdownCoordinator {
    signals: SignalHandler,
    tracker: Option<ConnectionTracker>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn builder() -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder::default()
    }

    /// 根取消令牌
    pub fn token(&self) -> CancellationToken {
        self.signals.token()
    }

    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signals
    }

    /// 等待系统信号或手动触发，然后执行停机
    pub async fn run(self) -> ShutdownReport {
        info!("Waiting for shutdown signal");
        let signal = self.signals.wait().await;
        self.finish(signal).await
    }

    /// 只等待手动触发（嵌入和测试场景）
    pub async fn run_manual(self) -> ShutdownReport {
        let signal = self.signals.wait_for_signal().await;
        self.finish(signal).await
    }

    async fn finish(&self, signal: ShutdownSignal) -> ShutdownReport {
        info!(?signal, "Shutting down");
        let start = Instant::now();
        self.signals.token().cancel();

        let (phase, in_flight) = match &self.tracker {
            Some(tracker) => {
                let drained = tokio::time::timeout(self.drain_timeout, tracker.drain())
                    .await
                    .unwrap_or(false);
                if drained {
                    (ShutdownPhase::Complete, 0)
                } else {
                    let in_flight = tracker.active_count();
                    warn!(in_flight, "Connections still open after {:?}", self.drain_timeout);
                    (ShutdownPhase::TimedOut, in_flight)
                }
            }
            None => (ShutdownPhase::Complete, 0),
        };

        let report = ShutdownReport {
            signal,
            phase,
            in_flight,
            elapsed: start.elapsed(),
        };
        info!(phase = ?report.phase, elapsed = ?report.elapsed, "Shutdown sequence finished");
        report
    }
}

/// 停机协调器构建器
pub struct ShutdownCoordinatorBuilder {
    signals: Option<SignalHandler>,
    tracker: Option<ConnectionTracker>,
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinatorBuilder {
    fn default() -> Self {
        Self {
            signals: None,
            tracker: None,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ShutdownCoordinatorBuilder {
    /// 使用已有的信号处理器（以便提前拿到根令牌）
    pub fn with_signal_handler(mut self, handler: SignalHandler) -> Self {
        self.signals = Some(handler);
        self
    }

    pub fn with_connection_tracker(mut self, tracker: ConnectionTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        ShutdownCoordinator {
            signals: self.signals.unwrap_or_default(),
            tracker: self.tracker,
            drain_timeout: self.drain_timeout,
        }
    }
}
