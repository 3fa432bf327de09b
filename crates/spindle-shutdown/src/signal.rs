use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 停机原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM（服务管理器停止进程）
    Term,
    /// SIGINT / Ctrl+C
    Interrupt,
    /// 代码中调用 `trigger_shutdown`，或根令牌被直接取消
    Manual,
}

/// 停机信号源
///
/// 持有整个进程的根取消令牌。无论停机由系统信号还是手动触发，
/// 都会取消该令牌并向订阅者广播一次原因。
pub struct SignalHandler {
    notifier: broadcast::Sender<ShutdownSignal>,
    root: CancellationToken,
}

impl SignalHandler {
    /// 创建信号源，同时返回一个订阅端
    pub fn new() -> (Self, broadcast::Receiver<ShutdownSignal>) {
        let (notifier, first) = broadcast::channel(4);
        let handler = Self {
            notifier,
            root: CancellationToken::new(),
        };
        (handler, first)
    }

    /// 根取消令牌
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// 等待手动触发
    ///
    /// 令牌已被取消时立即返回 `Manual`。
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let mut notified = self.notifier.subscribe();
        tokio::select! {
            biased;
            _ = self.root.cancelled() => ShutdownSignal::Manual,
            reason = notified.recv() => reason.unwrap_or(ShutdownSignal::Manual),
        }
    }

    /// 等待系统信号或手动触发，以先到者为准
    pub async fn wait(&self) -> ShutdownSignal {
        tokio::select! {
            reason = self.wait_for_system_signal() => reason,
            reason = self.wait_for_signal() => reason,
        }
    }

    /// 等待 SIGTERM 或 SIGINT
    ///
    /// 无法安装信号处理时只记录警告并永远挂起，此时只能手动停机。
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        use tokio::signal::unix::{signal, SignalKind};

        let installed = signal(SignalKind::terminate())
            .and_then(|term| signal(SignalKind::interrupt()).map(|int| (term, int)));
        let (mut term, mut int) = match installed {
            Ok(streams) => streams,
            Err(e) => {
                warn!("Cannot install signal handlers, manual shutdown only: {}", e);
                return std::future::pending().await;
            }
        };

        let reason = tokio::select! {
            _ = term.recv() => ShutdownSignal::Term,
            _ = int.recv() => ShutdownSignal::Interrupt,
        };
        self.fire(reason);
        reason
    }

    /// 等待 Ctrl+C
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> ShutdownSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C, manual shutdown only: {}", e);
            return std::future::pending().await;
        }
        self.fire(ShutdownSignal::Interrupt);
        ShutdownSignal::Interrupt
    }

    /// 手动停机
    pub fn trigger_shutdown(&self) {
        self.fire(ShutdownSignal::Manual);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.notifier.subscribe()
    }

    fn fire(&self, reason: ShutdownSignal) {
        info!(?reason, "Shutdown requested");
        // 没有订阅者时发送失败，令牌仍然会被取消
        let _ = self.notifier.send(reason);
        self.root.cancel();
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        let (handler, _) = Self::new();
        handler
    }
}
