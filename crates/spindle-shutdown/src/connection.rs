use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Default)]
struct TrackerState {
    active: AtomicUsize,
    served: AtomicU64,
    closing: AtomicBool,
    idle: Notify,
}

/// 在途连接跟踪器
///
/// 服务器每接受一个连接领取一个 [`ConnectionGuard`]，处理结束时随 guard 释放。
/// 停机时 [`drain`](Self::drain) 拒绝新连接并等待计数归零，最多等待 `drain_timeout`。
#[derive(Clone)]
pub struct ConnectionTracker {
    state: Arc<TrackerState>,
    drain_timeout: Duration,
}

impl ConnectionTracker {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            state: Arc::new(TrackerState::default()),
            drain_timeout,
        }
    }

    /// 为新连接登记；已开始停机时返回 `None`，调用方应直接关闭该连接
    pub fn acquire(&self, peer: SocketAddr) -> Option<ConnectionGuard> {
        if self.state.closing.load(Ordering::SeqCst) {
            debug!(%peer, "Refusing connection while draining");
            return None;
        }

        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.served.fetch_add(1, Ordering::Relaxed);
        debug!(%peer, active, "Connection tracked");

        Some(ConnectionGuard {
            state: Arc::clone(&self.state),
            peer,
            since: Instant::now(),
        })
    }

    /// 停止登记新连接
    pub fn close(&self) {
        if !self.state.closing.swap(true, Ordering::SeqCst) {
            info!(active = self.active_count(), "Connection tracker closed");
        }
    }

    /// 关闭并等待所有在途连接结束
    ///
    /// 在期限内全部结束返回 `true`。可以重复调用。
    pub async fn drain(&self) -> bool {
        self.close();

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.drain_timeout;

        loop {
            let idle = self.state.idle.notified();
            tokio::pin!(idle);
            // 先登记唤醒再读计数
            idle.as_mut().enable();

            let active = self.active_count();
            if active == 0 {
                debug!(elapsed = ?start.elapsed(), "No connections in flight");
                return true;
            }

            debug!(active, "Waiting for in-flight connections");
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                warn!(
                    active = self.active_count(),
                    "Gave up waiting for connections after {:?}",
                    self.drain_timeout
                );
                return false;
            }
        }
    }

    /// 正在处理的连接数
    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// 启动以来登记过的连接总数
    pub fn served_count(&self) -> u64 {
        self.state.served.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closing.load(Ordering::SeqCst)
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

/// 一个在途连接，drop 时注销
pub struct ConnectionGuard {
    state: Arc<TrackerState>,
    peer: SocketAddr,
    since: Instant,
}

impl ConnectionGuard {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.state.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            peer = %self.peer,
            held = ?self.since.elapsed(),
            remaining,
            "Connection released"
        );
        if remaining == 0 {
            self.state.idle.notify_waiters();
        }
    }
}
