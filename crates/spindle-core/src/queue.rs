use spindle_types::TimestampedReport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpindleError};

/// 创建上报队列
///
/// 多生产者、单消费者、无界 FIFO。进程启动时创建一次，
/// 发送端交给服务器，接收端交给聚合器。
pub fn report_queue() -> (ReportSender, ReportReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        ReportSender {
            tx,
            pending: pending.clone(),
        },
        ReportReceiver { rx, pending },
    )
}

/// 队列发送端，可克隆给任意数量的连接处理器
#[derive(Clone, Debug)]
pub struct ReportSender {
    tx: mpsc::UnboundedSender<TimestampedReport>,
    pending: Arc<AtomicUsize>,
}

impl ReportSender {
    /// 入队，不会阻塞
    ///
    /// # 错误
    /// * `QueueClosed` - 接收端已被丢弃
    pub fn push(&self, item: TimestampedReport) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(item).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            SpindleError::QueueClosed
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 尚未被消费的条目数
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 队列接收端，只归聚合器所有
#[derive(Debug)]
pub struct ReportReceiver {
    rx: mpsc::UnboundedReceiver<TimestampedReport>,
    pending: Arc<AtomicUsize>,
}

impl ReportReceiver {
    /// 出队
    ///
    /// 队列为空时挂起，直到有新条目或收到停止信号。
    /// 停止信号优先于已排队的条目；停止或所有发送端都已丢弃时返回 `None`。
    pub async fn pop(&mut self, cancel: &CancellationToken) -> Option<TimestampedReport> {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.rx.recv() => item,
        };
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// 非阻塞出队
    pub fn try_pop(&mut self) -> Option<TimestampedReport> {
        let item = self.rx.try_recv().ok();
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
