use spindle_types::DeviceEvent;
use tokio::sync::broadcast;

/// 设备事件总线
///
/// 聚合器发布，展示层订阅。订阅者落后超过容量时会收到 `Lagged`，
/// 可通过聚合器快照重新同步。
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// 发布事件，返回收到事件的订阅者数量；没有订阅者时返回 0
    pub fn publish(&self, event: DeviceEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
