use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;
use spindle_types::{DeviceEvent, DeviceIdentity, DeviceRecord, IdentityField, TimestampedReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::{MissingIdentityError, Result, SpindleError};
use crate::queue::ReportReceiver;

/// 设备表
///
/// 设备身份 -> 设备记录，按首次出现的顺序排列。
/// 只由聚合器修改，其他组件只能读取快照。记录以 `Arc` 共享，
/// 发布快照只复制指针，合并时只有被触及的记录写时复制。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct DeviceTable {
    devices: IndexMap<DeviceIdentity, Arc<DeviceRecord>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一条上报
    ///
    /// 新设备创建记录并返回 `Created` 事件；已知设备逐个参数覆盖，
    /// 返回只包含本次触及键的 `Updated` 事件。
    ///
    /// # 错误
    /// * `MissingIdentityError` - 上报缺少 `name` 或 `ID`，设备表保持不变
    pub fn apply(
        &mut self,
        item: &TimestampedReport,
    ) -> std::result::Result<DeviceEvent, MissingIdentityError> {
        let name = item.report.name().ok_or(IdentityField::Name)?;
        let id = item.report.id().ok_or(IdentityField::Id)?;
        let identity = DeviceIdentity::new(&name, &id);

        match self.devices.entry(identity) {
            Entry::Occupied(mut entry) => {
                let record = Arc::make_mut(entry.get_mut());
                let changed = record.merge(&item.report, item.received_at);
                Ok(DeviceEvent::updated(record, changed))
            }
            Entry::Vacant(entry) => {
                let record = DeviceRecord::from_report(
                    entry.key().clone(),
                    name,
                    id,
                    &item.report,
                    item.received_at,
                );
                let event = DeviceEvent::created(&record);
                entry.insert(Arc::new(record));
                Ok(event)
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&DeviceRecord> {
        self.devices.get(identity).map(Arc::as_ref)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.devices.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// 按首次出现顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values().map(Arc::as_ref)
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices.keys()
    }
}

/// 聚合统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AggregatorStats {
    applied: u64,
    dropped: u64,
}

/// 设备聚合器
///
/// 在独立任务中持续消费上报队列，把每条上报合并进设备表，
/// 并在事件总线上发布设备事件。单条坏数据只会被记录并丢弃，不会终止循环。
pub struct DeviceAggregator {
    receiver: ReportReceiver,
    events: EventBus,
    table: DeviceTable,
    snapshots: watch::Sender<Arc<DeviceTable>>,
    stats: AggregatorStats,
}

impl DeviceAggregator {
    pub fn new(receiver: ReportReceiver, events: EventBus) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(DeviceTable::new()));
        Self {
            receiver,
            events,
            table: DeviceTable::new(),
            snapshots,
            stats: AggregatorStats::default(),
        }
    }

    /// 订阅设备表快照，每合并一条上报更新一次
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<DeviceTable>> {
        self.snapshots.subscribe()
    }

    /// 在当前运行时上启动聚合任务
    pub fn spawn(self, cancel: CancellationToken) -> AggregatorHandle {
        let snapshots = self.subscribe_snapshots();
        let task = tokio::spawn(self.run(cancel.clone()));
        AggregatorHandle {
            task,
            snapshots,
            cancel,
        }
    }

    /// 消费循环
    ///
    /// 每轮出队前检查一次停止信号；收到信号后先合并队列中剩余的条目，
    /// 再退出并返回最终设备表。
    pub async fn run(mut self, cancel: CancellationToken) -> DeviceTable {
        info!("Device aggregator started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.receiver.pop(&cancel).await {
                Some(item) => {
                    self.process(item);
                }
                None if cancel.is_cancelled() => break,
                None => {
                    // 所有发送端都已关闭，保持运行直到显式停止
                    debug!("Report queue closed, waiting for stop signal");
                    cancel.cancelled().await;
                    break;
                }
            }
        }

        let mut leftover = 0usize;
        while let Some(item) = self.receiver.try_pop() {
            self.process(item);
            leftover += 1;
        }

        info!(
            devices = self.table.len(),
            applied = self.stats.applied,
            dropped = self.stats.dropped,
            leftover,
            "Device aggregator stopped"
        );
        self.table
    }

    fn process(&mut self, item: TimestampedReport) -> Option<DeviceEvent> {
        match self.table.apply(&item) {
            Ok(event) => {
                self.stats.applied += 1;
                info!(
                    device = %event.identity,
                    kind = ?event.kind,
                    changed = event.changed.len(),
                    "Device {}",
                    if event.is_created() { "created" } else { "updated" }
                );

                self.snapshots.send_replace(Arc::new(self.table.clone()));
                let delivered = self.events.publish(event.clone());
                debug!(device = %event.identity, subscribers = delivered, "Device event published");
                Some(event)
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(
                    peer = ?item.peer,
                    received_at = %item.received_at,
                    report = %item.report,
                    "Dropping malformed report: {}",
                    e
                );
                None
            }
        }
    }
}

/// 运行中的聚合任务
pub struct AggregatorHandle {
    task: JoinHandle<DeviceTable>,
    snapshots: watch::Receiver<Arc<DeviceTable>>,
    cancel: CancellationToken,
}

impl AggregatorHandle {
    /// 当前设备表快照
    pub fn snapshot(&self) -> Arc<DeviceTable> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<DeviceTable>> {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 发送停止信号并等待任务退出，返回最终设备表
    pub async fn stop(self) -> Result<DeviceTable> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| SpindleError::Task(format!("aggregator: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::report_queue;
    use serde_json::{json, Value};
    use spindle_types::{ArrivalTime, DeviceEventKind, Report, TIME_KEY};
    use tokio::time::{timeout, Duration};

    fn stamped(value: Value) -> TimestampedReport {
        let map = match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        };
        TimestampedReport::new(ArrivalTime::now(), Report::from_map(map))
    }

    #[test]
    fn test_apply_creates_device() {
        let mut table = DeviceTable::new();
        let event = table
            .apply(&stamped(json!({"ID": "ABCDEF", "name": "iSpindel000", "angle": 25.5})))
            .unwrap();

        assert_eq!(event.kind, DeviceEventKind::Created);
        let record = table.get("iSpindel000.ABCDEF").unwrap();
        assert_eq!(record.get("angle"), Some(&json!(25.5)));
        assert!(record.get(TIME_KEY).is_some());
    }

    #[test]
    fn test_apply_merges_disjoint_parameters() {
        let mut table = DeviceTable::new();
        table
            .apply(&stamped(json!({"ID": "A", "name": "N", "angle": 25.5})))
            .unwrap();

        let second = stamped(json!({"ID": "A", "name": "N", "temperature": 20.1}));
        let event = table.apply(&second).unwrap();

        assert_eq!(event.kind, DeviceEventKind::Updated);
        assert_eq!(event.changed, vec!["ID", "name", "temperature", "time"]);

        let record = table.get("N.A").unwrap();
        assert_eq!(record.get("angle"), Some(&json!(25.5)));
        assert_eq!(record.get("temperature"), Some(&json!(20.1)));
        assert_eq!(record.updated_at, second.received_at);
        assert_eq!(
            record.get(TIME_KEY),
            Some(&json!(second.received_at.to_string()))
        );
    }

    #[test]
    fn test_apply_later_value_wins() {
        let mut table = DeviceTable::new();
        table
            .apply(&stamped(json!({"ID": "A", "name": "N", "angle": 25.5})))
            .unwrap();
        table
            .apply(&stamped(json!({"ID": "A", "name": "N", "angle": "offline"})))
            .unwrap();

        assert_eq!(table.get("N.A").unwrap().get("angle"), Some(&json!("offline")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_apply_rejects_missing_identity() {
        let mut table = DeviceTable::new();

        let err = table.apply(&stamped(json!({"ID": "A", "angle": 1}))).unwrap_err();
        assert_eq!(err.field, IdentityField::Name);

        let err = table.apply(&stamped(json!({"name": "N"}))).unwrap_err();
        assert_eq!(err.field, IdentityField::Id);

        assert!(table.is_empty());
    }

    #[test]
    fn test_table_keeps_first_seen_order() {
        let mut table = DeviceTable::new();
        for name in ["c", "a", "b", "a"] {
            table
                .apply(&stamped(json!({"ID": "1", "name": name})))
                .unwrap();
        }
        let order: Vec<&str> = table.identities().map(|i| i.as_str()).collect();
        assert_eq!(order, vec!["c.1", "a.1", "b.1"]);
    }

    #[tokio::test]
    async fn test_aggregator_drains_queue_and_publishes() {
        let (tx, rx) = report_queue();
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();

        let handle = DeviceAggregator::new(rx, bus).spawn(CancellationToken::new());

        tx.push(stamped(json!({"ID": "A", "name": "N", "angle": 1.0}))).unwrap();
        tx.push(stamped(json!({"angle": 2.0}))).unwrap();
        tx.push(stamped(json!({"ID": "A", "name": "N", "angle": 3.0}))).unwrap();

        let first = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(first.kind, DeviceEventKind::Created);
        assert_eq!(second.kind, DeviceEventKind::Updated);
        assert_eq!(second.parameters.get("angle"), Some(&json!(3.0)));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.len(), 1);

        let table = handle.stop().await.unwrap();
        assert_eq!(table.get("N.A").unwrap().report_count, 2);
    }

    #[test]
    fn test_cloned_table_shares_untouched_records() {
        let mut table = DeviceTable::new();
        table.apply(&stamped(json!({"ID": "1", "name": "a", "angle": 1.0}))).unwrap();
        table.apply(&stamped(json!({"ID": "2", "name": "b", "angle": 2.0}))).unwrap();

        let snapshot = table.clone();
        table.apply(&stamped(json!({"ID": "1", "name": "a", "angle": 9.0}))).unwrap();

        assert!(Arc::ptr_eq(&snapshot.devices["b.2"], &table.devices["b.2"]));
        assert!(!Arc::ptr_eq(&snapshot.devices["a.1"], &table.devices["a.1"]));
        assert_eq!(snapshot.get("a.1").unwrap().get("angle"), Some(&json!(1.0)));
        assert_eq!(table.get("a.1").unwrap().get("angle"), Some(&json!(9.0)));
    }

    #[tokio::test]
    async fn test_stop_applies_reports_still_queued() {
        let (tx, rx) = report_queue();
        tx.push(stamped(json!({"ID": "A", "name": "N", "angle": 1.0}))).unwrap();
        tx.push(stamped(json!({"ID": "B", "name": "N", "angle": 2.0}))).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let table = DeviceAggregator::new(rx, EventBus::new(4)).run(cancel).await;

        assert_eq!(table.len(), 2);
        assert!(table.contains("N.A"));
        assert!(table.contains("N.B"));
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn test_aggregator_stops_on_cancel_with_idle_queue() {
        let (_tx, rx) = report_queue();
        let handle = DeviceAggregator::new(rx, EventBus::new(4)).spawn(CancellationToken::new());

        let table = timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("aggregator did not stop")
            .unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_aggregator_keeps_running_after_senders_dropped() {
        let (tx, rx) = report_queue();
        let cancel = CancellationToken::new();
        let handle = DeviceAggregator::new(rx, EventBus::new(4)).spawn(cancel.clone());

        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        let table = timeout(Duration::from_secs(1), handle.stop()).await.unwrap().unwrap();
        assert!(table.is_empty());
    }
}
