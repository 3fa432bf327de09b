use serde::Serialize;

use crate::{ArrivalTime, DeviceIdentity, DeviceRecord, Parameters};

/// 设备事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEventKind {
    /// 首次出现
    Created,
    /// 已知设备再次上报
    Updated,
}

/// 设备状态更新事件
///
/// 聚合器每合并一条上报就发出一个事件，展示层据此新建或刷新设备视图。
/// 事件携带设备当前的完整参数集，是不可变的快照。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub identity: DeviceIdentity,
    pub name: String,
    pub id: String,
    pub parameters: Parameters,
    /// 本次上报触及的键
    pub changed: Vec<String>,
    pub updated_at: ArrivalTime,
}

impl DeviceEvent {
    pub fn created(record: &DeviceRecord) -> Self {
        let changed = record.parameters.keys().cloned().collect();
        Self::from_record(DeviceEventKind::Created, record, changed)
    }

    pub fn updated(record: &DeviceRecord, changed: Vec<String>) -> Self {
        Self::from_record(DeviceEventKind::Updated, record, changed)
    }

    fn from_record(kind: DeviceEventKind, record: &DeviceRecord, changed: Vec<String>) -> Self {
        Self {
            kind,
            identity: record.identity.clone(),
            name: record.name.clone(),
            id: record.id.clone(),
            parameters: record.parameters.clone(),
            changed,
            updated_at: record.updated_at,
        }
    }

    pub fn is_created(&self) -> bool {
        self.kind == DeviceEventKind::Created
    }

    /// 展示用标签，与 `DeviceRecord::label` 一致
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name, self.id)
    }
}
