pub mod device;
pub mod event;
pub mod report;
pub mod time;

pub use device::{DeviceIdentity, DeviceRecord};
pub use event::{DeviceEvent, DeviceEventKind};
pub use report::{IdentityField, Report, TimestampedReport, ID_KEY, NAME_KEY, TIME_KEY};
pub use time::ArrivalTime;

/// 参数值（数字、字符串或其他原样保留的 JSON 值）
pub type ParamValue = serde_json::Value;

/// 有序参数表，保持设备上报时的键顺序
pub type Parameters = serde_json::Map<String, ParamValue>;
