use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;

use crate::{ArrivalTime, DeviceIdentity, ParamValue, Parameters};

/// 设备名称字段
pub const NAME_KEY: &str = "name";
/// 设备实例 ID 字段
pub const ID_KEY: &str = "ID";
/// 聚合器写入的最后更新时间字段
pub const TIME_KEY: &str = "time";

/// 身份字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Name,
    Id,
}

impl IdentityField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => NAME_KEY,
            Self::Id => ID_KEY,
        }
    }
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 设备上报数据
///
/// 一次解码得到的 JSON 对象。除 `name` / `ID` 外的键由设备自行定义，
/// 按到达顺序原样保留。构造后不可修改。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Report {
    fields: Parameters,
}

impl Report {
    pub fn from_map(fields: Parameters) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Parameters {
        &self.fields
    }

    /// 设备名称（字符串或数字）
    pub fn name(&self) -> Option<String> {
        self.fields.get(NAME_KEY).and_then(identity_text)
    }

    /// 设备实例 ID（字符串或数字）
    pub fn id(&self) -> Option<String> {
        self.fields.get(ID_KEY).and_then(identity_text)
    }

    /// 计算设备身份
    ///
    /// # 错误
    /// 返回第一个缺失（或类型不可用）的身份字段
    pub fn identity(&self) -> Result<DeviceIdentity, IdentityField> {
        let name = self.name().ok_or(IdentityField::Name)?;
        let id = self.id().ok_or(IdentityField::Id)?;
        Ok(DeviceIdentity::new(&name, &id))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.fields) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{..}"),
        }
    }
}

// 真实固件会把芯片 ID 作为数字上报
fn identity_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 带到达时间的上报数据，由连接处理器产生，经队列交给聚合器
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampedReport {
    pub received_at: ArrivalTime,
    pub report: Report,
    /// 发送方地址，仅用于日志
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<SocketAddr>,
}

impl TimestampedReport {
    pub fn new(received_at: ArrivalTime, report: Report) -> Self {
        Self {
            received_at,
            report,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(value: Value) -> Report {
        match value {
            Value::Object(map) => Report::from_map(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_identity_from_string_fields() {
        let r = report(json!({"ID": "ABCDEF", "name": "iSpindel000", "angle": 25.5}));
        assert_eq!(r.identity().unwrap().as_str(), "iSpindel000.ABCDEF");
    }

    #[test]
    fn test_identity_from_numeric_id() {
        let r = report(json!({"name": "iSpindel001", "ID": 4_355_112}));
        assert_eq!(r.identity().unwrap().as_str(), "iSpindel001.4355112");
    }

    #[test]
    fn test_missing_identity_fields() {
        let no_name = report(json!({"ID": "ABCDEF"}));
        assert_eq!(no_name.identity(), Err(IdentityField::Name));

        let no_id = report(json!({"name": "iSpindel000", "angle": 1}));
        assert_eq!(no_id.identity(), Err(IdentityField::Id));

        let empty_id = report(json!({"name": "iSpindel000", "ID": ""}));
        assert_eq!(empty_id.identity(), Err(IdentityField::Id));

        let bool_name = report(json!({"name": true, "ID": "X"}));
        assert_eq!(bool_name.identity(), Err(IdentityField::Name));
    }

    #[test]
    fn test_report_keeps_key_order() {
        let r = report(json!({"ID": "A", "name": "B", "zeta": 1, "alpha": 2}));
        let keys: Vec<&str> = r.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ID", "name", "zeta", "alpha"]);
    }

    #[test]
    fn test_report_display_is_json() {
        let r = report(json!({"ID": "A", "name": "B"}));
        assert_eq!(r.to_string(), r#"{"ID":"A","name":"B"}"#);
    }
}
