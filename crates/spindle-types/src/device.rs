use serde::Serialize;
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

use crate::{ArrivalTime, ParamValue, Parameters, Report, TIME_KEY};

/// 设备身份：`{name}.{ID}`
///
/// 直接拼接、不做转义：名称或 ID 自身含 `.` 时，不同设备可能得到相同身份
/// （例如 `("a.b", "c")` 与 `("a", "b.c")` 都是 `a.b.c`），它们会合并为同一条记录。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(name: &str, id: &str) -> Self {
        Self(format!("{}.{}", name, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 设备记录
///
/// 保存某台设备出现过的每个参数的最新值（含 `name`、`ID` 和合成的 `time`）。
/// 首次上报时创建，之后按参数原地更新，运行期间不会删除。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub identity: DeviceIdentity,
    pub name: String,
    pub id: String,
    pub parameters: Parameters,
    pub updated_at: ArrivalTime,
    pub report_count: u64,
}

impl DeviceRecord {
    /// 根据首条上报创建记录
    pub fn from_report(
        identity: DeviceIdentity,
        name: String,
        id: String,
        report: &Report,
        at: ArrivalTime,
    ) -> Self {
        let mut parameters = report.as_map().clone();
        parameters.insert(TIME_KEY.to_string(), Value::String(at.to_string()));

        Self {
            identity,
            name,
            id,
            parameters,
            updated_at: at,
            report_count: 1,
        }
    }

    /// 合并一条后续上报
    ///
    /// 上报中的每个键覆盖（或新增）到记录中，值类型可以改变；
    /// 未出现在上报中的旧参数保持不变。返回本次触及的键（含 `time`）。
    pub fn merge(&mut self, report: &Report, at: ArrivalTime) -> Vec<String> {
        let mut changed = Vec::with_capacity(report.len() + 1);
        for (key, value) in report.iter() {
            if key == TIME_KEY {
                continue;
            }
            self.parameters.insert(key.clone(), value.clone());
            changed.push(key.clone());
        }

        self.parameters
            .insert(TIME_KEY.to_string(), Value::String(at.to_string()));
        changed.push(TIME_KEY.to_string());

        self.updated_at = at;
        self.report_count += 1;
        changed
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.parameters.get(key)
    }

    /// 展示用标签，例如 `iSpindel000 [ABCDEF]`
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name, self.id)
    }
}
