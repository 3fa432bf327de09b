//! 单行 JSON 协议
//!
//! 设备发送一行以 `\n` 结尾的 JSON 对象，服务端回复一个字节：
//! 解析成功回 ACK (`0x06`)，失败回 NAK (`0x15`)。

use serde_json::Value;
use spindle_types::Report;

use crate::error::ProtocolError;

/// 确认字节
pub const ACK: u8 = 0x06;
/// 否定确认字节
pub const NAK: u8 = 0x15;
/// 行结束符
pub const LINE_DELIMITER: u8 = b'\n';

/// 解码一行（已去掉行结束符）
///
/// 只检查语法：必须是 UTF-8 编码的 JSON 对象。缺少 `name` / `ID`
/// 不在这里报错，由聚合器处理。
pub fn decode_line(line: &[u8]) -> Result<Report, ProtocolError> {
    let text = std::str::from_utf8(line)?.trim();

    match serde_json::from_str::<Value>(text)? {
        Value::Object(fields) => Ok(Report::from_map(fields)),
        other => Err(ProtocolError::NotAnObject(json_kind(&other))),
    }
}

/// 去掉行尾的 `\n`（以及可能的 `\r`）
pub fn strip_delimiter(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(&[LINE_DELIMITER]) {
        line = rest;
    }
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
