use chrono::{DateTime, Local, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 到达时间戳
///
/// 本地时间，精确到秒，显示格式为 `YYYY-MM-DD HH:MM:SS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrivalTime(DateTime<Local>);

impl ArrivalTime {
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    /// 截断到整秒
    pub fn from_datetime(at: DateTime<Local>) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    pub fn as_datetime(&self) -> DateTime<Local> {
        self.0
    }
}

impl fmt::Display for ArrivalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DISPLAY_FORMAT))
    }
}

impl Serialize for ArrivalTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
