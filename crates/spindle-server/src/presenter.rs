use spindle_core::DeviceTable;
use spindle_shutdown::CancellationToken;
use spindle_types::{DeviceEvent, DeviceRecord, ParamValue, Parameters, TIME_KEY};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// 控制台展示
///
/// 消费设备事件并把每台设备的当前参数打印出来，
/// 相当于一个只追加的设备列表视图。核心流程不依赖它。
pub struct ConsolePresenter<W> {
    out: W,
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// 打印一个设备事件，本次变化的参数以 `*` 标出
    pub fn show_event(&mut self, event: &DeviceEvent) -> io::Result<()> {
        let tag = if event.is_created() { "new" } else { "update" };
        writeln!(self.out, "[{}] {}", tag, event.label())?;
        write_parameters(&mut self.out, &event.parameters, |key| {
            !event.is_created() && event.changed.iter().any(|c| c == key)
        })?;
        self.out.flush()
    }

    /// 打印整张设备表（事件丢失后重新同步）
    pub fn show_table(&mut self, table: &DeviceTable) -> io::Result<()> {
        writeln!(self.out, "=== {} device(s) ===", table.len())?;
        for record in table.iter() {
            self.show_record(record)?;
        }
        self.out.flush()
    }

    fn show_record(&mut self, record: &DeviceRecord) -> io::Result<()> {
        writeln!(self.out, "{}", record.label())?;
        write_parameters(&mut self.out, &record.parameters, |_| false)
    }
}

impl<W: Write + Send + 'static> ConsolePresenter<W> {
    /// 事件循环，直到令牌取消或事件总线关闭
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<DeviceEvent>,
        snapshots: watch::Receiver<Arc<DeviceTable>>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };

            let written = match received {
                Ok(event) => self.show_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Presenter lagged behind, re-rendering device table");
                    let table = snapshots.borrow().clone();
                    self.show_table(&table)
                }
                Err(RecvError::Closed) => break,
            };

            if let Err(e) = written {
                warn!("Failed to render device event: {}", e);
            }
        }
        debug!("Console presenter stopped");
    }
}

/// 参数逐行输出，`time` 单独显示为最后更新时间
fn write_parameters<W, F>(out: &mut W, parameters: &Parameters, highlight: F) -> io::Result<()>
where
    W: Write,
    F: Fn(&str) -> bool,
{
    for (key, value) in parameters.iter().filter(|(k, _)| k.as_str() != TIME_KEY) {
        let mark = if highlight(key) { '*' } else { ' ' };
        writeln!(out, "  {} {}: {}", mark, key, display_value(value))?;
    }
    if let Some(time) = parameters.get(TIME_KEY) {
        writeln!(out, "    Last update: {}", display_value(time))?;
    }
    Ok(())
}

fn display_value(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use spindle_types::{ArrivalTime, Report, TimestampedReport};

    fn stamped(value: Value) -> TimestampedReport {
        let map = match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        };
        TimestampedReport::new(ArrivalTime::now(), Report::from_map(map))
    }

    fn rendered(presenter: ConsolePresenter<Vec<u8>>) -> String {
        String::from_utf8(presenter.out).unwrap()
    }

    #[test]
    fn test_show_created_event() {
        let mut table = DeviceTable::new();
        let event = table
            .apply(&stamped(json!({"ID": "ABCDEF", "name": "iSpindel000", "angle": 25.5})))
            .unwrap();

        let mut presenter = ConsolePresenter::new(Vec::new());
        presenter.show_event(&event).unwrap();
        let text = rendered(presenter);

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("[new] iSpindel000 [ABCDEF]"));
        assert_eq!(lines.next(), Some("    ID: ABCDEF"));
        assert_eq!(lines.next(), Some("    name: iSpindel000"));
        assert_eq!(lines.next(), Some("    angle: 25.5"));
        assert!(lines.next().unwrap().starts_with("    Last update: "));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_show_updated_event_marks_changed_keys() {
        let mut table = DeviceTable::new();
        table
            .apply(&stamped(json!({"ID": "A", "name": "N", "angle": 25.5, "battery": 4.1})))
            .unwrap();
        let event = table
            .apply(&stamped(json!({"ID": "A", "name": "N", "angle": 26.0})))
            .unwrap();

        let mut presenter = ConsolePresenter::new(Vec::new());
        presenter.show_event(&event).unwrap();
        let text = rendered(presenter);

        assert!(text.starts_with("[update] N [A]\n"));
        assert!(text.contains("  * angle: 26.0\n"));
        assert!(text.contains("    battery: 4.1\n"));
    }

    #[test]
    fn test_show_table_lists_devices_in_order() {
        let mut table = DeviceTable::new();
        for name in ["b", "a"] {
            table
                .apply(&stamped(json!({"ID": "1", "name": name})))
                .unwrap();
        }

        let mut presenter = ConsolePresenter::new(Vec::new());
        presenter.show_table(&table).unwrap();
        let text = rendered(presenter);

        assert!(text.starts_with("=== 2 device(s) ===\n"));
        let b = text.find("b [1]").unwrap();
        let a = text.find("a [1]").unwrap();
        assert!(b < a);
    }
}
