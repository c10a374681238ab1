use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct DebugLogger {
    inner: Arc<Mutex<BufWriter<File>>>,
}

#[derive(Debug, Default)]
pub struct DebugCounters {
    counts: BTreeMap<String, u64>,
}

impl DebugCounters {
    pub fn increment(&mut self, key: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        let entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn log_event(&self, kind: &str, fields: Value) {
        let mut line = Map::new();
        line.insert("type".to_string(), Value::String(kind.to_string()));
        match fields {
            Value::Object(map) => line.extend(map),
            Value::Null => {}
            other => {
                line.insert("data".to_string(), other);
            }
        }
        self.write_line(&Value::Object(line));
    }

    pub fn emit_summary(&self, context: &str, counters: DebugCounters) {
        self.write_line(&json!({
            "type": "debug.summary",
            "context": context,
            "counts": counters.counts,
        }));
    }

    pub fn flush(&self) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writer.flush();
        }
    }

    fn write_line(&self, line: &Value) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}
