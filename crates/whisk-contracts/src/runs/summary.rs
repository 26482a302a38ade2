use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::TaskEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunTally {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub images_succeeded: u64,
    pub images_failed: u64,
}

impl RunTally {
    pub fn record(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::ImageSucceeded { .. } => self.images_succeeded += 1,
            TaskEvent::ImageFailed { .. } => self.images_failed += 1,
            TaskEvent::TaskFailed { .. } => self.tasks_failed += 1,
            TaskEvent::TaskCompleted { .. } => self.tasks_completed += 1,
            _ => {}
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.tasks_failed == 0 && self.images_failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(flatten)]
    pub tally: RunTally,
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
