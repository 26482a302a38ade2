use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::references::ResolvedReference;
use crate::runs::summary::now_utc_iso;

/// Notifications the orchestrator streams to the operator surface. Each one
/// addresses a row and, where it applies, an image index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    RunStarted {
        run_id: String,
        queued: usize,
    },
    ReferencesResolved {
        row: usize,
        references: Vec<ResolvedReference>,
        dropped_scenes: Vec<String>,
    },
    ImageStarted {
        row: usize,
        image_index: usize,
        total: usize,
    },
    ImageSucceeded {
        row: usize,
        image_index: usize,
        path: PathBuf,
    },
    ImageFailed {
        row: usize,
        image_index: usize,
        reason: String,
        detail: String,
    },
    TaskFailed {
        row: usize,
        reason: String,
        detail: String,
    },
    TaskCompleted {
        row: usize,
        succeeded: usize,
        failed: usize,
    },
    AllDone,
}

impl TaskEvent {
    pub fn row(&self) -> Option<usize> {
        match self {
            Self::ReferencesResolved { row, .. }
            | Self::ImageStarted { row, .. }
            | Self::ImageSucceeded { row, .. }
            | Self::ImageFailed { row, .. }
            | Self::TaskFailed { row, .. }
            | Self::TaskCompleted { row, .. } => Some(*row),
            Self::RunStarted { .. } | Self::AllDone => None,
        }
    }
}

/// Append-only writer for `events.jsonl`: one compact object per line, the
/// event fields plus `type`, `run_id` and `ts`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event: &TaskEvent) -> anyhow::Result<Value> {
        let mut line = Map::new();
        let fields = match serde_json::to_value(event)? {
            Value::Object(fields) => fields,
            other => anyhow::bail!("event did not serialize to an object: {other}"),
        };
        if let Some(kind) = fields.get("type") {
            line.insert("type".to_string(), kind.clone());
        }
        line.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            if key != "type" {
                line.insert(key, value);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let encoded = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}
