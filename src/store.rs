//! Append-only JSONL store of LITL trace records.
//!
//! One line per completed task:
//! ```jsonl
//! {"id":"6f1c...","ts":"2025-01-01T00:00:00+00:00","iteration":0,"trace":{...},"reflection":{...}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ReflectTraceUnit, TraceUnit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub iteration: u64,
    pub trace: TraceUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<ReflectTraceUnit>,
}

impl TraceRecord {
    pub fn new(iteration: u64, trace: TraceUnit, reflection: Option<ReflectTraceUnit>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            iteration,
            trace,
            reflection,
        }
    }
}

pub struct TraceStore {
    path: PathBuf,
}

impl TraceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single record, creating the file and its parent directory.
    pub fn append(&self, record: &TraceRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Load every record; malformed lines are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<TraceRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<TraceRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed trace record"
                ),
            }
        }
        Ok(records)
    }

    /// Next free iteration number.
    pub fn next_iteration(&self) -> Result<u64> {
        Ok(self
            .load_all()?
            .iter()
            .map(|r| r.iteration + 1)
            .max()
            .unwrap_or(0))
    }
}
