//! Line-delimited JSON operational logs.
//!
//! Watcher batches and search performance records append to files under
//! `.codeindex/logs/` as one JSON object per line.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::IndexErr;
use crate::error::Result;

/// Append-only JSONL sink.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlSink {
    /// Open (creating parents) for append.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexErr::FileRead {
                path: parent.to_path_buf(),
                cause: e.to_string(),
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| IndexErr::FileRead {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one record with a timestamp field.
    pub fn append<T: Serialize>(&self, kind: &str, record: &T) -> Result<()> {
        let line = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "kind": kind,
            "record": record,
        });
        let mut file = self.file.lock().map_err(|_| IndexErr::FileRead {
            path: self.path.clone(),
            cause: "log sink mutex poisoned".to_string(),
        })?;
        writeln!(file, "{line}").map_err(|e| IndexErr::FileRead {
            path: self.path.clone(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::open(&dir.path().join("logs/watcher.jsonl")).unwrap();

        sink.append("batch", &serde_json::json!({ "events": 3 })).unwrap();
        sink.append("batch", &serde_json::json!({ "events": 1 })).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["kind"], "batch");
            assert!(parsed["ts"].is_string());
        }
    }
}
