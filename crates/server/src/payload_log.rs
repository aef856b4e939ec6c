//! Raw webhook payload archive.
//!
//! Every webhook body is written to disk before any processing, so a
//! misbehaving automation can always be replayed or debugged from the exact
//! payload that triggered it. The same directory backs the `/logs`
//! inspection API.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use relay_core::error::RelayError;

/// Estimated bytes per log line, used to bound how much of a file the tail
/// endpoint reads.
const AVG_LINE_LEN: u64 = 150;

#[derive(Clone)]
pub struct PayloadLog {
    dir: PathBuf,
}

/// Directory listing entry for the `/logs` API.
#[derive(Debug, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub size: u64,
    pub modified: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl PayloadLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive timestamp, filename-safe and sortable.
    pub fn timestamp() -> String {
        Utc::now().format("%Y%m%dT%H%M%S%6f").to_string()
    }

    /// Archive a payload as `{prefix}_{timestamp}.json`, returning the
    /// filename.
    pub fn save(&self, prefix: &str, payload: &Value) -> Result<String, RelayError> {
        let name = format!("{prefix}_{}.json", Self::timestamp());
        let serialized = serde_json::to_string_pretty(payload)
            .map_err(|e| RelayError::Serialize(e.to_string()))?;
        fs::write(self.dir.join(&name), serialized)?;
        Ok(name)
    }

    /// Archive an error alongside the payload that caused it.
    pub fn save_error(
        &self,
        prefix: &str,
        error: &str,
        payload: &Value,
    ) -> Result<String, RelayError> {
        let timestamp = Self::timestamp();
        let name = format!("error_{prefix}_{timestamp}.json");
        let record = serde_json::json!({
            "error": error,
            "payload": payload,
            "timestamp": timestamp,
        });
        let serialized = serde_json::to_string_pretty(&record)
            .map_err(|e| RelayError::Serialize(e.to_string()))?;
        fs::write(self.dir.join(&name), serialized)?;
        Ok(name)
    }

    /// List archived files (.json/.log directly under the archive dir),
    /// newest first.
    pub fn list(&self) -> Result<Vec<LogFileInfo>, RelayError> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let ext = match path.extension().and_then(|e| e.to_str()) {
                Some(ext @ ("json" | "log")) => ext.to_string(),
                _ => continue,
            };
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());

            files.push(LogFileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: modified.format("%Y-%m-%d %H:%M:%S").to_string(),
                kind: ext,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.name.cmp(&a.name)));
        Ok(files)
    }

    /// Whether `name` refers to a file directly under the archive dir.
    pub fn is_safe_name(name: &str) -> bool {
        !name.is_empty()
            && !name.contains('/')
            && !name.contains('\\')
            && name != "."
            && name != ".."
    }

    /// Read the last `lines` lines of an archived file without loading the
    /// whole file. Returns `None` for unknown files; callers must check
    /// [`is_safe_name`](Self::is_safe_name) first.
    pub fn tail(&self, name: &str, lines: usize) -> Result<Option<String>, RelayError> {
        let path = self.dir.join(name);
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len();
        let to_read = (lines as u64).saturating_mul(AVG_LINE_LEN);
        if to_read < size {
            file.seek(SeekFrom::Start(size - to_read))?;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let text = String::from_utf8_lossy(&buf);

        let tail: Vec<&str> = text.lines().rev().take(lines).collect();
        let mut out = tail
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        if text.ends_with('\n') && !out.is_empty() {
            out.push('\n');
        }
        Ok(Some(out))
    }
}

impl std::fmt::Debug for PayloadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayloadLog({})", self.dir.display())
    }
}

/// Archive a payload, logging rather than failing when the write is
/// impossible — webhooks are processed even if the disk is not cooperating.
pub fn archive_best_effort(log: &PayloadLog, prefix: &str, payload: &Value) -> Option<String> {
    match log.save(prefix, payload) {
        Ok(name) => {
            info!(file = %name, "webhook payload archived");
            Some(name)
        }
        Err(e) => {
            tracing::warn!(prefix = %prefix, error = %e, "failed to archive webhook payload");
            None
        }
    }
}
