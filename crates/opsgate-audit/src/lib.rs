//! Append-only durable audit trail with filtered retrieval and CSV export.
//!
//! The backing store is a line-delimited JSON file: one immutable record per
//! line with a monotonically increasing id assigned at append time. Each
//! `record` and each `fetch` call opens the store, operates, and releases it;
//! no handle is held across calls.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FETCH_LIMIT: usize = 1000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit store {path}: {detail}")]
    Open { path: String, detail: String },
    #[error("audit write failure: {0}")]
    Write(String),
    #[error("failed to read audit store {path}: {detail}")]
    Read { path: String, detail: String },
    #[error("failed to export audit log to {path}: {detail}")]
    Export { path: String, detail: String },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub id: u64,
    pub username: String,
    pub action: String,
    pub status: AuditStatus,
    pub timestamp: String,
}

/// Exact-match conjunction over the optional fields; an absent field is
/// unconstrained, so the default filter matches every record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub username: Option<String>,
    pub action: Option<String>,
    pub status: Option<AuditStatus>,
}

impl AuditFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        self.username
            .as_deref()
            .map_or(true, |username| record.username == username)
            && self
                .action
                .as_deref()
                .map_or(true, |action| record.action == action)
            && self
                .status
                .map_or(true, |status| record.status == status)
    }
}

/// Append seam for callers that only emit records, so enforcement can be
/// tested against an in-memory sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, username: &str, action: &str, status: AuditStatus) -> Result<(), AuditError>;
}

impl<S: AuditSink + ?Sized> AuditSink for &S {
    fn record(&self, username: &str, action: &str, status: AuditStatus) -> Result<(), AuditError> {
        (**self).record(username, action, status)
    }
}

pub struct AuditTrail {
    path: PathBuf,
    next_id: Mutex<u64>,
}

impl AuditTrail {
    /// Ensures the backing store exists and seeds the id counter from the
    /// highest id already present. Never destructive: reopening an
    /// initialized store leaves existing rows untouched.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| AuditError::Open {
                    path: path.display().to_string(),
                    detail: e.to_string(),
                })?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::Open {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        let last_id = read_records(&path)?.last().map(|record| record.id).unwrap_or(0);
        Ok(Self {
            path,
            next_id: Mutex::new(last_id + 1),
        })
    }

    /// Appends exactly one record with the current local timestamp. One
    /// write attempt, no retries; concurrent callers are serialized by the
    /// id mutex.
    pub fn record(
        &self,
        username: &str,
        action: &str,
        status: AuditStatus,
    ) -> Result<(), AuditError> {
        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| AuditError::Write("audit id lock poisoned".to_string()))?;
        let record = AuditRecord {
            id: *next_id,
            username: username.to_string(),
            action: action.to_string(),
            status,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        let line =
            serde_json::to_string(&record).map_err(|e| AuditError::Write(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::Write(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| AuditError::Write(e.to_string()))?;
        file.flush().map_err(|e| AuditError::Write(e.to_string()))?;

        *next_id += 1;
        Ok(())
    }

    /// Matching records, newest first (descending id, i.e. insertion order
    /// rather than timestamp), capped at `limit`. No match is an empty
    /// result, not an error.
    pub fn fetch(&self, limit: usize, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = read_records(&self.path)?;
        Ok(records
            .into_iter()
            .rev()
            .filter(|record| filter.matches(record))
            .take(limit)
            .collect())
    }

    /// Materializes `fetch(limit, filter)` as UTF-8 CSV with the fixed
    /// header `username,action,status,timestamp`. Returns the number of
    /// exported rows.
    pub fn export_csv(
        &self,
        path: impl AsRef<Path>,
        limit: usize,
        filter: &AuditFilter,
    ) -> Result<usize, AuditError> {
        let path = path.as_ref();
        let rows = self.fetch(limit, filter)?;

        let mut out = String::from("username,action,status,timestamp\n");
        for record in &rows {
            out.push_str(&csv_field(&record.username));
            out.push(',');
            out.push_str(&csv_field(&record.action));
            out.push(',');
            out.push_str(record.status.as_str());
            out.push(',');
            out.push_str(&csv_field(&record.timestamp));
            out.push('\n');
        }
        fs::write(path, out).map_err(|e| AuditError::Export {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(rows.len())
    }
}

impl AuditSink for AuditTrail {
    fn record(&self, username: &str, action: &str, status: AuditStatus) -> Result<(), AuditError> {
        AuditTrail::record(self, username, action, status)
    }
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let file = fs::File::open(path).map_err(|e| AuditError::Read {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| AuditError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(&line).map_err(|e| AuditError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
