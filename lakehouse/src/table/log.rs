use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOG_DIR: &str = "_table_log";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitOperation {
    Create,
    Append,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Relative to the table root.
    pub path: String,
    pub num_rows: u64,
    pub size_bytes: u64,
}

/// One entry of the commit log. The table's visible state is the ordered
/// union of the files of every committed entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommitEntry {
    pub version: u64,
    pub operation: CommitOperation,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<DataFile>,
}

impl CommitEntry {
    pub fn new(version: u64, operation: CommitOperation, files: Vec<DataFile>) -> Self {
        Self {
            version,
            operation,
            timestamp: Utc::now(),
            files,
        }
    }

    pub fn num_rows(&self) -> u64 {
        self.files.iter().map(|f| f.num_rows).sum()
    }
}

pub fn log_entry_path(version: u64) -> String {
    format!("{}/{:020}.json", LOG_DIR, version)
}

/// Extracts the version from a log object name such as
/// `00000000000000000003.json`.
pub fn parse_log_version(file_name: &str) -> Option<u64> {
    file_name
        .strip_suffix(".json")
        .filter(|stem| stem.len() == 20 && stem.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|stem| stem.parse().ok())
}

pub fn data_file_name(version: u64, id: &uuid::Uuid) -> String {
    format!("part-{:05}-{}.parquet", version, id)
}
