use derive_more::with_trait::Display;
use serde::{Deserialize, Serialize};

use crate::modules::status::TaskStatus;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Display, Serialize)]
#[display("{current}/{total} ({percentage:.1}%)")]
pub struct Progress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub percentage: f64,
}

impl Progress {
    /// Percentage clamped to the 0..=100 range a progress bar can draw.
    pub fn width(&self) -> f64 {
        if self.percentage.is_nan() {
            return 0.0;
        }
        self.percentage.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[display("DEBUG")]
    Debug,
    #[display("SUCCESS")]
    Success,
    #[display("WARNING")]
    Warning,
    #[display("ERROR")]
    Error,
    /// Also covers levels this client does not know.
    #[default]
    #[serde(other)]
    #[display("INFO")]
    Info,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Display, Serialize)]
#[display("[{timestamp}] [{level}] {message}")]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    pub timestamp: String,
}

/// One task as listed by `/api/get_all_tasks`. The snapshot endpoint never
/// carries logs; they are accumulated locally from pushed events.
#[derive(Debug, Deserialize, Clone, PartialEq, Display, Serialize)]
#[display("{task_id} {crawler_name} [{status}]")]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub crawler_type: String,
    #[serde(default)]
    pub crawler_name: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub max_pages: Option<i64>,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(skip)]
    pub logs: Vec<LogEntry>,
}

impl TaskRecord {
    /// Stand-in for a task first seen through a pushed event, filled in by
    /// the next snapshot.
    pub fn placeholder(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            crawler_type: String::new(),
            crawler_name: String::new(),
            start_time: None,
            end_time: None,
            duration: None,
            max_pages: None,
            progress: None,
            logs: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StartRequest {
    pub crawler_type: String,
    pub max_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct StopResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Display, Serialize)]
#[display("{path} ({size} bytes, {mtime})")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct SummaryInfo {
    pub task_id: String,
    #[serde(default)]
    pub crawler_name: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub save_time: Option<String>,
}

/// Text document returned by the log and summary viewers.
#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct Document {
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct DirNode {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub children: Vec<DirNode>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Display, Serialize)]
#[display("{name} ({doc_num} documents)")]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub doc_num: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize)]
pub struct UploadedDoc {
    pub id: String,
}
