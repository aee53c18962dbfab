use serde::Deserialize;
use serde_json::{Value, json};

use crate::modules::status::TaskStatus;
use crate::modules::types::{LogEntry, LogLevel, Progress};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StatusChange {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogMessage {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LogMessage {
    /// Stored form of the line; a missing timestamp becomes the local
    /// wall-clock time of arrival.
    pub fn to_entry(&self) -> LogEntry {
        LogEntry {
            message: self.message.clone(),
            level: self.level,
            timestamp: self
                .timestamp
                .clone()
                .unwrap_or_else(|| chrono::Local::now().format("%H:%M:%S").to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub progress: Progress,
}

/// Everything the push channel can deliver to the view model.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    Greeting(String),
    JoinedGlobalRoom,
    JoinedTaskRoom(String),
    StatusChange(StatusChange),
    Log(LogMessage),
    Progress(ProgressUpdate),
    CrawlerCompleted(String),
}

impl PushEvent {
    /// Decodes a named Socket.IO event. Events the panel does not consume
    /// yield `Ok(None)`.
    pub fn from_named(name: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            "connected" => PushEvent::Greeting(text_field(&data, "data")),
            "joined_global_room" => PushEvent::JoinedGlobalRoom,
            "joined_task_room" => PushEvent::JoinedTaskRoom(text_field(&data, "task_id")),
            "task_status_change" => PushEvent::StatusChange(serde_json::from_value(data)?),
            "log_message" => PushEvent::Log(serde_json::from_value(data)?),
            "progress_update" => PushEvent::Progress(serde_json::from_value(data)?),
            "crawler_completed" => PushEvent::CrawlerCompleted(text_field(&data, "message")),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn text_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Room membership requests sent back over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomCommand {
    JoinGlobal,
    JoinTask(String),
}

impl RoomCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RoomCommand::JoinGlobal => "join_global_room",
            RoomCommand::JoinTask(_) => "join_task_room",
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self {
            RoomCommand::JoinGlobal => None,
            RoomCommand::JoinTask(task_id) => Some(json!({ "task_id": task_id })),
        }
    }
}
