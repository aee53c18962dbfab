use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::modules::types::{
    DirNode, Document, FileEntry, KnowledgeBase, LogFileInfo, StartRequest, StopResult,
    SummaryInfo, TaskRecord, UploadedDoc,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The service answered but refused the operation.
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected response ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("cannot decode response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    Url(String),
}

impl ApiError {
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Started {
    pub task_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopSummary {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub results: Vec<StopResult>,
}

/// Task lifecycle endpoints.
#[allow(async_fn_in_trait)]
pub trait TaskApi {
    async fn start_crawler(&self, request: &StartRequest) -> Result<Started, ApiError>;
    async fn stop_crawler(&self, task_id: &str) -> Result<String, ApiError>;
    async fn stop_many(&self, task_ids: &[String]) -> Result<StopSummary, ApiError>;
    async fn delete_task(&self, task_id: &str) -> Result<String, ApiError>;
    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, ApiError>;
    async fn task_detail(&self, task_id: &str) -> Result<TaskRecord, ApiError>;
}

/// Downloaded files, log history and task summaries.
#[allow(async_fn_in_trait)]
pub trait ArchiveApi {
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileEntry>, ApiError>;
    async fn download_file(&self, path: &str) -> Result<Vec<u8>, ApiError>;
    async fn download_all(&self) -> Result<Vec<u8>, ApiError>;
    async fn dir_tree(&self) -> Result<Vec<DirNode>, ApiError>;
    async fn list_logs(&self) -> Result<Vec<LogFileInfo>, ApiError>;
    async fn log_content(&self, name: &str) -> Result<Document, ApiError>;
    async fn delete_log(&self, name: &str) -> Result<String, ApiError>;
    async fn list_summaries(&self) -> Result<Vec<SummaryInfo>, ApiError>;
    async fn summary_content(&self, task_id: &str) -> Result<Document, ApiError>;
    async fn delete_summary(&self, task_id: &str) -> Result<String, ApiError>;
}

/// Knowledge-base forwarding endpoints.
#[allow(async_fn_in_trait)]
pub trait KnowledgeApi {
    async fn knowledge_bases(&self) -> Result<Vec<KnowledgeBase>, ApiError>;
    async fn upload_to_knowledge_base(
        &self,
        kb_id: &str,
        file_path: &str,
        file_name: &str,
    ) -> Result<Vec<UploadedDoc>, ApiError>;
    async fn parse_documents(&self, doc_ids: &[String]) -> Result<String, ApiError>;
}

/// JSON-over-HTTP client for the crawler service.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base: Url,
    client: Client,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::Url(format!("{base_url}: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("spider-panel/0.1"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("<- {status} ({} bytes)", body.len());
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                body: limit_tail(&body, 200),
            }),
            Err(err) => Err(ApiError::Decode(err.to_string())),
        }
    }

    async fn get(&self, url: Url) -> Result<Value, ApiError> {
        debug!("GET {url}");
        self.send(self.client.get(url)).await
    }

    async fn post(&self, url: Url, body: &Value) -> Result<Value, ApiError> {
        debug!("POST {url}");
        self.send(self.client.post(url).json(body)).await
    }

    async fn delete(&self, url: Url) -> Result<Value, ApiError> {
        debug!("DELETE {url}");
        self.send(self.client.delete(url)).await
    }

    async fn bytes(&self, url: Url) -> Result<Vec<u8>, ApiError> {
        debug!("GET {url} (download)");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let value = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
            if let Some(message) = value.get("error").and_then(Value::as_str) {
                return Err(ApiError::Rejected(message.to_string()));
            }
            return Err(ApiError::Status { status: status.as_u16(), body: limit_tail(&body, 200) });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fails on `success: false` or an `error` field, with the server message
/// or `fallback`.
pub fn check_reply(value: &Value, fallback: &str) -> Result<(), ApiError> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback);
        return Err(ApiError::Rejected(message.to_string()));
    }
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(ApiError::Rejected(message.to_string()));
    }
    Ok(())
}

/// Reads `key` from a reply. A present field wins over an `error` field,
/// since list endpoints send an empty list together with the error.
pub fn take_field<T: DeserializeOwned>(
    mut value: Value,
    key: &str,
    fallback: &str,
) -> Result<T, ApiError> {
    match value.get_mut(key).map(Value::take) {
        Some(field) if !field.is_null() => {
            serde_json::from_value(field).map_err(|e| ApiError::Decode(format!("{key}: {e}")))
        }
        _ => {
            check_reply(&value, fallback)?;
            Err(ApiError::Rejected(fallback.to_string()))
        }
    }
}

fn message_of(value: &Value, fallback: &str) -> Result<String, ApiError> {
    check_reply(value, fallback)?;
    Ok(value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

fn document_of(value: Value, fallback: &str) -> Result<Document, ApiError> {
    check_reply(&value, fallback)?;
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn limit_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

impl TaskApi for HttpApi {
    async fn start_crawler(&self, request: &StartRequest) -> Result<Started, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        let reply = self.post(self.endpoint(&["api", "start_crawler"])?, &body).await?;
        check_reply(&reply, "Task creation failed")?;
        serde_json::from_value(reply)
            .map_err(|_| ApiError::Rejected("Task creation failed".to_string()))
    }

    async fn stop_crawler(&self, task_id: &str) -> Result<String, ApiError> {
        let url = self.endpoint(&["api", "stop_crawler"])?;
        let reply = self.post(url, &json!({ "task_id": task_id })).await?;
        message_of(&reply, "Stop failed")
    }

    async fn stop_many(&self, task_ids: &[String]) -> Result<StopSummary, ApiError> {
        let url = self.endpoint(&["api", "stop_multiple_crawlers"])?;
        let reply = self.post(url, &json!({ "task_ids": task_ids })).await?;
        check_reply(&reply, "Batch stop failed")?;
        serde_json::from_value(reply).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn delete_task(&self, task_id: &str) -> Result<String, ApiError> {
        let reply = self.delete(self.endpoint(&["api", "delete_task", task_id])?).await?;
        message_of(&reply, "Delete failed")
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_all_tasks"])?).await?;
        take_field(reply, "tasks", "Cannot load tasks")
    }

    async fn task_detail(&self, task_id: &str) -> Result<TaskRecord, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_task_detail", task_id])?).await?;
        take_field(reply, "task", "Task not found")
    }
}

impl ArchiveApi for HttpApi {
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileEntry>, ApiError> {
        let mut url = self.endpoint(&["api", "get_files"])?;
        if let Some(dir) = dir.filter(|d| !d.is_empty()) {
            url.query_pairs_mut().append_pair("dir", dir);
        }
        let reply = self.get(url).await?;
        take_field(reply, "files", "Cannot load files")
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let mut segments = vec!["api", "download_file"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        self.bytes(self.endpoint(&segments)?).await
    }

    async fn download_all(&self) -> Result<Vec<u8>, ApiError> {
        self.bytes(self.endpoint(&["api", "download_all"])?).await
    }

    async fn dir_tree(&self) -> Result<Vec<DirNode>, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_dir_tree"])?).await?;
        take_field(reply, "tree", "Cannot load directory tree")
    }

    async fn list_logs(&self) -> Result<Vec<LogFileInfo>, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_logs"])?).await?;
        take_field(reply, "logs", "Cannot load log history")
    }

    async fn log_content(&self, name: &str) -> Result<Document, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_log_content", name])?).await?;
        document_of(reply, "Cannot load log content")
    }

    async fn delete_log(&self, name: &str) -> Result<String, ApiError> {
        let reply = self.delete(self.endpoint(&["api", "delete_log", name])?).await?;
        message_of(&reply, "Delete failed")
    }

    async fn list_summaries(&self) -> Result<Vec<SummaryInfo>, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_task_summaries"])?).await?;
        take_field(reply, "summaries", "Cannot load task summaries")
    }

    async fn summary_content(&self, task_id: &str) -> Result<Document, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_summary_content", task_id])?).await?;
        document_of(reply, "Cannot load summary content")
    }

    async fn delete_summary(&self, task_id: &str) -> Result<String, ApiError> {
        let reply = self.delete(self.endpoint(&["api", "delete_summary", task_id])?).await?;
        message_of(&reply, "Delete failed")
    }
}

impl KnowledgeApi for HttpApi {
    async fn knowledge_bases(&self) -> Result<Vec<KnowledgeBase>, ApiError> {
        let reply = self.get(self.endpoint(&["api", "get_knowledge_bases"])?).await?;
        check_reply(&reply, "Cannot load knowledge bases")?;
        take_field(reply, "kbs", "Cannot load knowledge bases")
    }

    async fn upload_to_knowledge_base(
        &self,
        kb_id: &str,
        file_path: &str,
        file_name: &str,
    ) -> Result<Vec<UploadedDoc>, ApiError> {
        let url = self.endpoint(&["api", "upload_to_knowledge_base"])?;
        let body = json!({ "kb_id": kb_id, "file_path": file_path, "file_name": file_name });
        let reply = self.post(url, &body).await?;
        check_reply(&reply, "Upload failed")?;
        match reply.get("data") {
            Some(data) if data.is_array() => serde_json::from_value(data.clone())
                .map_err(|e| ApiError::Decode(format!("data: {e}"))),
            _ => Ok(Vec::new()),
        }
    }

    async fn parse_documents(&self, doc_ids: &[String]) -> Result<String, ApiError> {
        let url = self.endpoint(&["api", "parse_documents"])?;
        let reply = self.post(url, &json!({ "doc_ids": doc_ids })).await?;
        message_of(&reply, "Parse request failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_false_uses_server_message_or_fallback() {
        let reply = json!({"success": false, "message": "not running"});
        let err = check_reply(&reply, "fb").unwrap_err();
        assert_eq!(err.to_string(), "not running");
        let err = check_reply(&json!({"success": false}), "Stop failed").unwrap_err();
        assert_eq!(err.to_string(), "Stop failed");
        assert!(check_reply(&json!({"success": true}), "fb").is_ok());
    }

    #[test]
    fn error_field_is_a_rejection() {
        let err = check_reply(&json!({"error": "illegal directory"}), "fb").unwrap_err();
        assert!(matches!(err, ApiError::Rejected(m) if m == "illegal directory"));
    }

    #[test]
    fn list_field_wins_over_error() {
        let summaries: Vec<SummaryInfo> =
            take_field(json!({"error": "disk", "summaries": []}), "summaries", "fb").unwrap();
        assert!(summaries.is_empty());
        let missing = take_field::<Vec<SummaryInfo>>(json!({"error": "disk"}), "summaries", "fb");
        assert!(matches!(missing, Err(ApiError::Rejected(m)) if m == "disk"));
    }

    #[test]
    fn endpoint_escapes_segments() {
        let api = HttpApi::new("http://127.0.0.1:5000", Duration::from_secs(1)).unwrap();
        let url = api.endpoint(&["api", "delete_task", "task 1/x"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:5000/api/delete_task/task%201%2Fx");

        let nested = HttpApi::new("http://host/panel/", Duration::from_secs(1)).unwrap();
        let url = nested.endpoint(&["api", "get_all_tasks"]).unwrap();
        assert_eq!(url.as_str(), "http://host/panel/api/get_all_tasks");
    }

    #[test]
    fn tail_is_char_safe() {
        assert_eq!(limit_tail("abcdef", 3), "def");
        assert_eq!(limit_tail("规章文件", 2), "文件");
    }
}
