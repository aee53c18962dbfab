use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use spider_panel::modules::api::{ApiError, ArchiveApi, HttpApi, KnowledgeApi, TaskApi};
use spider_panel::modules::config::PanelConfig;
use spider_panel::modules::dispatcher::{CommandDispatcher, Controls, TaskForm};
use spider_panel::modules::knowledge::upload_batch;
use spider_panel::modules::status::TaskStatus;
use spider_panel::modules::view_model::{Effect, TaskViewModel};

#[derive(Clone, Default)]
struct Mock {
    requests: Arc<Mutex<Vec<String>>>,
}

impl Mock {
    fn record(&self, line: String) {
        self.requests.lock().unwrap().push(line);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn start_crawler(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(format!("start {body}"));
    if body["crawler_type"] == "custom" && body.get("page_url").is_none() {
        return Json(json!({"success": false, "message": "page_url is required"}));
    }
    Json(json!({"success": true, "task_id": "task-1", "message": "started"}))
}

async fn stop_crawler(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(format!("stop {}", body["task_id"]));
    if body["task_id"] == "ghost" {
        return Json(json!({"success": false}));
    }
    Json(json!({"success": true, "message": "stop signal sent"}))
}

async fn stop_many(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(format!("stop_many {}", body["task_ids"]));
    let results: Vec<Value> = body["task_ids"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|id| json!({"task_id": id, "success": true, "message": "ok"}))
        .collect();
    let message = format!("stopped {}", results.len());
    Json(json!({"success": true, "message": message, "results": results}))
}

async fn delete_task(State(mock): State<Mock>, Path(task_id): Path<String>) -> Json<Value> {
    mock.record(format!("delete {task_id}"));
    Json(json!({"success": true, "message": format!("deleted {task_id}")}))
}

async fn all_tasks(State(mock): State<Mock>) -> Json<Value> {
    mock.record("tasks".to_string());
    Json(json!({
        "tasks": [
            {"task_id": "a", "status": "running",
             "crawler_type": "mem_gz", "crawler_name": "Rules",
             "start_time": "2025-07-01 10:00:00", "end_time": null, "duration": "0:00:10",
             "max_pages": 10, "progress": {"current": 1, "total": 4, "percentage": 25.0}},
            {"task_id": "b", "status": "completed",
             "crawler_type": "custom", "crawler_name": "Page",
             "start_time": null, "end_time": null, "duration": null,
             "max_pages": 0, "progress": null}
        ]
    }))
}

async fn task_detail(Path(task_id): Path<String>) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": format!("Task {task_id} not found")})))
}

async fn files(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let dir = query.get("dir").cloned().unwrap_or_default();
    Json(json!({
        "files": [{"name": "rules.pdf", "path": format!("{dir}/rules.pdf"), "size": 2048,
                   "mtime": "2025-07-01 10:00:00", "type": "应急部-规章"}],
        "current_dir": dir
    }))
}

async fn download(Path(path): Path<String>) -> impl IntoResponse {
    if path.ends_with("missing.pdf") {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "file not found"}))).into_response();
    }
    format!("content of {path}").into_response()
}

async fn logs() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn summaries() -> Json<Value> {
    Json(json!({"error": "disk unavailable", "summaries": []}))
}

async fn knowledge_bases() -> Json<Value> {
    Json(json!({"success": true, "kbs": [{"id": "kb1", "name": "Rules", "doc_num": 3}]}))
}

async fn upload(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(format!("upload {}", body["file_name"]));
    if body["file_name"] == "bad.exe" {
        return Json(json!({"success": false, "message": "unsupported type"}));
    }
    let doc_id = format!("doc-{}", body["file_name"].as_str().unwrap_or(""));
    Json(json!({"success": true, "data": [{"id": doc_id}]}))
}

async fn parse(State(mock): State<Mock>, Json(body): Json<Value>) -> Json<Value> {
    mock.record(format!("parse {}", body["doc_ids"]));
    Json(json!({"success": true, "message": "parsing"}))
}

async fn serve() -> (HttpApi, Mock) {
    let mock = Mock::default();
    let app = Router::new()
        .route("/api/start_crawler", post(start_crawler))
        .route("/api/stop_crawler", post(stop_crawler))
        .route("/api/stop_multiple_crawlers", post(stop_many))
        .route("/api/delete_task/:task_id", delete(delete_task))
        .route("/api/get_all_tasks", get(all_tasks))
        .route("/api/get_task_detail/:task_id", get(task_detail))
        .route("/api/get_files", get(files))
        .route("/api/download_file/*path", get(download))
        .route("/api/get_logs", get(logs))
        .route("/api/get_task_summaries", get(summaries))
        .route("/api/get_knowledge_bases", get(knowledge_bases))
        .route("/api/upload_to_knowledge_base", post(upload))
        .route("/api/parse_documents", post(parse))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    let api = HttpApi::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    (api, mock)
}

#[tokio::test]
async fn snapshot_feeds_the_view_model() {
    let (api, _mock) = serve().await;
    let mut vm = TaskViewModel::new(&PanelConfig::default());
    let ticket = vm.begin_refresh();
    let effects = vm.apply_snapshot(ticket, api.list_tasks().await.unwrap());

    assert_eq!(vm.cache().len(), 2);
    assert_eq!(vm.cache().get("b").unwrap().status, TaskStatus::Completed);
    assert_eq!(vm.cache().running_ids(), vec!["a".to_string()]);
    assert!(effects.iter().any(|e| matches!(e, Effect::Emit(_))));
}

#[tokio::test]
async fn create_sends_normalized_url() {
    let (api, mock) = serve().await;
    let dispatcher = CommandDispatcher::new(api, Controls::default(), 10);
    let form = TaskForm {
        crawler_type: "custom".into(),
        max_pages: None,
        page_url: "example.com/list".into(),
    };
    let effects = dispatcher.create_task(&form).await;

    assert!(effects.contains(&Effect::TaskCreated("task-1".into())));
    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains(r#""page_url":"https://example.com/list""#));
    assert!(requests[0].contains(r#""max_pages":10"#));
}

#[tokio::test]
async fn rejected_stop_uses_fallback_message() {
    let (api, _mock) = serve().await;
    let err = api.stop_crawler("ghost").await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected(ref m) if m == "Stop failed"));
    assert_eq!(api.stop_crawler("a").await.unwrap(), "stop signal sent");
}

#[tokio::test]
async fn stop_all_without_running_tasks_stays_offline() {
    let (api, mock) = serve().await;
    let dispatcher = CommandDispatcher::new(api, Controls::default(), 10);
    dispatcher.stop_all(Vec::new(), |_| true).await;
    assert!(mock.requests().is_empty());

    let effects = dispatcher.stop_all(vec!["a".into(), "c".into()], |_| true).await;
    assert!(effects.contains(&Effect::RefreshTasks));
    assert_eq!(mock.requests(), vec![r#"stop_many ["a","c"]"#.to_string()]);
}

#[tokio::test]
async fn delete_escapes_task_id() {
    let (api, mock) = serve().await;
    assert_eq!(api.delete_task("task 1").await.unwrap(), "deleted task 1");
    assert_eq!(mock.requests(), vec!["delete task 1".to_string()]);
}

#[tokio::test]
async fn detail_error_body_becomes_rejection() {
    let (api, _mock) = serve().await;
    let err = api.task_detail("zzz").await.unwrap_err();
    assert_eq!(err.to_string(), "Task zzz not found");
}

#[tokio::test]
async fn files_and_downloads() {
    let (api, _mock) = serve().await;
    let files = api.list_files(Some("mem/gz")).await.unwrap();
    assert_eq!(files[0].path, "mem/gz/rules.pdf");
    assert_eq!(files[0].kind, "应急部-规章");

    let bytes = api.download_file("mem/gz/rules.pdf").await.unwrap();
    assert_eq!(bytes, b"content of mem/gz/rules.pdf");
    let err = api.download_file("mem/missing.pdf").await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected(ref m) if m == "file not found"));
}

#[tokio::test]
async fn non_json_failure_is_a_status_error() {
    let (api, _mock) = serve().await;
    let err = api.list_logs().await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 500, ref body } if body == "boom"));
}

#[tokio::test]
async fn list_with_error_field_still_yields_list() {
    let (api, _mock) = serve().await;
    assert!(api.list_summaries().await.unwrap().is_empty());
}

#[tokio::test]
async fn knowledge_base_batch_upload() {
    let (api, mock) = serve().await;
    let kb = api.knowledge_bases().await.unwrap().remove(0);
    let mut files = api.list_files(None).await.unwrap();
    let mut bad = files[0].clone();
    bad.name = "bad.exe".into();
    files.push(bad);

    let report = upload_batch(&api, &kb, &files, true, |_, _, _| {}).await;
    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(report.doc_ids, vec!["doc-rules.pdf".to_string()]);
    assert_eq!(report.parse, Some(Ok("parsing".to_string())));
    assert!(mock.requests().contains(&r#"parse ["doc-rules.pdf"]"#.to_string()));
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = HttpApi::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = api.list_tasks().await.unwrap_err();
    assert!(err.is_network());
}
