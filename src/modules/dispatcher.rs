use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::modules::api::{ApiError, TaskApi};
use crate::modules::notice::Notice;
use crate::modules::types::StartRequest;
use crate::modules::view_model::Effect;

/// Crawler type that crawls a single user-supplied page.
pub const CUSTOM_CRAWLER: &str = "custom";

static PAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?([0-9a-z.-]+)\.([a-z.]{2,6})([/A-Za-z0-9_ .-]*)*/?$")
        .expect("valid regex")
});

/// Something the user can trigger that is locked while its request is in
/// flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Control {
    Start,
    StopAll,
    Stop(String),
    DetailStop(String),
    Delete(String),
}

/// Set of currently disabled controls, shared by the dispatcher and the
/// renderer.
#[derive(Debug, Clone, Default)]
pub struct Controls(Rc<RefCell<HashSet<Control>>>);

impl Controls {
    pub fn is_disabled(&self, control: &Control) -> bool {
        self.0.borrow().contains(control)
    }

    /// Disables `control` until the guard drops. `None` when it is already
    /// disabled.
    pub fn lock(&self, control: Control) -> Option<ControlGuard> {
        if !self.0.borrow_mut().insert(control.clone()) {
            return None;
        }
        Some(ControlGuard { controls: self.clone(), control })
    }
}

pub struct ControlGuard {
    controls: Controls,
    control: Control,
}

impl Drop for ControlGuard {
    fn drop(&mut self) {
        self.controls.0.borrow_mut().remove(&self.control);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Select a crawler type")]
    MissingCrawlerType,
    #[error("Enter the page URL")]
    MissingPageUrl,
    #[error("Enter a valid web address")]
    InvalidPageUrl,
}

/// The create-task form as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub crawler_type: String,
    pub max_pages: Option<u32>,
    pub page_url: String,
}

impl TaskForm {
    pub fn validate(&self, default_max_pages: u32) -> Result<StartRequest, FormError> {
        let crawler_type = self.crawler_type.trim();
        if crawler_type.is_empty() {
            return Err(FormError::MissingCrawlerType);
        }
        let page_url = if crawler_type == CUSTOM_CRAWLER {
            let raw = self.page_url.trim();
            if raw.is_empty() {
                return Err(FormError::MissingPageUrl);
            }
            let url = normalize_page_url(raw);
            if !PAGE_URL.is_match(&url) {
                return Err(FormError::InvalidPageUrl);
            }
            Some(url)
        } else {
            None
        };
        Ok(StartRequest {
            crawler_type: crawler_type.to_string(),
            max_pages: self.max_pages.unwrap_or(default_max_pages),
            page_url,
        })
    }
}

/// Adds `https://` unless the address already starts with `http`.
pub fn normalize_page_url(raw: &str) -> String {
    if raw.starts_with("http") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn failure(err: ApiError, network_message: &str) -> Vec<Effect> {
    warn!("{network_message}: {err}");
    let message = if err.is_network() {
        network_message.to_string()
    } else {
        err.to_string()
    };
    vec![Effect::Notify(Notice::error(message))]
}

/// Turns user actions into one HTTP call each, with the triggering control
/// locked for the duration.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<A> {
    api: A,
    controls: Controls,
    default_max_pages: u32,
}

impl<A: TaskApi> CommandDispatcher<A> {
    pub fn new(api: A, controls: Controls, default_max_pages: u32) -> Self {
        Self { api, controls, default_max_pages }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub async fn create_task(&self, form: &TaskForm) -> Vec<Effect> {
        let request = match form.validate(self.default_max_pages) {
            Ok(request) => request,
            Err(err) => return vec![Effect::Notify(Notice::error(err.to_string()))],
        };
        let Some(_guard) = self.controls.lock(Control::Start) else {
            debug!("Create ignored, a create request is already in flight");
            return Vec::new();
        };
        match self.api.start_crawler(&request).await {
            Ok(started) => {
                info!("Created task {} ({})", started.task_id, request.crawler_type);
                vec![
                    Effect::Notify(Notice::success(format!("Task created: {}", started.task_id))),
                    Effect::TaskCreated(started.task_id),
                ]
            }
            Err(err) => failure(err, "Network error while creating the task"),
        }
    }

    /// Stops one task. `from_detail` closes the detail view on success.
    pub async fn stop_task(
        &self,
        task_id: &str,
        from_detail: bool,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Vec<Effect> {
        if !confirm("Stop this task?") {
            return Vec::new();
        }
        let control = if from_detail {
            Control::DetailStop(task_id.to_string())
        } else {
            Control::Stop(task_id.to_string())
        };
        let Some(_guard) = self.controls.lock(control) else {
            return Vec::new();
        };
        match self.api.stop_crawler(task_id).await {
            Ok(_) => {
                let mut effects = vec![
                    Effect::Notify(Notice::success("Stop signal sent")),
                    Effect::RefreshTasks,
                ];
                if from_detail {
                    effects.push(Effect::CloseDetail);
                }
                effects
            }
            Err(err) => failure(err, "Network error while stopping the task"),
        }
    }

    /// Stops every task in `running`. Nothing running is a warning and no
    /// request is made.
    pub async fn stop_all(
        &self,
        running: Vec<String>,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Vec<Effect> {
        if running.is_empty() {
            return vec![Effect::Notify(Notice::warning("No task is running"))];
        }
        let prompt = format!("Stop all {} running tasks?", running.len());
        if !confirm(&prompt) {
            return Vec::new();
        }
        let Some(_guard) = self.controls.lock(Control::StopAll) else {
            return Vec::new();
        };
        match self.api.stop_many(&running).await {
            Ok(summary) => {
                for result in summary.results.iter().filter(|r| !r.success) {
                    warn!("Task {} not stopped: {}", result.task_id, result.message);
                }
                vec![Effect::Notify(Notice::success(summary.message)), Effect::RefreshTasks]
            }
            Err(err) => failure(err, "Network error while stopping tasks"),
        }
    }

    pub async fn delete_task(
        &self,
        task_id: &str,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Vec<Effect> {
        if !confirm("Delete this task?") {
            return Vec::new();
        }
        let Some(_guard) = self.controls.lock(Control::Delete(task_id.to_string())) else {
            return Vec::new();
        };
        match self.api.delete_task(task_id).await {
            Ok(_) => vec![Effect::Notify(Notice::success("Task deleted")), Effect::RefreshTasks],
            Err(err) => failure(err, "Network error while deleting the task"),
        }
    }
}
