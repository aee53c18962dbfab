use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, info, warn};

use crate::modules::cache::{SnapshotOutcome, StatusPatch, TaskCache};
use crate::modules::config::{Feature, Features, Layout, PanelConfig, Timing};
use crate::modules::events::{LogMessage, ProgressUpdate, PushEvent, RoomCommand, StatusChange};
use crate::modules::notice::Notice;
use crate::modules::status::TaskStatus;
use crate::modules::types::{LogEntry, Progress, TaskRecord};

/// Side effects requested by the view model. The session performs them;
/// the view model itself never does I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(RoomCommand),
    /// Re-join every active task room once `after` has elapsed.
    RejoinActiveAfter(Duration),
    RefreshTasks,
    RefreshFiles,
    RefreshSummaries { after: Duration },
    Notify(Notice),
    DetailLog(LogEntry),
    DetailProgress(Progress),
    /// A task was created from this panel.
    TaskCreated(String),
    CloseDetail,
    Redraw,
}

/// Issued when a snapshot request goes out; presented again with its
/// response so stale responses can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

/// The Task View Model: the task cache plus the little UI state that
/// depends on it (connection flag, open detail view).
#[derive(Debug)]
pub struct TaskViewModel {
    cache: TaskCache,
    layout: Layout,
    features: Features,
    timing: Timing,
    connected: bool,
    detail: Option<String>,
    issued: u64,
    applied: u64,
    /// Placeholder ids with the last ticket issued before they were inserted.
    placeholders: HashMap<String, u64>,
    /// Unknown ids whose progress already asked for a refetch.
    pending_refetch: HashSet<String>,
}

impl TaskViewModel {
    pub fn new(config: &PanelConfig) -> Self {
        Self {
            cache: TaskCache::new(config.limits.log_limits()),
            layout: config.layout,
            features: config.features.clone(),
            timing: config.timing,
            connected: false,
            detail: None,
            issued: 0,
            applied: 0,
            placeholders: HashMap::new(),
            pending_refetch: HashSet::new(),
        }
    }

    pub fn cache(&self) -> &TaskCache {
        &self.cache
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn detail_task(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    fn detail_is(&self, task_id: &str) -> bool {
        self.detail.as_deref() == Some(task_id)
    }

    pub fn handle(&mut self, event: PushEvent) -> Vec<Effect> {
        match event {
            PushEvent::Connected => self.on_connected(),
            PushEvent::Disconnected => {
                self.connected = false;
                vec![
                    Effect::Notify(Notice::warning("Disconnected from the crawler service")),
                    Effect::Redraw,
                ]
            }
            PushEvent::Greeting(text) => {
                debug!("Server greeting: {text}");
                Vec::new()
            }
            PushEvent::JoinedGlobalRoom => vec![
                Effect::RefreshTasks,
                Effect::RejoinActiveAfter(self.timing.settle_delay()),
            ],
            PushEvent::JoinedTaskRoom(task_id) => {
                debug!("Joined room of task {task_id}");
                Vec::new()
            }
            PushEvent::StatusChange(change) => self.on_status_change(change),
            PushEvent::Log(message) => self.on_log(message),
            PushEvent::Progress(update) => self.on_progress(update),
            PushEvent::CrawlerCompleted(message) => self.on_crawler_completed(message),
        }
    }

    fn on_connected(&mut self) -> Vec<Effect> {
        self.connected = true;
        vec![
            Effect::Notify(Notice::success("Connected to the crawler service")),
            Effect::Emit(RoomCommand::JoinGlobal),
            Effect::Redraw,
        ]
    }

    fn on_status_change(&mut self, change: StatusChange) -> Vec<Effect> {
        let StatusChange { task_id, status } = change;
        let mut effects = Vec::new();

        match self.cache.set_status(&task_id, status) {
            StatusPatch::Applied { previous } => {
                debug!("Task {task_id}: {previous} -> {status}");
                effects.push(Effect::Redraw);
            }
            StatusPatch::Rejected { current } => {
                warn!("Ignoring unexpected transition of task {task_id}: {current} -> {status}");
                effects.push(Effect::RefreshTasks);
            }
            StatusPatch::Missing => {
                info!("Status change for unseen task {task_id}, refreshing task list");
                self.insert_placeholder(&task_id, status);
                effects.push(Effect::RefreshTasks);
                effects.push(Effect::Redraw);
            }
        }

        if status == TaskStatus::Running {
            effects.push(Effect::Emit(RoomCommand::JoinTask(task_id.clone())));
        }
        if status == TaskStatus::Completed {
            // The single layout refreshes files on crawler_completed instead.
            if self.features.has(Feature::Files) && self.layout != Layout::Single {
                effects.push(Effect::RefreshFiles);
            }
            if self.features.has(Feature::Summaries) {
                effects.push(Effect::RefreshSummaries { after: self.timing.summary_delay() });
            }
        }
        effects
    }

    fn on_log(&mut self, message: LogMessage) -> Vec<Effect> {
        let entry = message.to_entry();
        debug!("[task log] {entry}");
        let Some(task_id) = message.task_id.as_deref() else {
            return Vec::new();
        };
        self.cache.append_log(task_id, entry.clone());
        if self.detail_is(task_id) {
            vec![Effect::DetailLog(entry)]
        } else {
            Vec::new()
        }
    }

    fn on_progress(&mut self, update: ProgressUpdate) -> Vec<Effect> {
        let Some(task_id) = update.task_id.as_deref() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        if self.cache.set_progress(task_id, update.progress) {
            effects.push(Effect::Redraw);
        } else if self.pending_refetch.insert(task_id.to_string()) {
            info!("Progress for unseen task {task_id}, refreshing task list");
            effects.push(Effect::RefreshTasks);
        }
        if self.detail_is(task_id) {
            effects.push(Effect::DetailProgress(update.progress));
        }
        effects
    }

    /// Only the single-task layout listens for this; on the board the
    /// status change to completed already covers it.
    fn on_crawler_completed(&mut self, message: String) -> Vec<Effect> {
        if self.layout != Layout::Single {
            return Vec::new();
        }
        debug!("Crawler finished: {message}");
        let mut effects = vec![Effect::Notify(Notice::success("Crawler task finished"))];
        if self.features.has(Feature::Files) {
            effects.push(Effect::RefreshFiles);
        }
        effects
    }

    /// Room joins for every task that is currently running or starting.
    pub fn rejoin_active(&self) -> Vec<Effect> {
        self.cache
            .active_ids()
            .into_iter()
            .map(|id| Effect::Emit(RoomCommand::JoinTask(id)))
            .collect()
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket(self.issued)
    }

    fn insert_placeholder(&mut self, task_id: &str, status: TaskStatus) {
        if self.cache.insert_placeholder(task_id, status) {
            self.placeholders.insert(task_id.to_string(), self.issued);
        }
    }

    /// Applies a snapshot unless a newer one has already been applied.
    /// Placeholders inserted after the snapshot was requested are kept even
    /// when the snapshot does not list them.
    pub fn apply_snapshot(
        &mut self,
        ticket: RefreshTicket,
        mut tasks: Vec<TaskRecord>,
    ) -> Vec<Effect> {
        if ticket.0 <= self.applied {
            debug!("Dropping stale snapshot #{} (applied #{})", ticket.0, self.applied);
            return Vec::new();
        }
        self.applied = ticket.0;
        self.pending_refetch.clear();

        let kept: Vec<TaskRecord> = self
            .cache
            .iter()
            .filter(|t| self.placeholders.get(&t.task_id).is_some_and(|tag| ticket.0 <= *tag))
            .filter(|t| !tasks.iter().any(|listed| listed.task_id == t.task_id))
            .cloned()
            .collect();
        self.placeholders.retain(|id, _| kept.iter().any(|t| &t.task_id == id));
        for record in &kept {
            debug!("Snapshot #{} predates task {}, keeping it", ticket.0, record.task_id);
        }
        tasks.extend(kept);

        let SnapshotOutcome { active, removed } = self.cache.replace(tasks);
        let mut effects: Vec<Effect> = active
            .into_iter()
            .map(|id| Effect::Emit(RoomCommand::JoinTask(id)))
            .collect();
        let detail_gone = self
            .detail
            .as_deref()
            .is_some_and(|open| removed.iter().any(|id| id == open));
        if detail_gone {
            debug!("Detail view task is gone, closing");
            self.detail = None;
        }
        effects.push(Effect::Redraw);
        effects
    }

    /// Opens the detail view and subscribes to the task's room. Unknown ids
    /// are ignored.
    pub fn open_detail(&mut self, task_id: &str) -> Vec<Effect> {
        if !self.cache.contains(task_id) {
            return Vec::new();
        }
        self.detail = Some(task_id.to_string());
        vec![Effect::Emit(RoomCommand::JoinTask(task_id.to_string())), Effect::Redraw]
    }

    pub fn close_detail(&mut self) -> Vec<Effect> {
        match self.detail.take() {
            Some(_) => vec![Effect::Redraw],
            None => Vec::new(),
        }
    }

    /// A task was created from this panel. The single-task layout follows it.
    pub fn task_created(&mut self, task_id: &str) -> Vec<Effect> {
        let mut effects = vec![
            Effect::Emit(RoomCommand::JoinTask(task_id.to_string())),
            Effect::RefreshTasks,
        ];
        if self.layout == Layout::Single {
            self.insert_placeholder(task_id, TaskStatus::Starting);
            self.detail = Some(task_id.to_string());
            effects.push(Effect::Redraw);
        }
        effects
    }
}
