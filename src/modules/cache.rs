use std::collections::HashMap;

use log::{debug, warn};

use crate::modules::status::TaskStatus;
use crate::modules::types::{LogEntry, Progress, TaskRecord};

/// Bound on the per-task log sequence. Once `max` is exceeded the oldest
/// entries are dropped in one batch, leaving the newest `keep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    pub max: usize,
    pub keep: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self { max: 1000, keep: 500 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    Applied { previous: TaskStatus },
    Rejected { current: TaskStatus },
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotOutcome {
    /// Tasks in {running, starting} after the replacement.
    pub active: Vec<String>,
    /// Ids that were cached before and are absent from the snapshot.
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
}

/// Task id -> record, in the order the service listed them.
#[derive(Debug, Default)]
pub struct TaskCache {
    order: Vec<String>,
    tasks: HashMap<String, TaskRecord>,
    limits: LogLimits,
}

impl TaskCache {
    pub fn new(limits: LogLimits) -> Self {
        Self {
            order: Vec::new(),
            tasks: HashMap::new(),
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Replaces every record with the snapshot, carrying over the log
    /// sequence of each task that survives.
    pub fn replace(&mut self, snapshot: Vec<TaskRecord>) -> SnapshotOutcome {
        let mut previous = std::mem::take(&mut self.tasks);
        let previous_order = std::mem::take(&mut self.order);

        for mut record in snapshot {
            if self.tasks.contains_key(&record.task_id) {
                warn!("Snapshot lists task {} twice, keeping the first", record.task_id);
                continue;
            }
            if let Some(old) = previous.remove(&record.task_id) {
                record.logs = old.logs;
            }
            self.order.push(record.task_id.clone());
            self.tasks.insert(record.task_id.clone(), record);
        }

        let removed = previous_order
            .into_iter()
            .filter(|id| previous.contains_key(id))
            .collect();
        let active = self.active_ids();
        SnapshotOutcome { active, removed }
    }

    /// Adds a placeholder for a task first seen through an event. Returns
    /// false when the id is already cached.
    pub fn insert_placeholder(&mut self, task_id: &str, status: TaskStatus) -> bool {
        if self.contains(task_id) {
            return false;
        }
        self.order.push(task_id.to_string());
        self.tasks
            .insert(task_id.to_string(), TaskRecord::placeholder(task_id, status));
        true
    }

    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) -> StatusPatch {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return StatusPatch::Missing;
        };
        if !task.status.can_transition_to(status) {
            return StatusPatch::Rejected { current: task.status };
        }
        let previous = task.status;
        task.status = status;
        StatusPatch::Applied { previous }
    }

    /// Appends to the task's log sequence. Returns false for unknown ids.
    pub fn append_log(&mut self, task_id: &str, entry: LogEntry) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        task.logs.push(entry);
        if task.logs.len() > self.limits.max {
            let drop = task.logs.len().saturating_sub(self.limits.keep);
            task.logs.drain(..drop);
            debug!("Trimmed {drop} log entries of task {task_id}");
        }
        true
    }

    pub fn set_progress(&mut self, task_id: &str, progress: Progress) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(task) => {
                task.progress = Some(progress);
                true
            }
            None => false,
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.iter()
            .filter(|t| t.status.is_active())
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.len(),
            ..TaskStats::default()
        };
        for task in self.iter() {
            match task.status {
                TaskStatus::Running | TaskStatus::Starting => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Error => stats.error += 1,
                _ => {}
            }
        }
        stats
    }
}
