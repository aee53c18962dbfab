//! Text projection of the view model. Everything here is recomputed from the
//! cache on each draw; no task ids are kept between draws.

use std::fmt::Write;

use derive_more::with_trait::Display;

use crate::modules::cache::{TaskCache, TaskStats};
use crate::modules::dispatcher::{Control, Controls};
use crate::modules::status::{Badge, TaskStatus};
use crate::modules::types::{FileEntry, LogEntry, Progress, TaskRecord};
use crate::modules::view_model::TaskViewModel;

const BAR_WIDTH: usize = 20;
const FILE_NAME_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CardAction {
    #[display("details")]
    Details,
    #[display("stop")]
    Stop,
    #[display("delete")]
    Delete,
}

impl CardAction {
    fn control(self, task_id: &str) -> Option<Control> {
        match self {
            CardAction::Details => None,
            CardAction::Stop => Some(Control::Stop(task_id.to_string())),
            CardAction::Delete => Some(Control::Delete(task_id.to_string())),
        }
    }
}

/// Actions offered for a task in the given status. Details are always
/// available.
pub fn actions_for(status: TaskStatus) -> Vec<CardAction> {
    let mut actions = vec![CardAction::Details];
    if status.can_stop() {
        actions.push(CardAction::Stop);
    }
    if status.can_delete() {
        actions.push(CardAction::Delete);
    }
    actions
}

pub fn progress_text(progress: Option<&Progress>) -> String {
    match progress {
        Some(progress) => progress.to_string(),
        None => "0/0 (0%)".to_string(),
    }
}

/// Fixed-width bar for a percentage already clamped to 0..=100.
pub fn progress_bar(width: f64) -> String {
    let filled = ((width / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskCard {
    pub task_id: String,
    pub title: String,
    pub badge: Badge,
    pub started: String,
    pub duration: String,
    pub progress_width: f64,
    pub progress_text: String,
    pub actions: Vec<CardAction>,
}

impl TaskCard {
    pub fn from_record(task: &TaskRecord) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.crawler_name.clone(),
            badge: task.status.badge(),
            started: task.start_time.clone().unwrap_or_else(|| "N/A".to_string()),
            duration: task.duration.clone().unwrap_or_else(|| "0:00:00".to_string()),
            progress_width: task.progress.map(|p| p.width()).unwrap_or(0.0),
            progress_text: progress_text(task.progress.as_ref()),
            actions: actions_for(task.status),
        }
    }

    fn draw(&self, out: &mut String, controls: &Controls) -> std::fmt::Result {
        let title = if self.title.is_empty() { "(pending)" } else { self.title.as_str() };
        writeln!(out, "{title}  [{}:{}]", self.badge.style, self.badge)?;
        writeln!(out, "  id: {}", self.task_id)?;
        writeln!(out, "  started: {}  duration: {}", self.started, self.duration)?;
        writeln!(out, "  {} {}", progress_bar(self.progress_width), self.progress_text)?;
        let actions: Vec<String> = self
            .actions
            .iter()
            .map(|action| match action.control(&self.task_id) {
                Some(control) if controls.is_disabled(&control) => format!("({action}...)"),
                _ => format!("<{action}>"),
            })
            .collect();
        writeln!(out, "  {}", actions.join(" "))
    }
}

pub fn task_cards(cache: &TaskCache) -> Vec<TaskCard> {
    cache.iter().map(TaskCard::from_record).collect()
}

/// Everything the detail view shows for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub task_id: String,
    pub crawler_name: String,
    pub badge: Badge,
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
    pub max_pages: String,
    pub progress: Progress,
    pub logs: Vec<LogEntry>,
    pub can_stop: bool,
}

impl DetailView {
    pub fn from_record(task: &TaskRecord) -> Self {
        let max_pages = match task.max_pages {
            Some(0) => "unlimited".to_string(),
            Some(n) => n.to_string(),
            None => "10".to_string(),
        };
        Self {
            task_id: task.task_id.clone(),
            crawler_name: task.crawler_name.clone(),
            badge: task.status.badge(),
            start_time: task.start_time.clone().unwrap_or_else(|| "N/A".to_string()),
            end_time: task.end_time.clone().unwrap_or_else(|| "N/A".to_string()),
            duration: task.duration.clone().unwrap_or_else(|| "0:00:00".to_string()),
            max_pages,
            progress: task.progress.unwrap_or_default(),
            logs: task.logs.clone(),
            can_stop: task.status.can_stop(),
        }
    }

    fn draw(&self, out: &mut String, controls: &Controls) -> std::fmt::Result {
        writeln!(out, "== Task {} ==", self.task_id)?;
        writeln!(out, "crawler:   {}", self.crawler_name)?;
        writeln!(out, "status:    [{}:{}]", self.badge.style, self.badge)?;
        writeln!(out, "started:   {}", self.start_time)?;
        writeln!(out, "ended:     {}", self.end_time)?;
        writeln!(out, "duration:  {}", self.duration)?;
        writeln!(out, "max pages: {}", self.max_pages)?;
        writeln!(
            out,
            "progress:  {} {}/{}",
            progress_bar(self.progress.width()),
            self.progress.current,
            self.progress.total
        )?;
        if self.can_stop {
            let control = Control::DetailStop(self.task_id.clone());
            let label = if controls.is_disabled(&control) { "(stopping...)" } else { "<stop>" };
            writeln!(out, "{label}")?;
        }
        writeln!(out, "-- log ({} entries) --", self.logs.len())?;
        for entry in &self.logs {
            writeln!(out, "{entry}")?;
        }
        Ok(())
    }
}

pub fn stats_line(stats: TaskStats) -> String {
    format!(
        "total {}  running {}  completed {}  error {}",
        stats.total, stats.running, stats.completed, stats.error
    )
}

pub fn header(connected: bool, stats: TaskStats) -> String {
    let link = if connected { "connected" } else { "disconnected" };
    format!("spider panel [{link}]  {}", stats_line(stats))
}

/// Full board: header, task cards and, when open, the detail view.
pub fn draw_board(vm: &TaskViewModel, controls: &Controls) -> String {
    let mut out = String::new();
    out.push_str(&header(vm.is_connected(), vm.cache().stats()));
    out.push('\n');
    out.push_str(&draw_task_list(vm.cache(), controls));
    if let Some(task) = vm.detail_task().and_then(|id| vm.cache().get(id)) {
        out.push_str(&draw_detail(task, controls));
    }
    out
}

/// Task cards in cache order, preceded by any in-flight batch operation.
pub fn draw_task_list(cache: &TaskCache, controls: &Controls) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_task_list(&mut out, cache, controls);
    out
}

fn write_task_list(out: &mut String, cache: &TaskCache, controls: &Controls) -> std::fmt::Result {
    if controls.is_disabled(&Control::Start) {
        writeln!(out, "(creating task...)")?;
    }
    if controls.is_disabled(&Control::StopAll) {
        writeln!(out, "(stopping all...)")?;
    }
    writeln!(out)?;
    if cache.is_empty() {
        writeln!(out, "No tasks yet.")?;
    }
    for card in task_cards(cache) {
        card.draw(out, controls)?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn draw_detail(task: &TaskRecord, controls: &Controls) -> String {
    let mut out = String::new();
    let _ = DetailView::from_record(task).draw(&mut out, controls);
    out
}

/// Human-readable size with 1024 steps, trailing zeros dropped.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", UNITS[unit])
}

/// Cuts `text` to `max_chars` characters, marking the cut with `...`.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Source family of a downloaded file, from its type label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FileBadge {
    #[display("emergency")]
    Emergency,
    #[display("regulation")]
    Regulation,
    #[display("custom")]
    Custom,
    #[display("other")]
    Other,
}

impl FileBadge {
    pub fn of(kind: &str) -> Self {
        if kind.starts_with("应急部-") {
            FileBadge::Emergency
        } else if kind.starts_with("法规库-") {
            FileBadge::Regulation
        } else if kind == "自定义页面" {
            FileBadge::Custom
        } else {
            FileBadge::Other
        }
    }
}

pub fn file_row(file: &FileEntry) -> String {
    format!(
        "{:<43} [{}:{}] {:>10}  {}",
        truncate_text(&file.name, FILE_NAME_WIDTH),
        FileBadge::of(&file.kind),
        file.kind,
        format_file_size(file.size),
        file.mtime
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::LogLimits;
    use crate::modules::config::PanelConfig;
    use crate::modules::status::BadgeStyle;

    fn record(status: TaskStatus) -> TaskRecord {
        TaskRecord {
            crawler_name: "Rules".into(),
            ..TaskRecord::placeholder("t1", status)
        }
    }

    #[test]
    fn actions_follow_status() {
        assert_eq!(actions_for(TaskStatus::Running), vec![CardAction::Details, CardAction::Stop]);
        assert_eq!(actions_for(TaskStatus::Error), vec![CardAction::Details, CardAction::Delete]);
        assert_eq!(actions_for(TaskStatus::Stopping), vec![CardAction::Details]);
        assert_eq!(actions_for(TaskStatus::Starting), vec![CardAction::Details]);
    }

    #[test]
    fn card_uses_fallbacks_without_progress() {
        let card = TaskCard::from_record(&record(TaskStatus::Starting));
        assert_eq!(card.progress_text, "0/0 (0%)");
        assert_eq!(card.progress_width, 0.0);
        assert_eq!(card.started, "N/A");
        assert_eq!(card.duration, "0:00:00");
        assert_eq!(card.badge.style, BadgeStyle::Info);
    }

    #[test]
    fn card_progress_matches_percentage() {
        let mut task = record(TaskStatus::Running);
        task.progress = Some(Progress { current: 5, total: 20, percentage: 25.0 });
        let card = TaskCard::from_record(&task);
        assert_eq!(card.progress_width, 25.0);
        assert_eq!(card.progress_text, "5/20 (25.0%)");
        assert_eq!(
            progress_bar(card.progress_width),
            format!("[{}{}]", "#".repeat(5), "-".repeat(15))
        );
    }

    #[test]
    fn detail_max_pages_labels() {
        let mut task = record(TaskStatus::Completed);
        assert_eq!(DetailView::from_record(&task).max_pages, "10");
        task.max_pages = Some(0);
        assert_eq!(DetailView::from_record(&task).max_pages, "unlimited");
        task.max_pages = Some(50);
        let view = DetailView::from_record(&task);
        assert_eq!(view.max_pages, "50");
        assert_eq!(view.end_time, "N/A");
        assert!(!view.can_stop);
    }

    #[test]
    fn cards_follow_cache_order() {
        let mut cache = TaskCache::new(LogLimits::default());
        cache.replace(vec![
            TaskRecord::placeholder("b", TaskStatus::Running),
            TaskRecord::placeholder("a", TaskStatus::Completed),
        ]);
        let ids: Vec<_> = task_cards(&cache).into_iter().map(|c| c.task_id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn board_marks_locked_controls() {
        let mut vm = TaskViewModel::new(&PanelConfig::default());
        let ticket = vm.begin_refresh();
        vm.apply_snapshot(ticket, vec![record(TaskStatus::Running)]);
        let controls = Controls::default();
        let _guard = controls.lock(Control::Stop("t1".into()));
        let text = draw_board(&vm, &controls);
        assert!(text.contains("[disconnected]"));
        assert!(text.contains("(stop...)"));
        assert!(text.contains("<details>"));
    }

    #[test]
    fn file_sizes_are_humanized() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024 + 10 * 1024), "5.01 MB");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_text("short", 40), "short");
        assert_eq!(truncate_text("生产安全事故报告和调查处理条例", 4), "生产安全...");
    }

    #[test]
    fn file_badges_by_prefix() {
        assert_eq!(FileBadge::of("应急部-规章"), FileBadge::Emergency);
        assert_eq!(FileBadge::of("法规库-行政法规"), FileBadge::Regulation);
        assert_eq!(FileBadge::of("自定义页面"), FileBadge::Custom);
        assert_eq!(FileBadge::of("其他"), FileBadge::Other);
    }
}
