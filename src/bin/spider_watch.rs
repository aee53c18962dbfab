use std::error::Error;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use futures_util::StreamExt;
use futures_util::future::LocalBoxFuture;
use futures_util::stream::FuturesUnordered;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};

use spider_panel::modules::api::{ApiError, ArchiveApi, HttpApi, TaskApi};
use spider_panel::modules::cache::TaskCache;
use spider_panel::modules::channel::{PushChannel, socket_endpoint};
use spider_panel::modules::config::{Feature, Layout, PanelConfig, init_logger, load_config};
use spider_panel::modules::dispatcher::{CommandDispatcher, Controls, TaskForm};
use spider_panel::modules::events::RoomCommand;
use spider_panel::modules::notice::Notice;
use spider_panel::modules::panels::{filter, list_dir_files};
use spider_panel::modules::render::{draw_board, file_row};
use spider_panel::modules::types::{FileEntry, SummaryInfo, TaskRecord};
use spider_panel::modules::view_model::{Effect, RefreshTicket, TaskViewModel};

const REDRAW_EVERY: Duration = Duration::from_millis(250);

const HELP: &str = "\
commands:
  start <type> [max_pages] [page_url]   create a task (type `custom` needs a page url)
  stop <id>                             stop a running task
  stop-all                              stop every running task
  delete <id>                           delete a finished task
  detail <id> | close                   open or close the detail view
  files [dir]                           list downloaded files
  summaries [search]                    list task summaries
  refresh                               reload everything
  quit
task ids may be abbreviated to any unique prefix";

#[derive(Parser)]
#[command(name = "spider_watch", version, about = "Live control panel for the crawler service")]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = "./panel.toml")]
    config: String,

    #[arg(short = 's', long = "server")]
    server: Option<String>,

    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,

    #[arg(long = "layout", value_enum)]
    layout: Option<Layout>,
}

/// Result of an in-flight request or timer.
enum Outcome {
    Effects(Vec<Effect>),
    Snapshot(RefreshTicket, Result<Vec<TaskRecord>, ApiError>),
    Files { show: bool, result: Result<Vec<FileEntry>, ApiError> },
    Summaries { search: Option<String>, result: Result<Vec<SummaryInfo>, ApiError> },
    RejoinActive,
}

/// A destructive command waiting for y/N.
enum Confirmation {
    Stop { task_id: String, from_detail: bool },
    StopAll(Vec<String>),
    Delete(String),
}

impl Confirmation {
    fn prompt(&self) -> String {
        match self {
            Confirmation::Stop { task_id, .. } => format!("Stop task {task_id}?"),
            Confirmation::StopAll(ids) => format!("Stop all {} running tasks?", ids.len()),
            Confirmation::Delete(task_id) => format!("Delete task {task_id}?"),
        }
    }
}

struct Watch {
    vm: TaskViewModel,
    api: HttpApi,
    dispatcher: Rc<CommandDispatcher<HttpApi>>,
    commands: mpsc::UnboundedSender<RoomCommand>,
    pending: FuturesUnordered<LocalBoxFuture<'static, Outcome>>,
    confirmation: Option<Confirmation>,
    files: usize,
    summaries: usize,
    dirty: bool,
}

/// The task named by `prefix`: an exact id, or the only id starting with it.
fn resolve(cache: &TaskCache, prefix: &str) -> Option<String> {
    if cache.contains(prefix) {
        return Some(prefix.to_string());
    }
    let mut hits = cache.iter().filter(|t| t.task_id.starts_with(prefix));
    match (hits.next(), hits.next()) {
        (Some(task), None) => Some(task.task_id.clone()),
        _ => None,
    }
}

impl Watch {
    fn notify(&self, notice: Notice) {
        notice.log();
        println!("{notice}");
    }

    fn spawn(&mut self, future: impl Future<Output = Outcome> + 'static) {
        self.pending.push(Box::pin(future));
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(command) => {
                    if self.commands.send(command).is_err() {
                        warn!("Push channel is gone, room join dropped");
                    }
                }
                Effect::RejoinActiveAfter(delay) => self.spawn(async move {
                    sleep(delay).await;
                    Outcome::RejoinActive
                }),
                Effect::RefreshTasks => {
                    let ticket = self.vm.begin_refresh();
                    let api = self.api.clone();
                    self.spawn(async move { Outcome::Snapshot(ticket, api.list_tasks().await) });
                }
                Effect::RefreshFiles => self.refresh_files(None, false),
                Effect::RefreshSummaries { after } => self.refresh_summaries(after, None),
                Effect::Notify(notice) => self.notify(notice),
                Effect::DetailLog(entry) => println!("  {entry}"),
                Effect::DetailProgress(_) | Effect::Redraw => self.dirty = true,
                Effect::TaskCreated(task_id) => {
                    let effects = self.vm.task_created(&task_id);
                    self.apply(effects);
                }
                Effect::CloseDetail => {
                    let effects = self.vm.close_detail();
                    self.apply(effects);
                }
            }
        }
    }

    fn refresh_files(&mut self, dir: Option<String>, show: bool) {
        if !self.vm.features().has(Feature::Files) {
            return;
        }
        let api = self.api.clone();
        self.spawn(async move {
            let Some(dir) = dir else {
                return Outcome::Files { show, result: api.list_files(None).await };
            };
            match list_dir_files(&api, &dir).await {
                Ok(Some(files)) => Outcome::Files { show, result: Ok(files) },
                Ok(None) => Outcome::Effects(vec![Effect::Notify(Notice::warning(format!(
                    "No directory {dir} in the archive"
                )))]),
                Err(err) => Outcome::Files { show, result: Err(err) },
            }
        });
    }

    fn refresh_summaries(&mut self, after: Duration, search: Option<String>) {
        if !self.vm.features().has(Feature::Summaries) {
            return;
        }
        let api = self.api.clone();
        self.spawn(async move {
            sleep(after).await;
            let result = api.list_summaries().await;
            Outcome::Summaries { search, result }
        });
    }

    fn settle(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Effects(effects) => {
                self.dirty = true;
                self.apply(effects);
            }
            Outcome::Snapshot(ticket, Ok(tasks)) => {
                let effects = self.vm.apply_snapshot(ticket, tasks);
                self.apply(effects);
            }
            Outcome::Snapshot(_, Err(err)) => {
                warn!("Task list refresh failed: {err}");
                if !err.is_network() {
                    self.notify(Notice::error(format!("Cannot load tasks: {err}")));
                }
            }
            Outcome::Files { show, result: Ok(files) } => {
                self.files = files.len();
                self.dirty = true;
                if show {
                    for file in &files {
                        println!("{}", file_row(file));
                    }
                    println!("{} files", files.len());
                }
            }
            Outcome::Summaries { search, result: Ok(summaries) } => {
                self.summaries = summaries.len();
                self.dirty = true;
                if let Some(search) = search {
                    for summary in filter(&summaries, &search) {
                        println!("{}  {}", summary.task_id, summary.crawler_name);
                    }
                }
            }
            Outcome::Files { result: Err(err), .. }
            | Outcome::Summaries { result: Err(err), .. } => {
                warn!("Panel refresh failed: {err}");
            }
            Outcome::RejoinActive => {
                let effects = self.vm.rejoin_active();
                self.apply(effects);
            }
        }
    }

    fn run_confirmed(&mut self, confirmation: Confirmation) {
        let dispatcher = self.dispatcher.clone();
        match confirmation {
            Confirmation::Stop { task_id, from_detail } => self.spawn(async move {
                Outcome::Effects(dispatcher.stop_task(&task_id, from_detail, |_| true).await)
            }),
            Confirmation::StopAll(ids) => self.spawn(async move {
                Outcome::Effects(dispatcher.stop_all(ids, |_| true).await)
            }),
            Confirmation::Delete(task_id) => self.spawn(async move {
                Outcome::Effects(dispatcher.delete_task(&task_id, |_| true).await)
            }),
        }
        self.dirty = true;
    }

    fn ask(&mut self, confirmation: Confirmation) {
        println!("{} [y/N]", confirmation.prompt());
        self.confirmation = Some(confirmation);
    }

    fn task_arg(&self, arg: Option<&str>) -> Option<String> {
        let Some(prefix) = arg else {
            self.notify(Notice::warning("A task id is required"));
            return None;
        };
        let resolved = resolve(self.vm.cache(), prefix);
        if resolved.is_none() {
            self.notify(Notice::warning(format!("No single task matches {prefix}")));
        }
        resolved
    }

    /// Handles one stdin line. Returns false on `quit`.
    fn command(&mut self, line: &str) -> bool {
        if let Some(confirmation) = self.confirmation.take() {
            if matches!(line.trim(), "y" | "Y" | "yes") {
                self.run_confirmed(confirmation);
            } else {
                println!("Cancelled.");
            }
            return true;
        }

        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return true;
        };
        match verb {
            "start" => {
                if !self.vm.is_connected() {
                    self.notify(Notice::error("System not connected, cannot start a task"));
                    return true;
                }
                let Some(crawler_type) = words.next() else {
                    self.notify(Notice::warning("Select a crawler type"));
                    return true;
                };
                let mut form =
                    TaskForm { crawler_type: crawler_type.to_string(), ..TaskForm::default() };
                let mut url = Vec::new();
                for word in words {
                    match word.parse::<u32>() {
                        Ok(n) if form.max_pages.is_none() && url.is_empty() => {
                            form.max_pages = Some(n)
                        }
                        _ => url.push(word),
                    }
                }
                form.page_url = url.join(" ");
                let dispatcher = self.dispatcher.clone();
                self.spawn(async move { Outcome::Effects(dispatcher.create_task(&form).await) });
                self.dirty = true;
            }
            "stop" => {
                if let Some(task_id) = self.task_arg(words.next()) {
                    let from_detail = self.vm.detail_task() == Some(task_id.as_str());
                    self.ask(Confirmation::Stop { task_id, from_detail });
                }
            }
            "stop-all" => {
                let running = self.vm.cache().running_ids();
                if running.is_empty() {
                    let dispatcher = self.dispatcher.clone();
                    self.spawn(async move {
                        Outcome::Effects(dispatcher.stop_all(running, |_| true).await)
                    });
                } else {
                    self.ask(Confirmation::StopAll(running));
                }
            }
            "delete" => {
                if let Some(task_id) = self.task_arg(words.next()) {
                    self.ask(Confirmation::Delete(task_id));
                }
            }
            "detail" => {
                if let Some(task_id) = self.task_arg(words.next()) {
                    let effects = self.vm.open_detail(&task_id);
                    self.apply(effects);
                }
            }
            "close" => {
                let effects = self.vm.close_detail();
                self.apply(effects);
            }
            "files" => self.refresh_files(words.next().map(str::to_string), true),
            "summaries" => {
                let search = words.next().unwrap_or_default().to_string();
                self.refresh_summaries(Duration::ZERO, Some(search));
            }
            "refresh" => {
                self.apply(vec![
                    Effect::RefreshTasks,
                    Effect::RefreshFiles,
                    Effect::RefreshSummaries { after: Duration::ZERO },
                ]);
            }
            "quit" | "exit" => return false,
            "help" => println!("{HELP}"),
            other => println!("Unknown command {other:?}, try `help`"),
        }
        true
    }

    fn draw(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let mut text = draw_board(&self.vm, self.dispatcher.controls());
        let features = self.vm.features();
        if features.has(Feature::Files) {
            text.push_str(&format!("files: {}\n", self.files));
        }
        if features.has(Feature::Summaries) {
            text.push_str(&format!("summaries: {}\n", self.summaries));
        }
        println!("{}\n{text}", "=".repeat(60));
    }
}


#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config: PanelConfig = load_config(&cli.config)?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = log_file;
    }
    if let Some(layout) = cli.layout {
        config.layout = layout;
    }
    config.validate()?;
    init_logger(Path::new(&config.log_file), config.level_filter()?)?;

    let api = HttpApi::new(&config.server_url, config.timing.request_timeout())?;
    let endpoint = socket_endpoint(api.base())?;
    info!("Watching {} (push channel {endpoint})", config.server_url);
    let mut channel = PushChannel::spawn(endpoint);

    let dispatcher = Rc::new(CommandDispatcher::new(
        api.clone(),
        Controls::default(),
        config.default_max_pages,
    ));
    let mut watch = Watch {
        vm: TaskViewModel::new(&config),
        api,
        dispatcher,
        commands: channel.commands.clone(),
        pending: FuturesUnordered::new(),
        confirmation: None,
        files: 0,
        summaries: 0,
        dirty: true,
    };
    watch.apply(vec![Effect::RefreshFiles, Effect::RefreshSummaries { after: Duration::ZERO }]);
    println!("{HELP}");

    let mut refresh = interval(config.timing.refresh_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut redraw = interval(REDRAW_EVERY);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = channel.events.recv() => {
                let effects = watch.vm.handle(event);
                watch.apply(effects);
            }
            Some(outcome) = watch.pending.next(), if !watch.pending.is_empty() => {
                watch.settle(outcome)
            }
            _ = refresh.tick() => watch.apply(vec![Effect::RefreshTasks]),
            _ = redraw.tick() => watch.draw(),
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if !watch.command(&line) {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    info!("Panel closed");
    Ok(())
}
