use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use spider_panel::modules::api::{ArchiveApi, HttpApi, KnowledgeApi, TaskApi};
use spider_panel::modules::config::{Feature, PanelConfig, init_logger, load_config};
use spider_panel::modules::dispatcher::{CommandDispatcher, Controls, TaskForm};
use spider_panel::modules::knowledge::upload_batch;
use spider_panel::modules::notice::{Notice, NoticeLevel};
use spider_panel::modules::panels::{filter, list_dir_files, tree_lines};
use spider_panel::modules::render::{
    draw_detail, draw_task_list, file_row, format_file_size, stats_line,
};
use spider_panel::modules::view_model::{Effect, TaskViewModel};

#[derive(Parser)]
#[command(
    name = "spider_panel",
    version,
    about = "Command-line control panel for the crawler service"
)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = "./panel.toml")]
    config: String,

    /// Overrides `server_url` from the config file.
    #[arg(short = 's', long = "server")]
    server: Option<String>,

    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,

    /// Answer yes to every confirmation.
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all tasks
    Tasks,
    /// Start a crawler task
    Start {
        crawler_type: String,
        #[arg(short = 'm', long = "max-pages")]
        max_pages: Option<u32>,
        /// Page address, required for the `custom` crawler
        #[arg(short = 'u', long = "page-url", default_value = "")]
        page_url: String,
    },
    Stop { task_id: String },
    /// Stop every running task
    StopAll,
    Delete { task_id: String },
    Detail { task_id: String },
    Files {
        #[arg(short = 'd', long = "dir")]
        dir: Option<String>,
    },
    Download {
        path: String,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    DownloadAll {
        #[arg(short = 'o', long = "output", default_value = "crawled_files.zip")]
        output: PathBuf,
    },
    DirTree,
    /// List crawl log files
    Logs {
        #[arg(short = 'q', long = "search", default_value = "")]
        search: String,
    },
    Log { name: String },
    DeleteLog { name: String },
    Summaries {
        #[arg(short = 'q', long = "search", default_value = "")]
        search: String,
    },
    Summary { task_id: String },
    DeleteSummary { task_id: String },
    /// List knowledge bases
    Kbs,
    /// Upload downloaded files to a knowledge base
    Upload {
        kb_id: String,
        /// Paths as listed by `files`
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(short = 'd', long = "dir")]
        dir: Option<String>,
        /// Ask the service to parse the uploaded documents
        #[arg(short = 'p', long = "parse")]
        parse: bool,
    },
}

impl Command {
    /// The optional panel this command belongs to, if any.
    fn feature(&self) -> Option<Feature> {
        match self {
            Command::Files { .. } | Command::Download { .. } | Command::DownloadAll { .. } => {
                Some(Feature::Files)
            }
            Command::DirTree => Some(Feature::DirTree),
            Command::Logs { .. } | Command::Log { .. } | Command::DeleteLog { .. } => {
                Some(Feature::Logs)
            }
            Command::Summaries { .. } | Command::Summary { .. } | Command::DeleteSummary { .. } => {
                Some(Feature::Summaries)
            }
            Command::Kbs | Command::Upload { .. } => Some(Feature::KnowledgeBase),
            _ => None,
        }
    }
}

fn confirm(prompt: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    print!("{prompt} [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Prints the notices among `effects`; the last error becomes the exit error.
fn report(effects: Vec<Effect>) -> Result<(), Box<dyn Error>> {
    let mut failure = None;
    for effect in effects {
        if let Effect::Notify(notice) = effect {
            notice.log();
            println!("{notice}");
            if notice.level == NoticeLevel::Error {
                failure = Some(notice.message);
            }
        }
    }
    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn print_document(title: &str, content: &str) {
    println!("== {title} ==");
    println!("{content}");
}

async fn save(path: &Path, bytes: Vec<u8>) -> Result<(), Box<dyn Error>> {
    let size = bytes.len() as u64;
    tokio::fs::write(path, bytes).await?;
    info!("Saved {} ({size} bytes)", path.display());
    println!("Saved {} ({})", path.display(), format_file_size(size));
    Ok(())
}

async fn run(cli: Cli, config: PanelConfig, api: HttpApi) -> Result<(), Box<dyn Error>> {
    if let Some(feature) = cli.command.feature().filter(|f| !config.features.has(*f)) {
        warn!("Skipping command, the {feature:?} panel is disabled");
        return report(vec![Effect::Notify(Notice::warning(format!(
            "The {feature:?} panel is disabled in the configuration"
        )))]);
    }
    let yes = cli.yes;
    let dispatcher =
        CommandDispatcher::new(api.clone(), Controls::default(), config.default_max_pages);
    match cli.command {
        Command::Tasks => {
            let mut vm = TaskViewModel::new(&config);
            let ticket = vm.begin_refresh();
            vm.apply_snapshot(ticket, api.list_tasks().await?);
            println!("{}", stats_line(vm.cache().stats()));
            print!("{}", draw_task_list(vm.cache(), dispatcher.controls()));
        }
        Command::Start { crawler_type, max_pages, page_url } => {
            let form = TaskForm { crawler_type, max_pages, page_url };
            report(dispatcher.create_task(&form).await)?;
        }
        Command::Stop { task_id } => {
            report(dispatcher.stop_task(&task_id, false, |p| confirm(p, yes)).await)?;
        }
        Command::StopAll => {
            let mut vm = TaskViewModel::new(&config);
            let ticket = vm.begin_refresh();
            vm.apply_snapshot(ticket, api.list_tasks().await?);
            let running = vm.cache().running_ids();
            report(dispatcher.stop_all(running, |p| confirm(p, yes)).await)?;
        }
        Command::Delete { task_id } => {
            report(dispatcher.delete_task(&task_id, |p| confirm(p, yes)).await)?;
        }
        Command::Detail { task_id } => {
            let task = api.task_detail(&task_id).await?;
            print!("{}", draw_detail(&task, dispatcher.controls()));
        }
        Command::Files { dir } => {
            let files = match dir {
                Some(dir) => match list_dir_files(&api, &dir).await? {
                    Some(files) => files,
                    None => {
                        let notice = Notice::warning(format!("No directory {dir} in the archive"));
                        return report(vec![Effect::Notify(notice)]);
                    }
                },
                None => api.list_files(None).await?,
            };
            if files.is_empty() {
                println!("No files.");
            }
            for file in &files {
                println!("{}", file_row(file));
            }
            println!("{} files", files.len());
        }
        Command::Download { path, output } => {
            let bytes = api.download_file(&path).await?;
            let output = output.unwrap_or_else(|| {
                PathBuf::from(path.rsplit('/').next().unwrap_or(path.as_str()))
            });
            save(&output, bytes).await?;
        }
        Command::DownloadAll { output } => {
            save(&output, api.download_all().await?).await?;
        }
        Command::DirTree => {
            for line in tree_lines(&api.dir_tree().await?) {
                println!("{line}");
            }
        }
        Command::Logs { search } => {
            let logs = api.list_logs().await?;
            for log in filter(&logs, &search) {
                println!("{:<50} {:>10}  {}", log.name, format_file_size(log.size), log.mtime);
            }
        }
        Command::Log { name } => {
            let document = api.log_content(&name).await?;
            print_document(document.name.as_deref().unwrap_or(&name), &document.content);
        }
        Command::DeleteLog { name } => {
            if confirm(&format!("Delete log file {name}?"), yes) {
                let message = api.delete_log(&name).await?;
                report(vec![Effect::Notify(Notice::success(message))])?;
            }
        }
        Command::Summaries { search } => {
            let summaries = api.list_summaries().await?;
            for summary in filter(&summaries, &search) {
                println!(
                    "{:<40} {:<24} ended {}  saved {}",
                    summary.task_id,
                    summary.crawler_name,
                    summary.end_time.as_deref().unwrap_or("N/A"),
                    summary.save_time.as_deref().unwrap_or("N/A"),
                );
            }
        }
        Command::Summary { task_id } => {
            let document = api.summary_content(&task_id).await?;
            print_document(&format!("Summary of {task_id}"), &document.content);
        }
        Command::DeleteSummary { task_id } => {
            if confirm(&format!("Delete the summary of {task_id}?"), yes) {
                let message = api.delete_summary(&task_id).await?;
                report(vec![Effect::Notify(Notice::success(message))])?;
            }
        }
        Command::Kbs => {
            for kb in api.knowledge_bases().await? {
                println!("{:<36} {kb}", kb.id);
            }
        }
        Command::Upload { kb_id, paths, dir, parse } => {
            let kb = api
                .knowledge_bases()
                .await?
                .into_iter()
                .find(|kb| kb.id == kb_id)
                .ok_or_else(|| format!("Unknown knowledge base {kb_id}"))?;
            let listed = api.list_files(dir.as_deref()).await?;
            let mut files = Vec::new();
            for path in &paths {
                match listed.iter().find(|f| &f.path == path) {
                    Some(file) => files.push(file.clone()),
                    None => return Err(format!("No downloaded file at {path}").into()),
                }
            }
            let outcome = upload_batch(&api, &kb, &files, parse, |done, total, name| {
                println!("Uploading {name} ({done}/{total})");
            })
            .await;
            if let Some(Err(message)) = &outcome.parse {
                println!("Parse request failed: {message}");
            }
            report(vec![Effect::Notify(outcome.notice(&kb, parse))])?;
        }
    }
    Ok(())
}


#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(log_file) = &cli.log_file {
        config.log_file = log_file.clone();
    }
    config.validate()?;
    init_logger(Path::new(&config.log_file), config.level_filter()?)?;

    let api = HttpApi::new(&config.server_url, config.timing.request_timeout())?;
    let result = run(cli, config, api).await;
    if let Err(err) = &result {
        error!("{err}");
    }
    result
}
