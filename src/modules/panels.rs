use log::warn;

use crate::modules::api::{ApiError, ArchiveApi};
use crate::modules::types::{DirNode, FileEntry, LogFileInfo, SummaryInfo};

/// Something a panel search box can match against.
pub trait Searchable {
    fn search_key(&self) -> &str;

    fn matches(&self, term: &str) -> bool {
        let term = term.trim();
        term.is_empty() || self.search_key().to_lowercase().contains(&term.to_lowercase())
    }
}

impl Searchable for SummaryInfo {
    fn search_key(&self) -> &str {
        &self.task_id
    }
}

/// Log file names carry the task id, e.g. `crawler_<task id>.log`.
impl Searchable for LogFileInfo {
    fn search_key(&self) -> &str {
        &self.name
    }
}

/// Case-insensitive substring filter. An empty term keeps everything.
pub fn filter<'a, T: Searchable>(items: &'a [T], term: &str) -> Vec<&'a T> {
    items.iter().filter(|item| item.matches(term)).collect()
}

/// Depth-first lookup of a directory node by its path.
pub fn find_by_path<'a>(nodes: &'a [DirNode], path: &str) -> Option<&'a DirNode> {
    for node in nodes {
        if node.path == path {
            return Some(node);
        }
        if let Some(found) = find_by_path(&node.children, path) {
            return Some(found);
        }
    }
    None
}

/// Lists the files under `dir` once the directory tree confirms it exists.
/// `Ok(None)` means there is no such directory and no listing was requested.
pub async fn list_dir_files<A: ArchiveApi>(
    api: &A,
    dir: &str,
) -> Result<Option<Vec<FileEntry>>, ApiError> {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        return api.list_files(None).await.map(Some);
    }
    let tree = api.dir_tree().await?;
    let Some(node) = find_by_path(&tree, dir) else {
        warn!("Directory {dir} is not in the archive tree");
        return Ok(None);
    };
    api.list_files(Some(&node.path)).await.map(Some)
}

/// Indented listing of the tree, one directory per line.
pub fn tree_lines(nodes: &[DirNode]) -> Vec<String> {
    fn walk(nodes: &[DirNode], depth: usize, out: &mut Vec<String>) {
        for node in nodes {
            out.push(format!("{}{}  ({})", "  ".repeat(depth), node.name, node.path));
            walk(&node.children, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(nodes, 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::modules::types::Document;

    fn node(name: &str, path: &str, children: Vec<DirNode>) -> DirNode {
        DirNode { name: name.into(), path: path.into(), children }
    }

    fn tree() -> Vec<DirNode> {
        vec![
            node(
                "mem",
                "mem",
                vec![node("gz", "mem/gz", vec![node("2025", "mem/gz/2025", vec![])])],
            ),
            node("flk", "flk", vec![]),
        ]
    }

    #[test]
    fn finds_nested_nodes_depth_first() {
        let tree = tree();
        assert_eq!(find_by_path(&tree, "mem/gz/2025").map(|n| n.name.as_str()), Some("2025"));
        assert_eq!(find_by_path(&tree, "flk").map(|n| n.children.len()), Some(0));
        assert!(find_by_path(&tree, "mem/xx").is_none());
    }

    #[derive(Default)]
    struct FakeArchive {
        listed: RefCell<Vec<Option<String>>>,
    }

    impl ArchiveApi for FakeArchive {
        async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileEntry>, ApiError> {
            self.listed.borrow_mut().push(dir.map(str::to_string));
            Ok(Vec::new())
        }

        async fn download_file(&self, _path: &str) -> Result<Vec<u8>, ApiError> {
            unimplemented!()
        }

        async fn download_all(&self) -> Result<Vec<u8>, ApiError> {
            unimplemented!()
        }

        async fn dir_tree(&self) -> Result<Vec<DirNode>, ApiError> {
            Ok(tree())
        }

        async fn list_logs(&self) -> Result<Vec<LogFileInfo>, ApiError> {
            unimplemented!()
        }

        async fn log_content(&self, _name: &str) -> Result<Document, ApiError> {
            unimplemented!()
        }

        async fn delete_log(&self, _name: &str) -> Result<String, ApiError> {
            unimplemented!()
        }

        async fn list_summaries(&self) -> Result<Vec<SummaryInfo>, ApiError> {
            unimplemented!()
        }

        async fn summary_content(&self, _task_id: &str) -> Result<Document, ApiError> {
            unimplemented!()
        }

        async fn delete_summary(&self, _task_id: &str) -> Result<String, ApiError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn dir_listing_checks_the_tree_first() {
        let api = FakeArchive::default();
        assert!(list_dir_files(&api, "mem/gz/").await.unwrap().is_some());
        assert!(list_dir_files(&api, "mem/nope").await.unwrap().is_none());
        assert!(list_dir_files(&api, "/").await.unwrap().is_some());
        assert_eq!(*api.listed.borrow(), vec![Some("mem/gz".to_string()), None]);
    }

    #[test]
    fn tree_lines_indent_by_depth() {
        assert_eq!(
            tree_lines(&tree()),
            vec!["mem  (mem)", "  gz  (mem/gz)", "    2025  (mem/gz/2025)", "flk  (flk)"]
        );
    }

    #[test]
    fn summary_search_is_case_insensitive_on_task_id() {
        let summaries = vec![
            SummaryInfo {
                task_id: "Task-ABC".into(),
                crawler_name: "Rules".into(),
                end_time: None,
                save_time: None,
            },
            SummaryInfo {
                task_id: "task-xyz".into(),
                crawler_name: "abc".into(),
                end_time: None,
                save_time: None,
            },
        ];
        let hits = filter(&summaries, "abc");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id, "Task-ABC");
        assert_eq!(filter(&summaries, "  ").len(), 2);
    }

    #[test]
    fn log_search_matches_file_name() {
        let logs = vec![
            LogFileInfo { name: "crawler_ab12.log".into(), size: 1, mtime: String::new() },
            LogFileInfo { name: "crawler_cd34.log".into(), size: 1, mtime: String::new() },
        ];
        assert_eq!(filter(&logs, "CD34").len(), 1);
    }
}
