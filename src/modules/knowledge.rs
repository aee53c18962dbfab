use log::{info, warn};

use crate::modules::api::{ApiError, KnowledgeApi};
use crate::modules::notice::Notice;
use crate::modules::types::{FileEntry, KnowledgeBase};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub succeeded: usize,
    pub failed: usize,
    /// First document id returned per upload, collected only when parsing.
    pub doc_ids: Vec<String>,
    pub parse: Option<Result<String, String>>,
}

impl UploadReport {
    pub fn notice(&self, kb: &KnowledgeBase, parse_requested: bool) -> Notice {
        if self.failed == 0 {
            let action = match (parse_requested, self.doc_ids.is_empty()) {
                (false, _) => "uploaded",
                (true, false) => "uploaded and queued for parsing",
                (true, true) => "uploaded, nothing to parse",
            };
            return Notice::success(format!(
                "All {} files {action} to knowledge base \"{}\"",
                self.succeeded, kb.name
            ));
        }
        let parse_note = if parse_requested { ", some files queued for parsing" } else { "" };
        Notice::warning(format!(
            "Upload finished: {} succeeded, {} failed{parse_note}",
            self.succeeded, self.failed
        ))
    }
}

/// Uploads `files` one at a time, then optionally asks the service to
/// parse what was uploaded. `on_step` sees (done, total, file name).
pub async fn upload_batch<A: KnowledgeApi>(
    api: &A,
    kb: &KnowledgeBase,
    files: &[FileEntry],
    parse: bool,
    mut on_step: impl FnMut(usize, usize, &str),
) -> UploadReport {
    let mut report = UploadReport::default();
    for (index, file) in files.iter().enumerate() {
        on_step(index + 1, files.len(), &file.name);
        match api.upload_to_knowledge_base(&kb.id, &file.path, &file.name).await {
            Ok(docs) => {
                report.succeeded += 1;
                if parse {
                    report.doc_ids.extend(docs.into_iter().next().map(|doc| doc.id));
                }
            }
            Err(err) => {
                report.failed += 1;
                warn!("Upload of {} to {} failed: {err}", file.name, kb.name);
            }
        }
    }

    if parse && !report.doc_ids.is_empty() {
        let result = api.parse_documents(&report.doc_ids).await;
        if let Err(err) = &result {
            warn!("Parsing {} documents failed: {err}", report.doc_ids.len());
        }
        report.parse = Some(result.map_err(|err: ApiError| err.to_string()));
    }
    info!(
        "Knowledge base upload to {}: {} ok, {} failed",
        kb.name, report.succeeded, report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::modules::notice::NoticeLevel;
    use crate::modules::types::UploadedDoc;

    #[derive(Default)]
    struct FakeKb {
        parsed: RefCell<Vec<Vec<String>>>,
    }

    impl KnowledgeApi for FakeKb {
        async fn knowledge_bases(&self) -> Result<Vec<KnowledgeBase>, ApiError> {
            Ok(Vec::new())
        }

        async fn upload_to_knowledge_base(
            &self,
            _kb_id: &str,
            _file_path: &str,
            file_name: &str,
        ) -> Result<Vec<UploadedDoc>, ApiError> {
            if file_name.starts_with("bad") {
                return Err(ApiError::Rejected("unsupported".into()));
            }
            Ok(vec![UploadedDoc { id: format!("doc-{file_name}") }])
        }

        async fn parse_documents(&self, doc_ids: &[String]) -> Result<String, ApiError> {
            self.parsed.borrow_mut().push(doc_ids.to_vec());
            Ok("parsing".into())
        }
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase { id: "kb1".into(), name: "Rules".into(), doc_num: 0 }
    }

    fn file(name: &str) -> FileEntry {
        FileEntry {
            name: name.into(),
            path: format!("mem/{name}"),
            size: 1,
            mtime: String::new(),
            kind: String::new(),
        }
    }

    #[tokio::test]
    async fn counts_failures_and_parses_successes() {
        let api = FakeKb::default();
        let mut steps = Vec::new();
        let files = [file("a.pdf"), file("bad.exe"), file("b.pdf")];
        let report = upload_batch(&api, &kb(), &files, true, |done, total, _| {
            steps.push((done, total))
        })
        .await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(steps, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(
            *api.parsed.borrow(),
            vec![vec!["doc-a.pdf".to_string(), "doc-b.pdf".to_string()]]
        );
        assert_eq!(report.notice(&kb(), true).level, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn no_parse_without_request() {
        let api = FakeKb::default();
        let report = upload_batch(&api, &kb(), &[file("a.pdf")], false, |_, _, _| {}).await;
        assert!(report.doc_ids.is_empty());
        assert!(report.parse.is_none());
        assert!(api.parsed.borrow().is_empty());
        let notice = report.notice(&kb(), false);
        assert_eq!(notice.level, NoticeLevel::Success);
        assert_eq!(notice.message, "All 1 files uploaded to knowledge base \"Rules\"");
    }
}
