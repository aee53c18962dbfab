use derive_more::with_trait::Display;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NoticeLevel {
    #[display("ok")]
    Success,
    #[display("warn")]
    Warning,
    #[display("error")]
    Error,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("[{level}] {message}")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }

    /// Mirrors the notice into the log file.
    pub fn log(&self) {
        match self.level {
            NoticeLevel::Success => info!("{}", self.message),
            NoticeLevel::Warning => warn!("{}", self.message),
            NoticeLevel::Error => error!("{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_shows_its_level() {
        assert_eq!(Notice::success("Task started").to_string(), "[ok] Task started");
        assert_eq!(Notice::warning("No running tasks").to_string(), "[warn] No running tasks");
        assert_eq!(Notice::error("Stop failed").level, NoticeLevel::Error);
    }
}
