use derive_more::with_trait::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle of a crawler task as reported by the service.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[display("starting")]
    Starting,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("error")]
    Error,
    #[display("stopping")]
    Stopping,
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BadgeStyle {
    #[display("info")]
    Info,
    #[display("success")]
    Success,
    #[display("secondary")]
    Secondary,
    #[display("danger")]
    Danger,
    #[display("warning")]
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("{label}")]
pub struct Badge {
    pub label: &'static str,
    pub style: BadgeStyle,
}

impl TaskStatus {
    /// Running or about to run; these tasks get a per-task subscription.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Starting)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    pub fn can_stop(self) -> bool {
        self == TaskStatus::Running
    }

    pub fn can_delete(self) -> bool {
        self.is_finished()
    }

    /// Whether a pushed status change from `self` to `next` is expected.
    /// Repeating the current status is always accepted.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Unknown) => false,
            (Unknown, _) => true,
            (Starting, Running | Completed | Error | Stopping) => true,
            (Running, Stopping | Completed | Error) => true,
            (Stopping, Completed | Error) => true,
            _ => false,
        }
    }

    pub fn badge(self) -> Badge {
        let (label, style) = match self {
            TaskStatus::Starting => ("starting", BadgeStyle::Info),
            TaskStatus::Running => ("running", BadgeStyle::Success),
            TaskStatus::Completed => ("completed", BadgeStyle::Secondary),
            TaskStatus::Error => ("error", BadgeStyle::Danger),
            TaskStatus::Stopping => ("stopping", BadgeStyle::Warning),
            TaskStatus::Unknown => ("unknown", BadgeStyle::Secondary),
        };
        Badge { label, style }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Completed));
        assert!(Running.can_transition_to(Error));
        assert!(Running.can_transition_to(Running));
    }

    #[test]
    fn backward_and_unknown_transitions_are_rejected() {
        assert!(!Completed.can_transition_to(Running));
        assert!(!Error.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Running.can_transition_to(Unknown));
        assert!(Unknown.can_transition_to(Running));
    }

    #[test]
    fn badge_table_covers_every_status() {
        assert_eq!(Running.badge().style, BadgeStyle::Success);
        assert_eq!(Error.badge().style, BadgeStyle::Danger);
        assert_eq!(Unknown.badge().label, "unknown");
        assert_eq!(Stopping.to_string(), "stopping");
    }

    #[test]
    fn action_rules() {
        assert!(Running.can_stop());
        assert!(!Starting.can_stop());
        assert!(Completed.can_delete() && Error.can_delete());
        assert!(!Running.can_delete());
        assert!(Starting.is_active() && !Stopping.is_active());
    }
}
