//! Status state machines for tasks and meetings.
//!
//! # Invariants
//! - Legal edges are listed explicitly per kind; anything else is rejected.
//! - Terminal statuses (`done`, `completed`) have no outgoing edges.
//! - Re-asserting the current status is not an edge and is always accepted.

use serde::{Deserialize, Serialize};

/// Task board lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    /// Terminal for this engine. Reopening is not a side-effect edge.
    Done,
}

/// Meeting workflow lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Planned,
    Ongoing,
    Completed,
}

/// Status value attached to an item, tagged by the machine it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Task(TaskStatus),
    Meeting(MeetingStatus),
}

impl TaskStatus {
    pub fn allowed_transitions(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Todo => &[InProgress],
            InProgress => &[Todo, Review],
            Review => &[InProgress, Done],
            Done => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl MeetingStatus {
    pub fn allowed_transitions(self) -> &'static [MeetingStatus] {
        use MeetingStatus::*;
        match self {
            Planned => &[Ongoing],
            Ongoing => &[Completed],
            Completed => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "planned" => Some(Self::Planned),
            "ongoing" => Some(Self::Ongoing),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl Status {
    /// Returns whether moving from `self` to `next` is legal.
    ///
    /// Same-status requests return `true`; cross-machine requests return
    /// `false`.
    pub fn can_transition_to(self, next: Status) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Status::Task(from), Status::Task(to)) => from.allowed_transitions().contains(&to),
            (Status::Meeting(from), Status::Meeting(to)) => {
                from.allowed_transitions().contains(&to)
            }
            _ => false,
        }
    }

    /// Terminal status of each machine; entering it fires workflow hooks.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Task(TaskStatus::Done) | Status::Meeting(MeetingStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Task(status) => status.as_str(),
            Status::Meeting(status) => status.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MeetingStatus, Status, TaskStatus};

    #[test]
    fn meeting_cannot_skip_ongoing() {
        let planned = Status::Meeting(MeetingStatus::Planned);
        assert!(planned.can_transition_to(Status::Meeting(MeetingStatus::Ongoing)));
        assert!(!planned.can_transition_to(Status::Meeting(MeetingStatus::Completed)));
    }

    #[test]
    fn review_can_return_to_in_progress() {
        let review = Status::Task(TaskStatus::Review);
        assert!(review.can_transition_to(Status::Task(TaskStatus::InProgress)));
        assert!(review.can_transition_to(Status::Task(TaskStatus::Done)));
        assert!(!Status::Task(TaskStatus::Todo).can_transition_to(Status::Task(TaskStatus::Done)));
    }

    #[test]
    fn terminal_statuses_have_no_exit() {
        assert!(TaskStatus::Done.allowed_transitions().is_empty());
        assert!(MeetingStatus::Completed.allowed_transitions().is_empty());
        let done = Status::Task(TaskStatus::Done);
        assert!(done.is_terminal());
        assert!(done.can_transition_to(done));
        assert!(!done.can_transition_to(Status::Task(TaskStatus::Review)));
    }

    #[test]
    fn cross_machine_transition_is_rejected() {
        let todo = Status::Task(TaskStatus::Todo);
        assert!(!todo.can_transition_to(Status::Meeting(MeetingStatus::Planned)));
    }

    #[test]
    fn status_serializes_with_machine_tag() {
        let json = serde_json::to_value(Status::Task(TaskStatus::InProgress)).unwrap();
        assert_eq!(json, serde_json::json!({"task": "in_progress"}));
        assert_eq!(TaskStatus::parse("review"), Some(TaskStatus::Review));
        assert_eq!(MeetingStatus::parse("finished"), None);
    }
}
