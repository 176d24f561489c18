use serde::{Deserialize, Serialize};

/// Lifecycle status of a task execution as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Completed,
    Working,
    Submitted,
    InputRequired,
    Deferred,
    Failed,
    Rejected,
    Canceled,
}

impl TaskStatus {
    /// Parse a wire status string. Accepts kebab-case and snake_case forms
    /// and the British `cancelled` spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "completed" => Some(Self::Completed),
            "working" => Some(Self::Working),
            "submitted" => Some(Self::Submitted),
            "input-required" => Some(Self::InputRequired),
            "deferred" => Some(Self::Deferred),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Working => "working",
            Self::Submitted => "submitted",
            Self::InputRequired => "input-required",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Canceled
        )
    }

    /// Waiting on the caller rather than on the agent.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::InputRequired | Self::Deferred)
    }

    /// Statuses that `normalize` refuses to extract a payload from.
    pub fn is_intermediate(&self) -> bool {
        matches!(self, Self::Working | Self::Submitted | Self::InputRequired)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Rejected | Self::Canceled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_wire_variants() {
        assert_eq!(TaskStatus::parse("input-required"), Some(TaskStatus::InputRequired));
        assert_eq!(TaskStatus::parse("input_required"), Some(TaskStatus::InputRequired));
        assert_eq!(TaskStatus::parse("Cancelled"), Some(TaskStatus::Canceled));
        assert_eq!(TaskStatus::parse("pending_human"), None);
    }

    #[test]
    fn classification() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
        assert!(!TaskStatus::Deferred.is_terminal());
        assert!(TaskStatus::Deferred.is_paused());
        assert!(TaskStatus::InputRequired.is_paused());
        assert!(!TaskStatus::Working.is_paused());
        assert!(TaskStatus::Submitted.is_intermediate());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let encoded = serde_json::to_string(&TaskStatus::InputRequired).expect("serialize");
        assert_eq!(encoded, "\"input-required\"");
        assert_eq!(TaskStatus::InputRequired.to_string(), "input-required");
    }
}
