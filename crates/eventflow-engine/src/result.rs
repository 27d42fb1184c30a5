//! Action execution result types.

use serde::{Deserialize, Serialize};

/// Status of an action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Action completed.
    Success,
    /// Action ran but did not achieve its effect (e.g., no recipient).
    Failed,
    /// Action was not run (unknown type).
    Skipped,
    /// Action configuration or data was unusable.
    Error,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Success => write!(f, "success"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
            ActionStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of a single action execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Execution status.
    pub status: ActionStatus,

    /// Action kind that produced this result.
    pub action: String,

    /// Why the action did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Handler-specific details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ActionResult {
    /// Create a successful result with details.
    pub fn success(action: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            status: ActionStatus::Success,
            action: action.into(),
            reason: None,
            details: Some(details),
        }
    }

    /// Create a failed result.
    pub fn failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            action: action.into(),
            reason: Some(reason.into()),
            details: None,
        }
    }

    /// Create a skipped result.
    pub fn skipped(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Skipped,
            action: action.into(),
            reason: Some(reason.into()),
            details: None,
        }
    }

    /// Create an error result.
    pub fn error(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            action: action.into(),
            reason: Some(message.into()),
            details: None,
        }
    }

    /// Returns true if the action succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_status_display() {
        assert_eq!(ActionStatus::Success.to_string(), "success");
        assert_eq!(ActionStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_action_result_constructors() {
        let result = ActionResult::success("send_email", serde_json::json!({"to": "a@b.com"}));
        assert!(result.is_success());
        assert!(result.reason.is_none());

        let result = ActionResult::failed("send_email", "No recipient email found");
        assert_eq!(result.status, ActionStatus::Failed);
        assert_eq!(result.reason.as_deref(), Some("No recipient email found"));
    }

    #[test]
    fn test_action_result_serialization() {
        let result = ActionResult::skipped("fax", "Unknown action type: fax");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"skipped\""));
        assert!(!json.contains("details"));
    }
}
