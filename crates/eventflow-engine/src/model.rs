//! Workflow data model.
//!
//! Definitions are authored externally as JSON:
//!
//! ```json
//! {
//!   "trigger": {"type": "form_submitted",
//!               "conditions": {"path": "template_id", "op": "==", "value": "contact"}},
//!   "initial_step_id": "notify",
//!   "steps": [{"id": "notify", "type": "auto_action",
//!              "actions": [{"type": "send_email", "config": {"to_path": "data.email"}}],
//!              "transitions": []}]
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Event delivered from the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type (e.g., "form_submitted").
    pub event_type: String,

    /// Structured event payload.
    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Owning organization.
    #[serde(default = "default_org_id")]
    pub org_id: String,
}

fn default_org_id() -> String {
    "0".to_string()
}

impl Event {
    /// Create a new event for the default organization.
    pub fn new(event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            org_id: default_org_id(),
        }
    }

    /// Set the organization.
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Structural equality.
    #[serde(rename = "eq", alias = "==")]
    Eq,
    /// Structural inequality.
    #[serde(rename = "ne", alias = "!=")]
    Ne,
    /// Membership in a list value.
    #[serde(rename = "in")]
    In,
    /// Greater than.
    #[serde(rename = "gt", alias = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    /// Less than.
    #[serde(rename = "lt", alias = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    /// Substring of the context value's string form.
    #[serde(rename = "contains")]
    Contains,
}

/// Recursive condition tree evaluated against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition", into = "RawCondition")]
pub enum Condition {
    /// True iff every child is true (empty → true).
    All(Vec<Condition>),
    /// True iff at least one child is true (empty → false).
    Any(Vec<Condition>),
    /// Comparison of the value at `path` with `value`.
    Leaf {
        path: String,
        op: Operator,
        value: Value,
    },
}

impl Condition {
    /// Build a leaf condition.
    pub fn leaf(path: impl Into<String>, op: Operator, value: Value) -> Self {
        Condition::Leaf {
            path: path.into(),
            op,
            value,
        }
    }
}

/// Wire shape of a condition object.
#[derive(Serialize, Deserialize)]
struct RawCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    all: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    any: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl TryFrom<RawCondition> for Condition {
    type Error = String;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        if let Some(children) = raw.all {
            return Ok(Condition::All(children));
        }
        if let Some(children) = raw.any {
            return Ok(Condition::Any(children));
        }
        match (raw.path, raw.op) {
            (Some(path), Some(op)) => Ok(Condition::Leaf {
                path,
                op,
                value: raw.value.unwrap_or(Value::Null),
            }),
            // `{}` is an unconditional match.
            (None, None) if raw.value.is_none() => Ok(Condition::All(Vec::new())),
            _ => Err("condition requires `all`, `any`, or both `path` and `op`".to_string()),
        }
    }
}

impl From<Condition> for RawCondition {
    fn from(condition: Condition) -> Self {
        let mut raw = RawCondition {
            all: None,
            any: None,
            path: None,
            op: None,
            value: None,
        };
        match condition {
            Condition::All(children) => raw.all = Some(children),
            Condition::Any(children) => raw.any = Some(children),
            Condition::Leaf { path, op, value } => {
                raw.path = Some(path);
                raw.op = Some(op);
                raw.value = Some(value);
            }
        }
        raw
    }
}

/// Event-type/condition pair that activates a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Event type this trigger listens for.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Optional guard evaluated against the event context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
}

/// Kind of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Runs its actions and advances through transitions immediately.
    AutoAction,
    /// Runs its actions and waits for an external completion signal.
    #[default]
    HumanTask,
}

/// Closed set of action kinds understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    /// Send an email (`send_email` or `send_notification`).
    SendEmail,
    CreateTicket,
    UpdateTicket,
    CreateTask,
    UpdateTask,
    Webhook,
    /// Anything else; kept verbatim so it can be reported when skipped.
    Unknown(String),
}

impl ActionKind {
    /// Canonical name of the action kind.
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::SendEmail => "send_email",
            ActionKind::CreateTicket => "create_ticket",
            ActionKind::UpdateTicket => "update_ticket",
            ActionKind::CreateTask => "create_task",
            ActionKind::UpdateTask => "update_task",
            ActionKind::Webhook => "webhook",
            ActionKind::Unknown(name) => name,
        }
    }
}

impl From<String> for ActionKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "send_email" | "send_notification" => ActionKind::SendEmail,
            "create_ticket" => ActionKind::CreateTicket,
            "update_ticket" => ActionKind::UpdateTicket,
            "create_task" => ActionKind::CreateTask,
            "update_task" => ActionKind::UpdateTask,
            "webhook" => ActionKind::Webhook,
            _ => ActionKind::Unknown(name),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single side-effecting operation run during a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Guarded edge to another step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    pub to_step_id: String,
}

/// A unit of workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub step_type: StepType,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// Definition body as stored next to a workflow's id and name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionBody {
    pub trigger: Trigger,

    #[serde(default)]
    pub initial_step_id: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Declarative workflow definition. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,

    pub name: String,

    #[serde(default = "default_true")]
    pub is_active: bool,

    pub trigger: Trigger,

    #[serde(default)]
    pub initial_step_id: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Assemble a definition from its stored parts.
    pub fn from_parts(
        id: impl Into<String>,
        name: impl Into<String>,
        is_active: bool,
        body: Value,
    ) -> EngineResult<Self> {
        let body: DefinitionBody = serde_json::from_value(body)
            .map_err(|e| EngineError::InvalidDefinition(e.to_string()))?;

        Ok(Self {
            id: id.into(),
            name: name.into(),
            is_active,
            trigger: body.trigger,
            initial_step_id: body.initial_step_id,
            steps: body.steps,
        })
    }

    /// The stored body (`trigger`, `initial_step_id`, `steps`).
    pub fn body(&self) -> EngineResult<Value> {
        let body = DefinitionBody {
            trigger: self.trigger.clone(),
            initial_step_id: self.initial_step_id.clone(),
            steps: self.steps.clone(),
        };
        Ok(serde_json::to_value(body)?)
    }

    /// Step execution starts from. Falls back to the first step when no
    /// initial step is declared.
    pub fn entry_step_id(&self) -> Option<&str> {
        if !self.initial_step_id.is_empty() {
            return Some(&self.initial_step_id);
        }
        self.steps.first().map(|s| s.id.as_str())
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Active,
    Completed,
    Error,
}

impl InstanceStatus {
    /// Returns true for states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Active => "active",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "active" => Ok(InstanceStatus::Active),
            "completed" => Ok(InstanceStatus::Completed),
            "error" => Ok(InstanceStatus::Error),
            other => Err(EngineError::InvalidState(format!(
                "unknown instance status: {}",
                other
            ))),
        }
    }
}

/// One execution of a workflow definition, created per (workflow, event) match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,

    pub workflow_id: String,

    pub current_step: Option<String>,

    pub status: InstanceStatus,

    /// Seeded from the event payload; never reset.
    pub context: Value,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new active instance positioned at `initial_step`.
    pub fn new(
        workflow_id: impl Into<String>,
        initial_step: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            current_step: Some(initial_step.into()),
            status: InstanceStatus::Active,
            context: Value::Object(payload),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_symbol_operators() {
        let condition: Condition =
            serde_json::from_value(json!({"path": "template_id", "op": "==", "value": "x"}))
                .unwrap();
        assert_eq!(condition, Condition::leaf("template_id", Operator::Eq, json!("x")));

        let condition: Condition =
            serde_json::from_value(json!({"path": "n", "op": ">=", "value": 3})).unwrap();
        assert!(matches!(condition, Condition::Leaf { op: Operator::Gte, .. }));
    }

    #[test]
    fn test_condition_nested_tree() {
        let condition: Condition = serde_json::from_value(json!({
            "all": [
                {"path": "a", "op": "eq", "value": 1},
                {"any": [
                    {"path": "b", "op": "in", "value": [1, 2]},
                    {"path": "c", "op": "contains", "value": "x"}
                ]}
            ]
        }))
        .unwrap();

        match condition {
            Condition::All(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[1], Condition::Any(inner) if inner.len() == 2));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn test_empty_condition_is_unconditional() {
        let condition: Condition = serde_json::from_value(json!({})).unwrap();
        assert_eq!(condition, Condition::All(vec![]));
    }

    #[test]
    fn test_condition_rejects_unknown_operator() {
        let result =
            serde_json::from_value::<Condition>(json!({"path": "a", "op": "~=", "value": 1}));
        assert!(result.is_err());

        let result = serde_json::from_value::<Condition>(json!({"path": "a"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_condition_serializes_to_wire_shape() {
        let condition = Condition::leaf("a.b", Operator::Lt, json!(5));
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value, json!({"path": "a.b", "op": "lt", "value": 5}));
    }

    #[test]
    fn test_action_kind_aliases() {
        let action: Action =
            serde_json::from_value(json!({"type": "send_notification", "config": {}})).unwrap();
        assert_eq!(action.kind, ActionKind::SendEmail);

        let action: Action = serde_json::from_value(json!({"type": "fax"})).unwrap();
        assert_eq!(action.kind, ActionKind::Unknown("fax".to_string()));
        assert_eq!(action.kind.to_string(), "fax");
        assert!(action.config.is_empty());
    }

    #[test]
    fn test_step_type_defaults_to_human_task() {
        let step: Step = serde_json::from_value(json!({"id": "review"})).unwrap();
        assert_eq!(step.step_type, StepType::HumanTask);
        assert!(step.actions.is_empty());
        assert!(step.transitions.is_empty());
    }

    #[test]
    fn test_definition_from_parts() {
        let body = json!({
            "trigger": {"type": "form_submitted"},
            "steps": [{"id": "s1", "type": "auto_action"}]
        });
        let definition = WorkflowDefinition::from_parts("wf-1", "Demo", true, body).unwrap();

        assert_eq!(definition.trigger.event_type, "form_submitted");
        assert!(definition.trigger.conditions.is_none());
        assert_eq!(definition.entry_step_id(), Some("s1"));
        assert!(definition.step("s1").is_some());

        let body = definition.body().unwrap();
        assert_eq!(body["trigger"]["type"], "form_submitted");
    }

    #[test]
    fn test_definition_from_parts_invalid() {
        let result = WorkflowDefinition::from_parts("wf-1", "Broken", true, json!({"steps": []}));
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }

    #[test]
    fn test_instance_status_roundtrip() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Active,
            InstanceStatus::Completed,
            InstanceStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("paused".parse::<InstanceStatus>().is_err());
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(!InstanceStatus::Active.is_terminal());
    }

    #[test]
    fn test_new_instance_is_active() {
        let mut payload = Map::new();
        payload.insert("a".to_string(), json!(1));
        let instance = WorkflowInstance::new("wf-1", "s1", payload);

        assert_eq!(instance.status, InstanceStatus::Active);
        assert_eq!(instance.current_step.as_deref(), Some("s1"));
        assert_eq!(instance.context, json!({"a": 1}));
        assert!(!instance.id.is_empty());
    }

    #[test]
    fn test_event_default_org() {
        let event: Event =
            serde_json::from_value(json!({"event_type": "x", "payload": {"k": "v"}})).unwrap();
        assert_eq!(event.org_id, "0");
        assert_eq!(event.payload["k"], "v");
    }
}
