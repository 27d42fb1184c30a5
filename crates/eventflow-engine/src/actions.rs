//! Action dispatch.
//!
//! Dispatch is a closed match over [`ActionKind`]. Handlers never raise: every
//! outcome, including transport failures, is reported as an [`ActionResult`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::context::{merge_objects, render_template, resolve_path};
use crate::model::{Action, ActionKind};
use crate::result::ActionResult;

/// Recipient path used when an email action names neither `to` nor `to_path`.
pub const DEFAULT_TO_PATH: &str = "form.data.email";

const DEFAULT_SUBJECT: &str = "Notification";
const DEFAULT_BODY: &str = "You have a new notification.";

/// Outbound email handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    /// Stable key for transports that deduplicate redelivered sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Errors reported by an email transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport could not be reached.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Transport refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Email-send capability consumed by the dispatcher.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Transport name for logs and result details.
    fn name(&self) -> &'static str;

    /// Send a message.
    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError>;
}

/// Where an action execution came from, for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    /// Event log message id (or another stable origin id).
    pub message_id: String,
    pub step_id: String,
    pub action_index: usize,
}

impl DeliveryContext {
    /// `{message_id}:{step_id}:{action_index}`
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.message_id, self.step_id, self.action_index)
    }
}

/// Executes single actions against a workflow context.
#[derive(Clone)]
pub struct ActionDispatcher {
    email: Arc<dyn EmailTransport>,
}

impl ActionDispatcher {
    /// Create a dispatcher using the given email transport.
    pub fn new(email: Arc<dyn EmailTransport>) -> Self {
        Self { email }
    }

    /// Execute an action. Never fails; unknown kinds are skipped.
    pub async fn execute(
        &self,
        action: &Action,
        context: &Value,
        delivery: Option<&DeliveryContext>,
    ) -> ActionResult {
        match &action.kind {
            ActionKind::SendEmail => self.send_email(action, context, delivery).await,
            ActionKind::CreateTicket
            | ActionKind::UpdateTicket
            | ActionKind::CreateTask
            | ActionKind::UpdateTask
            | ActionKind::Webhook => record_intent(action, context, delivery),
            ActionKind::Unknown(name) => {
                tracing::warn!(action = %name, "Unknown action type");
                ActionResult::skipped(name.as_str(), format!("Unknown action type: {}", name))
            }
        }
    }

    async fn send_email(
        &self,
        action: &Action,
        context: &Value,
        delivery: Option<&DeliveryContext>,
    ) -> ActionResult {
        const NAME: &str = "send_email";
        let config = &action.config;

        let data = match template_data(config, context) {
            Ok(data) => data,
            Err(message) => return ActionResult::error(NAME, message),
        };

        let to = match resolve_recipient(config, context, &data) {
            Ok(Some(to)) => to,
            Ok(None) => return ActionResult::failed(NAME, "No recipient email found"),
            Err(message) => return ActionResult::error(NAME, message),
        };

        let subject = config
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SUBJECT);
        let body = config
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BODY);

        let message = EmailMessage {
            to,
            subject: render_template(subject, &data),
            body: render_template(body, &data),
            cc: string_list(config.get("cc")),
            bcc: string_list(config.get("bcc")),
            idempotency_key: delivery.map(DeliveryContext::dedup_key),
        };

        match self.email.send(&message).await {
            Ok(()) => {
                tracing::info!(
                    to = %message.to,
                    transport = self.email.name(),
                    "Email sent"
                );
                ActionResult::success(
                    NAME,
                    json!({
                        "to": message.to,
                        "subject": message.subject,
                        "transport": self.email.name(),
                    }),
                )
            }
            Err(e) => {
                tracing::warn!(
                    to = %message.to,
                    transport = self.email.name(),
                    error = %e,
                    "Email sending failed"
                );
                ActionResult::failed(NAME, format!("Email sending failed: {}", e))
            }
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("email", &self.email.name())
            .finish()
    }
}

/// Placeholder handlers: log the rendered intent and report success.
fn record_intent(
    action: &Action,
    context: &Value,
    delivery: Option<&DeliveryContext>,
) -> ActionResult {
    let name = action.kind.as_str();

    let data = match template_data(&action.config, context) {
        Ok(data) => data,
        Err(message) => return ActionResult::error(name, message),
    };

    let rendered: Map<String, Value> = action
        .config
        .iter()
        .filter(|(k, _)| k.as_str() != "template_data")
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => Value::String(render_template(s, &data)),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect();

    tracing::info!(action = name, config = ?rendered, "Recording action intent");

    let mut details = json!({
        "note": "not implemented",
        "config": rendered,
    });
    if let Some(delivery) = delivery {
        details["dedup_key"] = Value::String(delivery.dedup_key());
    }

    ActionResult::success(name, details)
}

/// `context ∪ config.template_data`, config keys winning.
fn template_data(config: &Map<String, Value>, context: &Value) -> Result<Value, String> {
    match config.get("template_data") {
        None | Some(Value::Null) => Ok(merge_objects(context, &Map::new())),
        Some(Value::Object(extra)) => Ok(merge_objects(context, extra)),
        Some(_) => Err("template_data must be an object".to_string()),
    }
}

/// Resolve the recipient from `to`, else from `to_path` into the context.
fn resolve_recipient(
    config: &Map<String, Value>,
    context: &Value,
    data: &Value,
) -> Result<Option<String>, String> {
    let explicit = config
        .get("to")
        .filter(|v| !matches!(v, Value::Null) && v.as_str() != Some(""));

    let value = match explicit {
        Some(v) => Some(v.clone()),
        None => {
            let path = config
                .get("to_path")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TO_PATH);
            resolve_path(context, &render_template(path, data)).cloned()
        }
    };

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(render_template(&s, data))),
        Some(other) => Err(format!("Recipient must be a string, got {}", other)),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
