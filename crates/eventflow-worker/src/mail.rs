//! Email transports.
//!
//! The engine renders templates itself; transports only deliver.

use std::sync::Arc;

use async_trait::async_trait;
use eventflow_engine::{EmailMessage, EmailTransport, TransportError};
use reqwest::StatusCode;
use serde::Serialize;

use crate::config::MailConfig;

/// Request body sent to the mail relay.
#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    cc: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    bcc: &'a [String],
}

/// Delivers mail through an HTTP relay.
///
/// The deduplication key travels as an `Idempotency-Key` header.
#[derive(Clone)]
pub struct HttpMailRelay {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: String,
}

impl HttpMailRelay {
    /// Create a relay transport.
    pub fn new(url: &str, config: &MailConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: config.relay_token.clone(),
            from: config.from.clone(),
        }
    }
}

#[async_trait]
impl EmailTransport for HttpMailRelay {
    fn name(&self) -> &'static str {
        "http_relay"
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError> {
        let body = RelayRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
            cc: &message.cc,
            bcc: &message.bcc,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &message.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                Err(TransportError::Unavailable(format!("{}: {}", status, text)))
            }
            _ => Err(TransportError::Rejected(format!("{}: {}", status, text))),
        }
    }
}

/// Logs mail instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), TransportError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            cc = ?message.cc,
            bcc = ?message.bcc,
            idempotency_key = ?message.idempotency_key,
            "Email (not sent, no relay configured)"
        );
        Ok(())
    }
}

/// Transport selected by configuration.
pub fn transport_from_config(config: &MailConfig) -> Arc<dyn EmailTransport> {
    match &config.relay_url {
        Some(url) => {
            tracing::info!(url = %url, "Using HTTP mail relay");
            Arc::new(HttpMailRelay::new(url, config))
        }
        None => {
            tracing::warn!("MAIL_RELAY_URL not set; emails will only be logged");
            Arc::new(LogTransport)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "a@b.com".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
            cc: vec![],
            bcc: vec!["audit@b.com".to_string()],
            idempotency_key: Some("1-0:s1:0".to_string()),
        }
    }

    #[test]
    fn test_log_transport_succeeds() {
        assert!(tokio_test::block_on(LogTransport.send(&message())).is_ok());
    }

    #[test]
    fn test_relay_request_serialization() {
        let message = message();
        let body = RelayRequest {
            from: "noreply@localhost",
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
            cc: &message.cc,
            bcc: &message.bcc,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"], "a@b.com");
        assert!(json.get("cc").is_none());
        assert_eq!(json["bcc"][0], "audit@b.com");
    }

    #[test]
    fn test_transport_from_config() {
        let config = MailConfig::default();
        assert_eq!(transport_from_config(&config).name(), "log");

        let config = MailConfig {
            relay_url: Some("http://localhost:8025/send/".to_string()),
            ..Default::default()
        };
        assert_eq!(transport_from_config(&config).name(), "http_relay");
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_unavailable() {
        let config = MailConfig {
            timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        };
        let relay = HttpMailRelay::new("http://127.0.0.1:9/send", &config);

        let err = relay.send(&message()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }
}
