//! Outbound mail transports.
//!
//! A deployment picks exactly one [`Transport`] at startup. The relay never
//! switches between transports or falls back from one to another.

pub mod http_api;
pub mod smtp;

use async_trait::async_trait;

pub use http_api::HttpApiTransport;
pub use smtp::SmtpTransport;

/// Fixed sender identity stamped on every outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: String,
    pub address: String,
}

/// Body of an outgoing message. At least one part is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailBody {
    Text(String),
    Html(String),
    /// Both parts, sent as multipart/alternative.
    Alternative { text: String, html: String },
}

impl EmailBody {
    pub fn from_parts(text: Option<String>, html: Option<String>) -> Option<Self> {
        match (text, html) {
            (Some(text), Some(html)) => Some(Self::Alternative { text, html }),
            (Some(text), None) => Some(Self::Text(text)),
            (None, Some(html)) => Some(Self::Html(html)),
            (None, None) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Alternative { text, .. } => Some(text),
            Self::Html(_) => None,
        }
    }

    pub fn html(&self) -> Option<&str> {
        match self {
            Self::Html(html) | Self::Alternative { html, .. } => Some(html),
            Self::Text(_) => None,
        }
    }
}

/// A validated message ready to be handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: Sender,
    pub to: String,
    pub subject: String,
    pub body: EmailBody,
}

/// What a transport reports once the provider accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    /// Provider name, reported by API-based transports only.
    pub service: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid email address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build email message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("SMTP server rejected the connection check")]
    Unverified,

    #[error("HTTP request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected the request with status {status}: {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
        payload: serde_json::Value,
    },
}

impl TransportError {
    /// Provider- or protocol-level error code, when one is known.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Smtp(e) => e.status().map(|code| code.to_string()),
            Self::Rejected { code, status, .. } => {
                Some(code.clone().unwrap_or_else(|| status.to_string()))
            }
            _ => None,
        }
    }

    /// Raw error payload returned by the provider.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Rejected { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    async fn send(&self, email: &OutgoingEmail) -> Result<Delivery, TransportError>;

    /// Checks that the provider is reachable and the credentials are accepted.
    async fn verify(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_from_parts() {
        assert_eq!(
            EmailBody::from_parts(Some("plain".into()), None),
            Some(EmailBody::Text("plain".into()))
        );
        assert_eq!(
            EmailBody::from_parts(None, Some("<p>rich</p>".into())),
            Some(EmailBody::Html("<p>rich</p>".into()))
        );
        assert_eq!(EmailBody::from_parts(None, None), None);

        let both = EmailBody::from_parts(Some("plain".into()), Some("<p>rich</p>".into()))
            .expect("both parts present");
        assert_eq!(both.text(), Some("plain"));
        assert_eq!(both.html(), Some("<p>rich</p>"));
    }

    #[test]
    fn rejected_error_exposes_code_and_payload() {
        let payload = serde_json::json!({"code": "unauthorized", "message": "Key not found"});
        let err = TransportError::Rejected {
            status: 401,
            code: Some("unauthorized".into()),
            message: "Key not found".into(),
            payload: payload.clone(),
        };

        assert_eq!(err.code().as_deref(), Some("unauthorized"));
        assert_eq!(err.payload(), Some(&payload));
        assert!(err.to_string().contains("Key not found"));
    }

    #[test]
    fn rejected_error_without_code_falls_back_to_status() {
        let err = TransportError::Rejected {
            status: 503,
            code: None,
            message: "Service Unavailable".into(),
            payload: serde_json::Value::String("down".into()),
        };

        assert_eq!(err.code().as_deref(), Some("503"));
    }
}
