use crate::{
    dto::{SendEmailRequest, SendEmailResponse},
    transport::{EmailBody, OutgoingEmail, Sender, Transport, TransportError},
};

use std::sync::Arc;

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields: to, subject, and html/text";

pub struct RelayService {
    sender: Sender,
    transport: Arc<dyn Transport>,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    TransportFailure(#[from] TransportError),
}

/// Empty strings count as absent.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

impl RelayService {
    pub fn new(sender: Sender, transport: Arc<dyn Transport>) -> Self {
        RelayService { sender, transport }
    }

    /// Checks the required fields and builds the message to hand off.
    pub fn validate(&self, request: SendEmailRequest) -> Result<OutgoingEmail, RelayError> {
        let invalid = || RelayError::InvalidRequest(MISSING_FIELDS_MESSAGE.to_string());

        let to = present(request.to).ok_or_else(invalid)?;
        let subject = present(request.subject).ok_or_else(invalid)?;
        let body = EmailBody::from_parts(present(request.text), present(request.html))
            .ok_or_else(invalid)?;

        Ok(OutgoingEmail {
            from: self.sender.clone(),
            to,
            subject,
            body,
        })
    }

    pub async fn send_email(
        &self,
        request: SendEmailRequest,
    ) -> Result<SendEmailResponse, RelayError> {
        let email = self.validate(request)?;

        tracing::info!(
            "Sending email to '{}' with subject '{}' via {}",
            email.to,
            email.subject,
            self.transport.name()
        );

        let delivery = self.transport.send(&email).await?;

        tracing::info!(
            "Email to '{}' sent successfully: {}",
            email.to,
            delivery.message_id
        );

        Ok(SendEmailResponse {
            success: true,
            message: "Email sent successfully".to_string(),
            message_id: delivery.message_id,
            service: delivery.service,
        })
    }

    /// Probes the configured transport, used once at startup.
    pub async fn verify_transport(&self) -> Result<(), TransportError> {
        self.transport.verify().await
    }
}
