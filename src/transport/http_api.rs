use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::config::HttpApiConfig;

use super::{Delivery, OutgoingEmail, Transport, TransportError};

/// Sends messages through a transactional email HTTP API speaking the Brevo
/// v3 wire format.
pub struct HttpApiTransport {
    client: Client,
    base_url: String,
    api_key: String,
    service: String,
}

#[derive(Debug, Serialize)]
struct Contact<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendPayload<'a> {
    sender: Contact<'a>,
    to: Vec<Contact<'a>>,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendAccepted {
    message_id: String,
}

impl<'a> From<&'a OutgoingEmail> for SendPayload<'a> {
    fn from(email: &'a OutgoingEmail) -> Self {
        Self {
            sender: Contact {
                name: Some(email.from.name.as_str()),
                email: &email.from.address,
            },
            to: email
                .to
                .split(',')
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(|address| Contact {
                    name: None,
                    email: address,
                })
                .collect(),
            subject: &email.subject,
            html_content: email.body.html(),
            text_content: email.body.text(),
        }
    }
}

impl HttpApiTransport {
    pub fn new(config: HttpApiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            service: config.service,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turns a non-2xx provider response into [`TransportError::Rejected`],
/// keeping whatever payload the provider sent back.
async fn rejection(response: Response) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|e| {
        tracing::debug!("Failed to read rejection body ({}): {}", status, e);
        String::new()
    });

    let payload = serde_json::from_str::<serde_json::Value>(&body)
        .unwrap_or(serde_json::Value::String(body));

    let code = payload
        .get("code")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);
    let message = payload
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            },
            ToString::to_string,
        );

    TransportError::Rejected {
        status: status.as_u16(),
        code,
        message,
        payload,
    }
}

#[async_trait]
impl Transport for HttpApiTransport {
    fn name(&self) -> &'static str {
        "http_api"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<Delivery, TransportError> {
        let url = self.url("/v3/smtp/email");

        tracing::debug!("Posting message for '{}' to {}", email.to, url);

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&SendPayload::from(email))
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("{} answered {}", self.service, status);

        if !status.is_success() {
            return Err(rejection(response).await);
        }

        let accepted: SendAccepted = response.json().await?;

        Ok(Delivery {
            message_id: accepted.message_id,
            service: Some(self.service.clone()),
        })
    }

    async fn verify(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.url("/v3/account"))
            .header("api-key", &self.api_key)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejection(response).await)
        }
    }
}
