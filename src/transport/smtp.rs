use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::{Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use std::str::FromStr;

use crate::config::{SmtpConfig, TlsMode};

use super::{Delivery, EmailBody, OutgoingEmail, Transport, TransportError};

/// Submits messages to an SMTP relay with lettre.
pub struct SmtpTransport {
    relay: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

fn parse_address<T>(address: &str) -> Result<T, TransportError>
where
    T: FromStr<Err = AddressError>,
{
    address.parse().map_err(|e: AddressError| TransportError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn generate_message_id(sender_address: &str) -> String {
    let domain = sender_address
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain);
    format!("<{:032x}@{}>", rand::random::<u128>(), domain)
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Result<Self, TransportError> {
        let mut builder = match config.tls {
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.relay)?,
            TlsMode::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.relay)?
            }
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.relay),
        };

        if let Some(port) = config.port {
            builder = builder.port(port);
        }

        let mailer = builder
            .credentials(Credentials::new(config.username, config.password))
            .build();

        Ok(Self {
            relay: config.relay,
            mailer,
        })
    }

    /// Builds the MIME message and the `Message-ID` it carries.
    fn build_message(email: &OutgoingEmail) -> Result<(Message, String), TransportError> {
        let from = Mailbox::new(
            Some(email.from.name.clone()),
            parse_address::<Mailbox>(&email.from.address)?.email,
        );
        let message_id = generate_message_id(&email.from.address);

        let recipients: Mailboxes = parse_address(&email.to)?;

        let mut builder = Message::builder()
            .from(from)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()));
        for recipient in recipients {
            builder = builder.to(recipient);
        }

        let message = match &email.body {
            EmailBody::Text(text) => builder.singlepart(SinglePart::plain(text.clone()))?,
            EmailBody::Html(html) => builder.singlepart(SinglePart::html(html.clone()))?,
            EmailBody::Alternative { text, html } => builder.multipart(
                MultiPart::alternative_plain_html(text.clone(), html.clone()),
            )?,
        };

        Ok((message, message_id))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<Delivery, TransportError> {
        let (message, message_id) = Self::build_message(email)?;

        tracing::debug!("Submitting message {} to SMTP relay {}", message_id, self.relay);

        let response = self.mailer.send(message).await?;

        tracing::debug!("SMTP relay answered {} for {}", response.code(), message_id);

        Ok(Delivery {
            message_id,
            service: None,
        })
    }

    async fn verify(&self) -> Result<(), TransportError> {
        if self.mailer.test_connection().await? {
            Ok(())
        } else {
            Err(TransportError::Unverified)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Sender;

    fn email(body: EmailBody) -> OutgoingEmail {
        OutgoingEmail {
            from: Sender {
                name: "Relay".into(),
                address: "relay@example.com".into(),
            },
            to: "a@b.com".into(),
            subject: "Hi".into(),
            body,
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let id = generate_message_id("relay@example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
        assert_ne!(id, generate_message_id("relay@example.com"));
    }

    #[test]
    fn builds_text_message_with_generated_id() {
        let (message, message_id) =
            SmtpTransport::build_message(&email(EmailBody::Text("hello".into()))).unwrap();
        let raw = formatted(&message);

        assert!(raw.contains(&format!("Message-ID: {message_id}")));
        assert!(raw.contains("<relay@example.com>"));
        assert!(raw.contains("To: a@b.com"));
        assert!(raw.contains("Subject: Hi"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn builds_alternative_message() {
        let body = EmailBody::Alternative {
            text: "hello".into(),
            html: "<p>hello</p>".into(),
        };
        let (message, _) = SmtpTransport::build_message(&email(body)).unwrap();
        let raw = formatted(&message);

        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn rejects_invalid_recipient() {
        let mut invalid = email(EmailBody::Text("hello".into()));
        invalid.to = "not an address".into();

        let err = SmtpTransport::build_message(&invalid).unwrap_err();
        assert!(matches!(err, TransportError::Address { ref address, .. } if address == "not an address"));
    }

    #[test]
    fn builds_message_for_comma_separated_recipients() {
        let mut message = email(EmailBody::Text("hello".into()));
        message.to = "a@b.com, c@d.com".into();

        let (message, _) = SmtpTransport::build_message(&message).unwrap();
        let recipients: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(recipients, ["a@b.com", "c@d.com"]);
    }

    mod relay {
        use super::*;

        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::{TcpListener, TcpStream};
        use tokio::sync::mpsc;

        /// `AUTH PLAIN` initial response for `user` / `pass`.
        const VALID_PLAIN: &str = "AHVzZXIAcGFzcw==";

        /// Speaks just enough SMTP for lettre: greeting, EHLO, AUTH PLAIN,
        /// envelope commands, DATA and QUIT. Received message data is pushed
        /// to `messages`.
        async fn session(
            stream: TcpStream,
            reject_noop: bool,
            messages: mpsc::UnboundedSender<String>,
        ) -> std::io::Result<()> {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            write.write_all(b"220 localhost ESMTP test relay\r\n").await?;

            while let Some(line) = lines.next_line().await? {
                let verb = line
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();

                let reply = match verb.as_str() {
                    "EHLO" => "250-localhost\r\n250 AUTH PLAIN\r\n",
                    "AUTH" if line.ends_with(VALID_PLAIN) => {
                        "235 2.7.0 Authentication successful\r\n"
                    }
                    "AUTH" => "535 5.7.8 Authentication credentials invalid\r\n",
                    "NOOP" if reject_noop => "500 5.5.1 Command unavailable\r\n",
                    "DATA" => {
                        write
                            .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                            .await?;
                        let mut data = String::new();
                        while let Some(line) = lines.next_line().await? {
                            if line == "." {
                                break;
                            }
                            data.push_str(&line);
                            data.push('\n');
                        }
                        let _ = messages.send(data);
                        "250 2.0.0 Ok: queued\r\n"
                    }
                    "QUIT" => {
                        write.write_all(b"221 2.0.0 Bye\r\n").await?;
                        return Ok(());
                    }
                    _ => "250 2.0.0 Ok\r\n",
                };

                write.write_all(reply.as_bytes()).await?;
            }

            Ok(())
        }

        /// Starts the stand-in relay on a random local port.
        async fn spawn_relay(reject_noop: bool) -> (u16, mpsc::UnboundedReceiver<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let (tx, rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(session(stream, reject_noop, tx.clone()));
                }
            });

            (port, rx)
        }

        fn transport(port: u16, password: &str) -> SmtpTransport {
            SmtpTransport::new(SmtpConfig {
                relay: "127.0.0.1".into(),
                port: Some(port),
                username: "user".into(),
                password: password.into(),
                tls: TlsMode::None,
            })
            .unwrap()
        }

        #[tokio::test]
        async fn delivered_message_id_matches_header() {
            let (port, mut messages) = spawn_relay(false).await;

            let delivery = transport(port, "pass")
                .send(&email(EmailBody::Text("hello".into())))
                .await
                .unwrap();
            let data = messages.recv().await.unwrap();

            assert_eq!(delivery.service, None);
            assert!(data.contains(&format!("Message-ID: {}", delivery.message_id)));
            assert!(data.contains("Subject: Hi"));
        }

        #[tokio::test]
        async fn bad_credentials_carry_smtp_reply_code() {
            let (port, _messages) = spawn_relay(false).await;

            let err = transport(port, "wrong")
                .send(&email(EmailBody::Text("hello".into())))
                .await
                .unwrap_err();

            assert!(matches!(err, TransportError::Smtp(_)));
            assert_eq!(err.code().as_deref(), Some("535"));
            assert!(err.payload().is_none());
        }

        #[tokio::test]
        async fn verify_accepts_valid_credentials() {
            let (port, _messages) = spawn_relay(false).await;

            assert!(transport(port, "pass").verify().await.is_ok());
        }

        #[tokio::test]
        async fn verify_reports_failed_login() {
            let (port, _messages) = spawn_relay(false).await;

            let err = transport(port, "wrong").verify().await.unwrap_err();

            assert_eq!(err.code().as_deref(), Some("535"));
        }

        #[tokio::test]
        async fn verify_unverified_when_relay_rejects_noop() {
            let (port, _messages) = spawn_relay(true).await;

            let err = transport(port, "pass").verify().await.unwrap_err();

            assert!(matches!(err, TransportError::Unverified));
        }
    }
}
