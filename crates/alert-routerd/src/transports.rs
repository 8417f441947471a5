//! Concrete transports: chat webhooks over HTTP and email over SMTP.
//!
//! [`DispatchNotifier`] implements the router's [`Notifier`] contract by
//! picking the transport that matches the destination kind. Both transports
//! bound every send with their configured timeout.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use alert_router::{Destination, Notifier, OutboundMessage, RouterError};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{ChatConfig, EmailConfig};
use crate::error::{DaemonError, DaemonResult};

/// Prefix of every email subject.
pub const SUBJECT_PREFIX: &str = "[alert-router] ";

fn delivery_error(destination: &str, reason: impl fmt::Display) -> RouterError {
    RouterError::Delivery {
        destination: destination.to_string(),
        reason: reason.to_string(),
    }
}

/// Builds the Slack-compatible webhook body.
#[must_use]
pub fn chat_body(channel: Option<&str>, text: &str) -> Value {
    let mut body = json!({ "text": text });
    if let Some(channel) = channel {
        body["channel"] = Value::String(channel.to_string());
    }
    body
}

// ============================================================================
// Chat
// ============================================================================

/// Posts payloads to incoming webhooks.
#[derive(Debug, Clone)]
pub struct ChatNotifier {
    client: reqwest::Client,
}

impl ChatNotifier {
    /// Creates a notifier whose requests time out after the configured
    /// number of seconds.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &ChatConfig) -> DaemonResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DaemonError::Transport {
                transport: "chat",
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Posts `text` to `webhook`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Delivery` on a request failure, a timeout or a
    /// non-2xx response.
    pub async fn post(
        &self,
        webhook: &str,
        channel: Option<&str>,
        text: &str,
    ) -> alert_router::Result<()> {
        let response = self
            .client
            .post(webhook)
            .json(&chat_body(channel, text))
            .send()
            .await
            .map_err(|e| delivery_error("chat", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(delivery_error("chat", format!("webhook returned {status}")));
        }

        debug!(status = %status, "chat webhook accepted payload");
        Ok(())
    }
}

// ============================================================================
// Email
// ============================================================================

/// Sends plain-text email through an SMTP relay.
#[derive(Clone)]
pub struct EmailNotifier {
    relay: Option<SmtpRelay>,
}

#[derive(Clone)]
struct SmtpRelay {
    host: String,
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("host", &self.relay.as_ref().map(|r| r.host.as_str()))
            .finish()
    }
}

impl EmailNotifier {
    /// Creates a notifier from the `[email]` section.
    ///
    /// An empty SMTP host yields a notifier whose every send fails, so
    /// email destinations still produce dead letters.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Transport` if the sender address or relay host
    /// is invalid.
    pub fn new(config: &EmailConfig) -> DaemonResult<Self> {
        if !config.is_configured() {
            return Ok(Self { relay: None });
        }

        let transport_error = |reason: String| DaemonError::Transport {
            transport: "email",
            reason,
        };

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| transport_error(format!("invalid sender '{}': {e}", config.from)))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        }
        .map_err(|e| transport_error(e.to_string()))?;

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            relay: Some(SmtpRelay {
                host: config.smtp_host.clone(),
                from,
                mailer: builder.build(),
            }),
        })
    }

    /// Returns `true` when an SMTP relay is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.relay.is_some()
    }

    /// Sends `message` to every address in `to` as a single email.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Delivery` if SMTP is not configured, a
    /// recipient is invalid or the relay rejects the message.
    pub async fn send_email(
        &self,
        to: &[String],
        message: &OutboundMessage,
    ) -> alert_router::Result<()> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| delivery_error("email", "SMTP host is not configured"))?;
        if to.is_empty() {
            return Err(delivery_error("email", "no recipients"));
        }

        let mut builder = Message::builder()
            .from(relay.from.clone())
            .subject(format!("{SUBJECT_PREFIX}{}", message.title))
            .header(ContentType::TEXT_PLAIN);
        for address in to {
            let mailbox: Mailbox = address.parse().map_err(|e| {
                delivery_error("email", format!("invalid recipient '{address}': {e}"))
            })?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .body(message.text.clone())
            .map_err(|e| delivery_error("email", e))?;

        relay
            .mailer
            .send(email)
            .await
            .map_err(|e| delivery_error("email", e))?;

        debug!(host = %relay.host, recipients = to.len(), "email accepted by relay");
        Ok(())
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Routes each send to the transport matching the destination kind.
#[derive(Debug, Clone)]
pub struct DispatchNotifier {
    chat: ChatNotifier,
    email: EmailNotifier,
}

impl DispatchNotifier {
    /// Creates a dispatcher over both transports.
    #[must_use]
    pub const fn new(chat: ChatNotifier, email: EmailNotifier) -> Self {
        Self { chat, email }
    }

    /// Builds both transports from configuration.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Transport` if either transport cannot be built.
    pub fn from_config(chat: &ChatConfig, email: &EmailConfig) -> DaemonResult<Self> {
        Ok(Self::new(ChatNotifier::new(chat)?, EmailNotifier::new(email)?))
    }
}

impl Notifier for DispatchNotifier {
    fn send<'a>(
        &'a self,
        destination: &'a Destination,
        message: &'a OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = alert_router::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match destination {
                Destination::Chat { webhook, channel } => {
                    self.chat.post(webhook, channel.as_deref(), &message.text).await
                }
                Destination::Email { to } => self.email.send_email(to, message).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::post;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    /// Serves a webhook that records every body and answers with `status`.
    async fn spawn_webhook(status: StatusCode) -> (String, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = axum::Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    status
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/hook"), rx)
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            title: "1 alert(s) severity=critical".to_string(),
            text: "*1 alert(s) severity=critical*\n- db1 down [sev:critical] (db1)\n".to_string(),
        }
    }

    fn dispatcher() -> DispatchNotifier {
        DispatchNotifier::from_config(&ChatConfig::default(), &EmailConfig::default())
            .expect("dispatcher")
    }

    mod chat_tests {
        use super::*;

        #[test]
        fn test_body_includes_channel_only_when_set() {
            assert_eq!(chat_body(None, "hi"), json!({ "text": "hi" }));
            assert_eq!(
                chat_body(Some("#ops"), "hi"),
                json!({ "text": "hi", "channel": "#ops" })
            );
        }

        #[tokio::test]
        async fn test_posts_payload_to_webhook() {
            let (url, mut rx) = spawn_webhook(StatusCode::OK).await;
            let destination = Destination::Chat {
                webhook: url,
                channel: Some("#oncall".to_string()),
            };

            dispatcher()
                .send(&destination, &message())
                .await
                .expect("send");

            let body = rx.recv().await.expect("body");
            assert_eq!(body["text"], message().text);
            assert_eq!(body["channel"], "#oncall");
        }

        #[tokio::test]
        async fn test_non_success_status_is_a_delivery_error() {
            let (url, _rx) = spawn_webhook(StatusCode::SERVICE_UNAVAILABLE).await;
            let destination = Destination::Chat {
                webhook: url,
                channel: None,
            };

            let err = dispatcher().send(&destination, &message()).await.unwrap_err();
            assert!(matches!(err, RouterError::Delivery { .. }));
            assert!(err.to_string().contains("503"));
        }

        #[tokio::test]
        async fn test_unreachable_webhook_is_a_delivery_error() {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("addr");
            drop(listener);

            let destination = Destination::Chat {
                webhook: format!("http://{addr}/hook"),
                channel: None,
            };
            let err = dispatcher().send(&destination, &message()).await.unwrap_err();
            assert!(matches!(err, RouterError::Delivery { .. }));
        }
    }

    mod email_tests {
        use super::*;

        fn smtp_config() -> EmailConfig {
            EmailConfig {
                smtp_host: "smtp.example.com".to_string(),
                from: "alerts@example.com".to_string(),
                ..EmailConfig::default()
            }
        }

        #[tokio::test]
        async fn test_unconfigured_smtp_fails_every_send() {
            let notifier = dispatcher();
            let destination = Destination::Email {
                to: vec!["ops@example.com".to_string()],
            };

            let err = notifier.send(&destination, &message()).await.unwrap_err();
            assert!(err.to_string().contains("not configured"));
        }

        #[tokio::test]
        async fn test_configured_relay_builds() {
            let notifier = EmailNotifier::new(&smtp_config()).expect("email");
            assert!(notifier.is_configured());
            assert!(!EmailNotifier::new(&EmailConfig::default())
                .expect("email")
                .is_configured());
        }

        #[tokio::test]
        async fn test_invalid_sender_is_rejected() {
            let config = EmailConfig {
                from: "not an address".to_string(),
                ..smtp_config()
            };
            assert!(matches!(
                EmailNotifier::new(&config),
                Err(DaemonError::Transport { transport: "email", .. })
            ));
        }

        #[tokio::test]
        async fn test_invalid_recipient_fails_before_connecting() {
            let notifier = EmailNotifier::new(&smtp_config()).expect("email");
            let err = notifier
                .send_email(&["nobody".to_string()], &message())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("invalid recipient"));
        }

        #[tokio::test]
        async fn test_empty_recipient_list_is_rejected() {
            let notifier = EmailNotifier::new(&smtp_config()).expect("email");
            let err = notifier.send_email(&[], &message()).await.unwrap_err();
            assert!(err.to_string().contains("no recipients"));
        }
    }
}
