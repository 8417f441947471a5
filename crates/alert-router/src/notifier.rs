//! Notification destinations and the transport contract.
//!
//! The router never talks to a transport directly. It hands a formatted
//! payload and a [`Destination`] to a [`Notifier`], which is expected to
//! bound every send with its own timeout.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Where a route delivers its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Destination {
    /// A Slack-compatible incoming webhook.
    Chat {
        /// Webhook URL.
        webhook: String,
        /// Channel name, informational.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// Plain-text email.
    Email {
        /// Recipient addresses.
        to: Vec<String>,
    },
}

impl Destination {
    /// Returns the destination kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Email { .. } => "email",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat {
                channel: Some(channel),
                ..
            } => write!(f, "chat:{channel}"),
            Self::Chat { channel: None, .. } => f.write_str("chat"),
            Self::Email { to } => write!(f, "email:{}", to.join(",")),
        }
    }
}

/// A message ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Short title (used as an email subject).
    pub title: String,
    /// Full human-readable payload.
    pub text: String,
}

/// Sends formatted batches to destinations.
///
/// Implementations must enforce their own timeout; the router awaits
/// `send` inline in the route worker.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Sends `message` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Delivery` if the destination did not accept the
    /// message.
    fn send<'a>(
        &'a self,
        destination: &'a Destination,
        message: &'a OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// A notifier that writes every message to the log and always succeeds.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(
        &'a self,
        destination: &'a Destination,
        message: &'a OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                destination = %destination,
                title = %message.title,
                text = %message.text,
                "notification"
            );
            Ok(())
        })
    }
}
