pub mod mailer;
pub mod message;

pub use mailer::{HttpMailer, LogMailer};
pub use message::Links;

use anyhow::Result;
use async_trait::async_trait;

/// A rendered email ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Trait that every mail delivery backend must implement.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
