//! Outbound mail capability.
//!
//! The mail service consumes `send_mail` requests from its queue and
//! hands them to a [`MailSender`]. Actual SMTP delivery is an external
//! collaborator; the shipped implementation records the send through the
//! log so every other part of the flow is exercisable without
//! credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::shared::error::AppError;

/// One outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail delivery seam.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), AppError>;
}

/// Log-only sender for development and single-node deployments.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: String) -> Self {
        Self { from }
    }
}

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<(), AppError> {
        info!(
            from = %self.from,
            to = %mail.to,
            subject = %mail.subject,
            "outbound mail"
        );
        Ok(())
    }
}
