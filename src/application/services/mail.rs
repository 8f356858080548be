//! Mail Service
//!
//! The single `send_mail` action behind the mail queue.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::infrastructure::broker::decode_payload;
use crate::infrastructure::mail::{MailSender, OutboundMail};
use crate::shared::error::AppError;

/// Mail service behind `mail.queue`.
pub struct MailService<S: MailSender> {
    sender: Arc<S>,
}

impl<S: MailSender> MailService<S> {
    pub fn new(sender: Arc<S>) -> Self {
        Self { sender }
    }

    /// Deliver one outbound email.
    pub async fn send_mail(&self, data: Value) -> Result<Value, AppError> {
        let mail: OutboundMail = decode_payload(data)?;
        self.sender.send(&mail).await?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "Email sent successfully",
        }))
    }
}
