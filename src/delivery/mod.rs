//! Delivery orchestration.
//!
//! One submission always produces two sends: the confirmation to the
//! submitter, then the lead notification to the team. A failed send never
//! prevents the other one.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::client::Mailer;
use crate::compose::compose;
use crate::config::MailboxConfig;
use crate::types::{Audience, DeliveryReport, InquiryRecord, SubmissionResult};

/// Composes and sends both messages of a submission.
#[derive(Clone)]
pub struct DeliveryOrchestrator {
    mailboxes: MailboxConfig,
    mailer: Arc<dyn Mailer>,
}

impl std::fmt::Debug for DeliveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryOrchestrator")
            .field("mailboxes", &self.mailboxes)
            .finish_non_exhaustive()
    }
}

impl DeliveryOrchestrator {
    /// Creates an orchestrator over a mailer.
    pub fn new(mailboxes: MailboxConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self { mailboxes, mailer }
    }

    /// Returns the mailbox configuration.
    pub fn mailboxes(&self) -> &MailboxConfig {
        &self.mailboxes
    }

    /// Sends the confirmation and the notification for one inquiry.
    pub async fn submit(&self, record: &InquiryRecord) -> SubmissionResult {
        let span = tracing::info_span!("submission", submission_id = %Uuid::new_v4());

        async {
            tracing::info!(
                name = %record.full_name(),
                email = %record.email,
                "Inquiry received: {} <{}>",
                record.full_name(),
                record.email
            );

            let confirmation = self.send(record, Audience::Submitter).await;
            let notification = self.send(record, Audience::Team).await;

            SubmissionResult {
                confirmation,
                notification,
            }
        }
        .instrument(span)
        .await
    }

    async fn send(&self, record: &InquiryRecord, audience: Audience) -> DeliveryReport {
        let message = compose(record, audience, &self.mailboxes);
        let outcome = self.mailer.deliver(&message).await;

        match &outcome {
            Ok(receipt) => tracing::info!(
                audience = %audience,
                recipient = %message.to,
                tls = receipt.tls,
                duration_ms = receipt.duration.as_millis() as u64,
                "{} sent to {}",
                capitalized(audience),
                message.to
            ),
            Err(e) => tracing::error!(
                audience = %audience,
                recipient = %message.to,
                stage = %e.stage(),
                transient = e.smtp_error().is_transient(),
                error = %e,
                "{} email failed: {}",
                capitalized(audience),
                e
            ),
        }

        DeliveryReport {
            audience,
            recipient: message.to,
            outcome,
        }
    }
}

fn capitalized(audience: Audience) -> &'static str {
    match audience {
        Audience::Submitter => "Confirmation",
        Audience::Team => "Notification",
    }
}
