//! Core types for the inquiry relay.
//!
//! This module provides:
//! - The inquiry form wire shape and its validated record
//! - Address type used for the envelope and headers
//! - Composed message and per-send result types

use std::fmt;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DeliveryError, RequestError, SmtpError, SmtpErrorKind, SmtpResult};

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "Gather Catering and Events").
    pub name: Option<String>,
    /// Email address.
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> SmtpResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> SmtpResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self {
            name: Some(name.into()),
            email,
        })
    }

    /// Only emptiness and control characters are checked; syntax is left to
    /// the relay.
    fn validate_email(email: &str) -> SmtpResult<()> {
        if email.trim().is_empty() {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidRecipientAddress,
                "Email address cannot be empty",
            ));
        }

        if email.chars().any(|c| c.is_control()) {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidRecipientAddress,
                "Email address cannot contain control characters",
            ));
        }

        Ok(())
    }

    /// Returns the email part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Inquiry form as posted by the website.
///
/// Every field may be missing or `null`; [`InquiryRecord::try_from`] decides
/// what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InquiryForm {
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Contact address of the submitter.
    pub email: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
    /// Services ticked on the form.
    pub services: Option<Vec<String>>,
    /// Free-form budget.
    pub budget: Option<String>,
    /// Free-form event details.
    pub details: Option<String>,
    /// Client-side submission time.
    pub timestamp: Option<String>,
}

/// A validated inquiry.
///
/// Required fields are trimmed and non-empty. Optional fields are `None`
/// when missing or blank, and `services` holds no blank entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryRecord {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Submitter address; the confirmation goes here.
    pub email: String,
    /// Contact phone number.
    pub phone: Option<String>,
    /// Selected services, in form order.
    pub services: Vec<String>,
    /// Free-form budget.
    pub budget: Option<String>,
    /// Free-form details, line breaks preserved.
    pub details: Option<String>,
    /// RFC 3339 submission time.
    pub timestamp: String,
}

impl InquiryRecord {
    /// Returns "first last".
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

fn required(value: Option<String>) -> Result<String, RequestError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(RequestError::MissingFields),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<InquiryForm> for InquiryRecord {
    type Error = RequestError;

    fn try_from(form: InquiryForm) -> Result<Self, Self::Error> {
        let first_name = required(form.first_name)?;
        let last_name = required(form.last_name)?;
        let email = required(form.email)?;

        let services = form
            .services
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();

        let timestamp = optional(form.timestamp)
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        Ok(Self {
            first_name,
            last_name,
            email,
            phone: optional(form.phone),
            services,
            budget: optional(form.budget),
            details: optional(form.details),
            timestamp,
        })
    }
}

/// Who a composed message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// The person who filled in the form.
    Submitter,
    /// The internal catering team.
    Team,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Submitter => write!(f, "confirmation"),
            Audience::Team => write!(f, "notification"),
        }
    }
}

/// A composed message, ready for MIME encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line (single line).
    pub subject: String,
    /// Plain-text body, `\n` line endings.
    pub text: String,
    /// HTML body.
    pub html: String,
    /// Reply-To address.
    pub reply_to: String,
}

/// Details of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Recipient the relay accepted.
    pub recipient: String,
    /// Final reply to the message data.
    pub response: String,
    /// Whether the session ran over TLS.
    pub tls: bool,
    /// Time taken for the whole session.
    pub duration: Duration,
}

/// Outcome of one of the two sends in a submission.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Which message this was.
    pub audience: Audience,
    /// Recipient address.
    pub recipient: String,
    /// Receipt or the classified failure.
    pub outcome: Result<SendReceipt, DeliveryError>,
}

impl DeliveryReport {
    /// Returns true if the relay accepted the message.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Aggregated result of one submission.
#[derive(Debug)]
pub struct SubmissionResult {
    /// Confirmation sent to the submitter.
    pub confirmation: DeliveryReport,
    /// Lead notification sent to the team.
    pub notification: DeliveryReport,
}

impl SubmissionResult {
    /// Returns true only if both messages were accepted.
    pub fn is_success(&self) -> bool {
        self.confirmation.is_success() && self.notification.is_success()
    }

    /// Iterates over the failed sends.
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryReport> {
        [&self.confirmation, &self.notification]
            .into_iter()
            .filter(|r| !r.is_success())
    }
}
