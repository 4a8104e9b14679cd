//! Message composition.
//!
//! Turns an [`InquiryRecord`] into the confirmation sent to the submitter or
//! the lead notification sent to the team. Composition is pure: the same
//! record and mailboxes always give the same message.

mod templates;

use crate::config::MailboxConfig;
use crate::mime::normalize_line_endings;
use crate::types::{Audience, EmailMessage, InquiryRecord};

use templates::{SubmitterView, TeamView};

const SUBMITTER_NO_SERVICES: &str = "Not specified";
const TEAM_NO_SERVICES: &str = "None selected";
const NOT_PROVIDED: &str = "Not provided";
const NO_DETAILS: &str = "None";

/// Composes the message for one audience.
pub fn compose(record: &InquiryRecord, audience: Audience, mailboxes: &MailboxConfig) -> EmailMessage {
    match audience {
        Audience::Submitter => compose_confirmation(record, mailboxes),
        Audience::Team => compose_notification(record, mailboxes),
    }
}

fn compose_confirmation(record: &InquiryRecord, mailboxes: &MailboxConfig) -> EmailMessage {
    let services = join_services(&record.services, SUBMITTER_NO_SERVICES);
    let budget = or_placeholder(record.budget.as_deref(), NOT_PROVIDED);

    let text = templates::submitter_text(&SubmitterView {
        first_name: &record.first_name,
        services: &services,
        budget,
    });
    let html = templates::submitter_html(&SubmitterView {
        first_name: &html_escape(&record.first_name),
        services: &html_escape(&services),
        budget: &html_escape(budget),
    });

    EmailMessage {
        to: record.email.clone(),
        subject: single_line(templates::SUBMITTER_SUBJECT),
        text,
        html,
        reply_to: mailboxes.reply_to.clone(),
    }
}

fn compose_notification(record: &InquiryRecord, mailboxes: &MailboxConfig) -> EmailMessage {
    let services = join_services(&record.services, TEAM_NO_SERVICES);
    let phone = or_placeholder(record.phone.as_deref(), NOT_PROVIDED);
    let budget = or_placeholder(record.budget.as_deref(), NOT_PROVIDED);
    let details = normalize_line_endings(
        or_placeholder(record.details.as_deref(), NO_DETAILS),
        "\n",
    );

    let text = templates::team_text(&TeamView {
        first_name: &record.first_name,
        last_name: &record.last_name,
        email: &record.email,
        phone,
        services: &services,
        budget,
        details: &details,
        timestamp: &record.timestamp,
    });
    let html = templates::team_html(&TeamView {
        first_name: &html_escape(&record.first_name),
        last_name: &html_escape(&record.last_name),
        email: &html_escape(&record.email),
        phone: &html_escape(phone),
        services: &html_escape(&services),
        budget: &html_escape(budget),
        details: &html_escape(&details).replace('\n', "<br>"),
        timestamp: &html_escape(&record.timestamp),
    });

    EmailMessage {
        to: mailboxes.notification_address.clone(),
        subject: single_line(&templates::team_subject(&record.first_name, &record.last_name)),
        text,
        html,
        reply_to: record.email.clone(),
    }
}

fn or_placeholder<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => placeholder,
    }
}

fn join_services(services: &[String], placeholder: &str) -> String {
    let joined = services
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    if joined.is_empty() {
        placeholder.to_string()
    } else {
        joined
    }
}

fn single_line(subject: &str) -> String {
    subject.replace(['\r', '\n'], " ")
}

/// Escapes text for inclusion in HTML element content or attribute values.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
