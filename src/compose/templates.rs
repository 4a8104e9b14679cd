//! Message bodies.
//!
//! Every `&str` reaching an `*_html` function must already be HTML-escaped;
//! the `*_text` functions take raw values.

pub(crate) const SUBMITTER_SUBJECT: &str =
    "Thank you for your inquiry \u{2014} Gather Catering and Events";

pub(crate) struct SubmitterView<'a> {
    pub first_name: &'a str,
    pub services: &'a str,
    pub budget: &'a str,
}

pub(crate) struct TeamView<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub services: &'a str,
    pub budget: &'a str,
    pub details: &'a str,
    pub timestamp: &'a str,
}

pub(crate) fn submitter_text(view: &SubmitterView<'_>) -> String {
    [
        format!("Hi {},", view.first_name),
        String::new(),
        "Thank you for reaching out to Gather Catering and Events! We\u{2019}re so glad you got in touch.".to_string(),
        String::new(),
        "We\u{2019}ve received your inquiry and one of our team members will be in touch within 24\u{2013}48 business hours to discuss how we can help bring your vision to life.".to_string(),
        String::new(),
        "Your Details:".to_string(),
        format!("Services: {}", view.services),
        format!("Budget: {}", view.budget),
        String::new(),
        "In the meantime, feel free to reply to this email if you have any questions.".to_string(),
        String::new(),
        "Warm regards,".to_string(),
        "The Gather Catering and Events Team".to_string(),
    ]
    .join("\n")
}

pub(crate) fn submitter_html(view: &SubmitterView<'_>) -> String {
    let mut html = String::with_capacity(2048);

    html.push_str(r#"<!DOCTYPE html><html><head><meta charset="utf-8">"#);
    html.push_str(r#"<link href="https://fonts.googleapis.com/css2?family=Abril+Fatface&display=swap" rel="stylesheet">"#);
    html.push_str(r#"</head><body style="margin:0;padding:0;background-color:#f4f1ea">"#);
    html.push_str(r#"<div style="font-family:'Helvetica Neue',Arial,sans-serif;max-width:600px;margin:0 auto;color:#2c3e50">"#);
    html.push_str(r#"<div style="background-color:#2c3e50;padding:30px;text-align:center">"#);
    html.push_str(&format!(
        r#"<h1 style="color:#f9e3b4;margin:0;font-size:28px">Thank You, {}!</h1>"#,
        view.first_name
    ));
    html.push_str("</div>");
    html.push_str(r#"<div style="padding:30px;background-color:#f4f1ea">"#);
    html.push_str(r#"<p style="font-size:16px;line-height:1.6;color:#2c3e50">"#);
    html.push_str("We\u{2019}re so glad you reached out! We\u{2019}ve received your inquiry and are excited to learn more about your upcoming event.");
    html.push_str("</p>");
    html.push_str(r#"<p style="font-size:16px;line-height:1.6;color:#2c3e50">"#);
    html.push_str("One of our team members will be in touch within <strong>24\u{2013}48 business hours</strong> to discuss how we can help bring your vision to life. In the meantime, feel free to reply to this email if you have any questions.");
    html.push_str("</p>");
    html.push_str(r#"<div style="background-color:rgba(249,227,180,0.3);border-left:4px solid #f9e3b4;padding:15px;margin:25px 0">"#);
    html.push_str(&format!(
        r#"<p style="margin:0;font-size:16px;color:#2c3e50"><strong>Your Details:</strong><br>Services Interested In: {}<br>Budget: {}</p>"#,
        view.services, view.budget
    ));
    html.push_str("</div>");
    html.push_str(r#"<p style="font-size:16px;line-height:1.6;color:#2c3e50;margin-bottom:0">"#);
    html.push_str("Warm regards,<br><strong>The Gather Catering and Events Team</strong>");
    html.push_str("</p>");
    html.push_str("</div>");
    html.push_str(r#"<div style="background-color:#2c3e50;padding:20px;text-align:center">"#);
    html.push_str(r#"<p style="font-family:'Abril Fatface',serif;color:#f9e3b4;margin:0;font-size:36px;letter-spacing:0.05em">GATHER</p>"#);
    html.push_str("</div>");
    html.push_str("</div></body></html>");

    html
}

pub(crate) fn team_subject(first_name: &str, last_name: &str) -> String {
    format!("New Website Lead - {} {}", first_name, last_name)
}

pub(crate) fn team_text(view: &TeamView<'_>) -> String {
    [
        "New inquiry submitted via the Gather website:".to_string(),
        String::new(),
        format!("Name: {} {}", view.first_name, view.last_name),
        format!("Email: {}", view.email),
        format!("Phone: {}", view.phone),
        String::new(),
        format!("Services Interested In: {}", view.services),
        format!("Budget: {}", view.budget),
        String::new(),
        "Additional Details:".to_string(),
        view.details.to_string(),
        String::new(),
        "---".to_string(),
        format!("Submitted: {}", view.timestamp),
    ]
    .join("\n")
}

fn row(label: &str, value: &str) -> String {
    format!(
        r#"<tr><td style="padding:8px;font-weight:bold;vertical-align:top;">{}:</td><td style="padding:8px;">{}</td></tr>"#,
        label, value
    )
}

pub(crate) fn team_html(view: &TeamView<'_>) -> String {
    let name = format!("{} {}", view.first_name, view.last_name);
    let mut html = String::with_capacity(1536);

    html.push_str(&format!(
        r#"<h2 style="font-family:sans-serif;">New Website Lead &mdash; {}</h2>"#,
        name
    ));
    html.push_str(r#"<table style="border-collapse:collapse;font-family:sans-serif;">"#);
    html.push_str(&row("Name", &name));
    html.push_str(&row(
        "Email",
        &format!(r#"<a href="mailto:{0}">{0}</a>"#, view.email),
    ));
    html.push_str(&row("Phone", view.phone));
    html.push_str(&row("Services", view.services));
    html.push_str(&row("Budget", view.budget));
    html.push_str(&row("Details", view.details));
    html.push_str("</table><hr>");
    html.push_str(&format!(
        r#"<p style="color:#999;font-size:12px;">Submitted: {}</p>"#,
        view.timestamp
    ));

    html
}
