//! Submission flow.

use std::time::Duration;

use super::*;

#[tokio::test]
async fn test_ada_lovelace_submission() {
    let (app, relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let (status, body) = post_json(&app, &ada()).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "status": "success" }));

    let sessions = relay.sessions();
    assert_eq!(sessions.len(), 2);

    let confirmation = &sessions[0];
    assert_eq!(confirmation.mail_from.as_deref(), Some(SENDER));
    assert_eq!(confirmation.recipients, vec!["ada@example.com".to_string()]);
    let data = confirmation.data.as_deref().expect("confirmation has no data");
    assert!(data.starts_with(&format!(
        "From: Gather Catering and Events <{}>\r\nTo: ada@example.com\r\nSubject: =?UTF-8?B?",
        SENDER
    )));
    assert!(data.contains(&format!("\r\nReply-To: {}\r\n", REPLY_TO)));
    assert!(data.contains("Hi Ada,"));
    assert!(data.contains("Services: Catering, Bar Service"));
    assert!(data.contains("Budget: Not provided"));
    assert_eq!(confirmation.commands.last().map(String::as_str), Some("QUIT"));

    let notification = &sessions[1];
    assert_eq!(notification.recipients, vec![TEAM.to_string()]);
    let data = notification.data.as_deref().expect("notification has no data");
    assert!(data.starts_with(&format!(
        "From: Gather Catering and Events <{}>\r\n\
         To: {}\r\n\
         Subject: New Website Lead - Ada Lovelace\r\n\
         Reply-To: ada@example.com\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/alternative; boundary=\"GatherBoundary42\"\r\n\
         \r\n\
         --GatherBoundary42\r\n\
         Content-Type: text/plain; charset=utf-8\r\n",
        SENDER, TEAM
    )));
    assert!(data.contains("\r\n--GatherBoundary42\r\nContent-Type: text/html; charset=utf-8\r\n"));
    assert!(data.ends_with("--GatherBoundary42--\r\n"));
    assert!(data.contains("Submitted: 2025-03-01T12:00:00Z"));
}

#[tokio::test]
async fn test_rejected_notification_still_delivers_confirmation() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        reject_recipients: vec![TEAM.to_string()],
        ..Default::default()
    })
    .await;

    let (status, body) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": "Email delivery failed" }));

    let sessions = relay.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].data.is_some());
    assert!(sessions[1].recipients.is_empty());
    assert!(sessions[1].data.is_none());
    assert_eq!(sessions[1].commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_rejected_confirmation_still_delivers_notification() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        reject_recipients: vec!["ada@example.com".to_string()],
        ..Default::default()
    })
    .await;

    let (status, _) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);

    let sessions = relay.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].data.is_none());
    assert_eq!(sessions[1].recipients, vec![TEAM.to_string()]);
    assert!(sessions[1].data.is_some());
}

#[tokio::test]
async fn test_relay_refusing_data() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        reject_data: true,
        ..Default::default()
    })
    .await;

    let (status, _) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);
    assert_eq!(relay.sessions().len(), 2);
}

#[tokio::test]
async fn test_starttls_refused_by_relay() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        advertise_starttls: true,
        ..Default::default()
    })
    .await;

    let (status, _) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);

    for session in relay.sessions() {
        assert!(session.commands.iter().any(|c| c == "STARTTLS"));
        assert!(session.mail_from.is_none());
    }
}

#[tokio::test]
async fn test_unreachable_relay() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = RelayConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .connect_timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap();
    let app = start_app(config).await;

    let (status, body) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": "Email delivery failed" }));
}

#[tokio::test]
async fn test_leading_dots_survive_transport() {
    let (app, relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let mut inquiry = ada();
    inquiry["details"] = json!("Menu:\n.appetizers\n.mains");

    let (status, _) = post_json(&app, &inquiry).await;
    assert_eq!(status, 200);

    let sessions = relay.sessions();
    let data = sessions[1].data.as_deref().unwrap();
    assert!(data.contains("Additional Details:\r\nMenu:\r\n.appetizers\r\n.mains\r\n"));
}

#[tokio::test]
async fn test_missing_email_sends_nothing() {
    let (app, relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let mut inquiry = ada();
    inquiry["email"] = json!("   ");

    let (status, body) = post_json(&app, &inquiry).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Missing required fields" }));
    assert!(relay.sessions().is_empty());
}

#[tokio::test]
async fn test_invalid_body() {
    let (app, relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let response = reqwest::Client::new()
        .post(app.submit_url())
        .header("Content-Type", "application/json")
        .body("{\"firstName\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Invalid request body" }));
    assert!(relay.sessions().is_empty());
}

#[tokio::test]
async fn test_array_body_is_rejected() {
    let (app, relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let (status, body) = post_json(&app, &json!(["Ada", "Lovelace", "ada@example.com"])).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Invalid request body" }));
    assert!(relay.sessions().is_empty());
}

#[tokio::test]
async fn test_rejected_sender_fails_both_sends() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        reject_mail_from: true,
        ..Default::default()
    })
    .await;

    let (status, body) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": "Email delivery failed" }));

    let sessions = relay.sessions();
    assert_eq!(sessions.len(), 2);
    for session in &sessions {
        assert!(session.mail_from.is_none());
        assert!(session.recipients.is_empty());
        assert!(!session.commands.iter().any(|c| c.starts_with("RCPT")));
        assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
    }
}

#[tokio::test]
async fn test_unanswered_quit_fails_the_submission() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        drop_on_quit: true,
        ..Default::default()
    })
    .await;

    let (status, _) = post_json(&app, &ada()).await;
    assert_eq!(status, 500);

    let sessions = relay.sessions();
    assert_eq!(sessions.len(), 2);
    for session in &sessions {
        assert!(session.data.is_some());
        assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
    }
}

#[tokio::test]
async fn test_sends_finish_after_client_disconnects() {
    let (app, relay) = start_with_relay(FakeRelayBehavior {
        greeting_delay: Duration::from_millis(400),
        ..Default::default()
    })
    .await;

    let result = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap()
        .post(app.submit_url())
        .json(&ada())
        .send()
        .await;
    assert!(result.is_err());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let delivered = relay.sessions().iter().filter(|s| s.data.is_some()).count();
        if delivered == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of 2 messages reached the relay",
            delivered
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let sessions = relay.sessions();
    assert_eq!(sessions[0].recipients, vec!["ada@example.com".to_string()]);
    assert_eq!(sessions[1].recipients, vec![TEAM.to_string()]);
}
