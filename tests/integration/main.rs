//! End-to-end tests: HTTP requests through the router to an in-process relay.

mod cors;
mod submit;

use std::net::SocketAddr;
use std::sync::Arc;

use gather_inquiry::http::{self, AppState};
use gather_inquiry::mocks::{FakeRelay, FakeRelayBehavior};
use gather_inquiry::{DeliveryOrchestrator, MailboxConfig, RelayClient, RelayConfig};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SENDER: &str = "web-inquiry@gather.test";
pub const TEAM: &str = "leads@gather.test";
pub const REPLY_TO: &str = "catering@gather.test";
pub const ALLOWED_ORIGIN: &str = "https://gathercateringandevents.com";

/// A running application bound to a loopback port.
pub struct TestApp {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestApp {
    pub fn submit_url(&self) -> String {
        format!("{}/submit", self.base_url)
    }
}

pub fn mailboxes() -> MailboxConfig {
    MailboxConfig {
        from_address: SENDER.to_string(),
        from_name: "Gather Catering and Events".to_string(),
        notification_address: TEAM.to_string(),
        reply_to: REPLY_TO.to_string(),
    }
}

pub async fn start_app(relay: RelayConfig) -> TestApp {
    let client = RelayClient::new(relay, &mailboxes()).expect("Failed to build relay client");
    let orchestrator = DeliveryOrchestrator::new(mailboxes(), Arc::new(client));
    let state = AppState::new(orchestrator, vec![ALLOWED_ORIGIN.to_string()]);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr: SocketAddr = listener.local_addr().expect("No local address");
    let handle = tokio::spawn(async move {
        let _ = http::serve(listener, state, std::future::pending()).await;
    });

    TestApp {
        base_url: format!("http://{}", addr),
        handle,
    }
}

pub async fn start_with_relay(behavior: FakeRelayBehavior) -> (TestApp, FakeRelay) {
    let relay = FakeRelay::start_with(behavior).await.expect("Failed to start relay");
    let app = start_app(relay.relay_config()).await;
    (app, relay)
}

pub fn ada() -> Value {
    json!({
        "firstName": "Ada",
        "lastName": "Lovelace",
        "email": "ada@example.com",
        "services": ["Catering", "Bar Service"],
        "timestamp": "2025-03-01T12:00:00Z"
    })
}

pub async fn post_json(app: &TestApp, body: &Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(app.submit_url())
        .json(body)
        .send()
        .await
        .expect("Request failed");
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.expect("Response is not JSON");
    (status, body)
}
