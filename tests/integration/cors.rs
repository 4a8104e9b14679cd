//! CORS behavior.

use super::*;

#[tokio::test]
async fn test_preflight_from_allowed_origin() {
    let (app, _relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, app.submit_url())
        .header("Origin", ALLOWED_ORIGIN)
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], ALLOWED_ORIGIN);
    assert_eq!(headers["vary"], "Origin");
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(headers["access-control-allow-headers"], "Content-Type");
}

#[tokio::test]
async fn test_unknown_origin_gets_no_allow_origin() {
    let (app, _relay) = start_with_relay(FakeRelayBehavior::default()).await;

    let response = reqwest::Client::new()
        .post(app.submit_url())
        .header("Origin", "https://elsewhere.example")
        .json(&ada())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let headers = response.headers();
    assert!(headers.get("access-control-allow-origin").is_none());
    assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
}
