use pubsubhub::dispatch::Queue;
use wiremock::matchers::method;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

/// Echoes back whatever `hub.challenge` the hub sent, the way a well-behaved
/// subscriber callback does during verification.
struct EchoChallenge;

impl Respond for EchoChallenge {
    fn respond(
        &self,
        request: &Request,
    ) -> ResponseTemplate {
        let challenge = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "hub.challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_string(challenge)
    }
}

#[tokio::test]
async fn subscribe_sync_verified_returns_no_content() {
    let app = spawn_app().await;
    let subscriber = MockServer::start().await;
    Mock::given(method("GET")).respond_with(EchoChallenge).mount(&subscriber).await;

    let callback = format!("{}/callback", subscriber.uri());
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.test/feed"),
            ("hub.callback", &callback),
            ("hub.verify", "sync"),
            ("hub.verify_token", "tok-1"),
        ])
        .await;

    assert_eq!(resp.status().as_u16(), 204);

    let row = pubsubhub::store::subscription::get(&app.pool, &callback, "http://example.test/feed")
        .await
        .unwrap()
        .expect("subscription row should exist after verification");
    assert_eq!(row.state().as_str(), "verified");
}

#[tokio::test]
async fn subscribe_sync_wrong_challenge_returns_conflict_and_tracks_failure() {
    let app = spawn_app().await;
    let subscriber = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not-the-challenge"))
        .mount(&subscriber)
        .await;

    let callback = format!("{}/callback", subscriber.uri());
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.test/feed"),
            ("hub.callback", &callback),
            ("hub.verify", "sync"),
            ("hub.verify_token", "tok-2"),
        ])
        .await;

    assert_eq!(resp.status().as_u16(), 409);

    let row = pubsubhub::store::subscription::get(&app.pool, &callback, "http://example.test/feed")
        .await
        .unwrap()
        .expect("a pending row must exist so the failure has somewhere to land");
    assert_eq!(row.state().as_str(), "not_verified");
    assert_eq!(row.confirm_failures, 1);
}

#[tokio::test]
async fn subscribe_async_returns_accepted_then_verifies_via_queue() {
    let app = spawn_app().await;
    let subscriber = MockServer::start().await;
    Mock::given(method("GET")).respond_with(EchoChallenge).mount(&subscriber).await;

    let callback = format!("{}/callback", subscriber.uri());
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.test/async-feed"),
            ("hub.callback", &callback),
            ("hub.verify", "async"),
            ("hub.verify_token", "tok-3"),
        ])
        .await;
    assert_eq!(resp.status().as_u16(), 202);

    let row = pubsubhub::store::subscription::get(&app.pool, &callback, "http://example.test/async-feed")
        .await
        .unwrap()
        .expect("request_insert should have created a pending row immediately");
    assert_eq!(row.state().as_str(), "not_verified");

    app.drain_all(Queue::Subscriptions).await;

    let row = pubsubhub::store::subscription::get(&app.pool, &callback, "http://example.test/async-feed")
        .await
        .unwrap()
        .expect("row should still exist after verification");
    assert_eq!(row.state().as_str(), "verified");
}

#[tokio::test]
async fn unsubscribe_of_unknown_subscription_is_a_no_op_no_content() {
    let app = spawn_app().await;
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "unsubscribe"),
            ("hub.topic", "http://example.test/never-subscribed"),
            ("hub.callback", "http://subscriber.test/callback"),
            ("hub.verify", "sync"),
        ])
        .await;
    assert_eq!(resp.status().as_u16(), 204);
}

#[tokio::test]
async fn subscribe_rejects_malformed_topic() {
    let app = spawn_app().await;
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "not-a-url"),
            ("hub.callback", "http://subscriber.test/callback"),
            ("hub.verify", "sync"),
        ])
        .await;
    assert_eq!(resp.status().as_u16(), 400);
}
