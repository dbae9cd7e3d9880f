use wiremock::matchers::method;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

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

/// `/work/*` is reachable without the internal-queue header in `dev_env`
/// (the test harness always runs with it on), and `POST /work/subscriptions`
/// drains exactly the same queued verify task `workers::process_one` would.
#[tokio::test]
async fn work_subscriptions_endpoint_drains_a_pending_verification() {
    let app = spawn_app().await;
    let subscriber = MockServer::start().await;
    Mock::given(method("GET")).respond_with(EchoChallenge).mount(&subscriber).await;

    let callback = format!("{}/callback", subscriber.uri());
    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.test/work-gate-feed"),
            ("hub.callback", &callback),
            ("hub.verify", "async"),
            ("hub.verify_token", "tok-work-gate"),
        ])
        .await;
    assert_eq!(resp.status().as_u16(), 202);

    let work_resp = reqwest::Client::new().post(format!("{}/work/subscriptions", app.addr)).send().await.unwrap();
    assert_eq!(work_resp.status().as_u16(), 204);

    let row = pubsubhub::store::subscription::get(&app.pool, &callback, "http://example.test/work-gate-feed")
        .await
        .unwrap()
        .expect("row should still exist");
    assert_eq!(row.state().as_str(), "verified");
}

/// Draining an empty queue is still a success (§6): there was simply nothing
/// due.
#[tokio::test]
async fn work_mappings_endpoint_succeeds_on_an_empty_queue() {
    let app = spawn_app().await;
    let resp = reqwest::Client::new().post(format!("{}/work/mappings", app.addr)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);
}
