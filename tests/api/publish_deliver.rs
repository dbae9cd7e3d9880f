use pubsubhub::dispatch::Queue;
use pubsubhub::publish;
use pubsubhub::store;
use pubsubhub::utils::entity_key;
use pubsubhub::utils::sha1_hmac_hex;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

const ATOM_ONE_ENTRY: &str = r#"<?xml version="1.0"?>
<feed>
<title>Widget Feed</title>
<entry><id>urn:widget:1</id><title>First post</title></entry>
</feed>"#;

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

/// End to end: a verified subscriber, a publish ping, a feed fetch that
/// surfaces one new entry, and a signed delivery to the subscriber callback.
#[tokio::test]
async fn publish_triggers_fetch_and_signed_delivery() {
    let app = spawn_app().await;

    let feed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM_ONE_ENTRY))
        .mount(&feed_server)
        .await;

    let subscriber_server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(EchoChallenge).mount(&subscriber_server).await;

    let topic = format!("{}/feed", feed_server.uri());
    let callback = format!("{}/callback", subscriber_server.uri());

    let resp = app
        .post_subscribe(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", &topic),
            ("hub.callback", &callback),
            ("hub.verify", "sync"),
            ("hub.verify_token", "widget-token"),
        ])
        .await;
    assert_eq!(resp.status().as_u16(), 204);

    app.seed_known_feed(&topic).await;

    let resp = app.post_publish(&[&topic]).await;
    assert_eq!(resp.status().as_u16(), 204);

    app.drain_all(Queue::FeedPulls).await;

    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&subscriber_server).await;

    app.drain_all(Queue::EventDelivery).await;

    let received = subscriber_server.received_requests().await.unwrap();
    let deliveries: Vec<_> = received.iter().filter(|r| r.method.as_str().eq_ignore_ascii_case("POST")).collect();
    assert_eq!(deliveries.len(), 1, "subscriber should have received exactly one delivery");

    let delivery = deliveries[0];
    let signature_header =
        delivery.headers.get("x-hub-signature").expect("delivery must carry X-Hub-Signature").to_str().unwrap();
    let expected = format!("sha1={}", sha1_hmac_hex(b"widget-token", &delivery.body));
    assert_eq!(signature_header, expected);
    assert!(String::from_utf8_lossy(&delivery.body).contains("First post"));

    let topic_hash = entity_key(&topic);
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_to_deliver WHERE topic_hash = $1")
        .bind(&topic_hash)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0, "successfully delivered event should be deleted");
}

/// §4.9: publishing one alias of a known feed identity must also enqueue a
/// fetch for every other topic mapped to that same identity.
#[tokio::test]
async fn publish_of_aliased_topic_enqueues_fetch_for_every_alias() {
    let app = spawn_app().await;

    let feed_id = "tag:example.test,2024:widget";
    let topic_a = "http://a.example.test/feed";
    let topic_b = "http://b.example.test/feed";

    store::known_feed::upsert(&app.pool, topic_a, Some(feed_id)).await.unwrap();
    store::known_feed::upsert(&app.pool, topic_b, Some(feed_id)).await.unwrap();
    store::known_feed_identity::add_topic(&app.pool, feed_id, topic_a).await.unwrap();
    store::known_feed_identity::add_topic(&app.pool, feed_id, topic_b).await.unwrap();

    let enqueued = publish::ingest_publish(
        &app.pool,
        &app.state.dispatcher,
        &app.state.fork_join,
        &app.state.hooks,
        &[topic_a.to_string()],
        true,
        app.state.hub.max_aliases,
        publish::PublishSource::Publish,
    )
    .await
    .unwrap();

    assert_eq!(enqueued, 2);

    for topic in [topic_a, topic_b] {
        let row = store::feed_to_fetch::get(&app.pool, topic).await.unwrap();
        assert!(row.is_some(), "expected a feed_to_fetch row for {topic}");
    }
}

/// Publishing a topic with no `KnownFeed` row is a no-op, not an error —
/// the hub doesn't fetch feeds it has never learned about through a
/// subscription.
#[tokio::test]
async fn publish_of_unknown_topic_enqueues_nothing() {
    let app = spawn_app().await;
    let resp = app.post_publish(&["http://unknown.example.test/feed"]).await;
    assert_eq!(resp.status().as_u16(), 204);

    let row = store::feed_to_fetch::get(&app.pool, "http://unknown.example.test/feed").await.unwrap();
    assert!(row.is_none());
}
