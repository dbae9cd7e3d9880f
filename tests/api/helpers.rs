use std::sync::Arc;

use once_cell::sync::Lazy;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;

use pubsubhub::configuration::get_configuration;
use pubsubhub::configuration::DatabaseSettings;
use pubsubhub::dispatch::Queue;
use pubsubhub::startup::get_connection_pool;
use pubsubhub::startup::AppState;
use pubsubhub::startup::Application;
use pubsubhub::store;
use pubsubhub::telemetry::get_subscriber;
use pubsubhub::telemetry::init_subscriber;
use pubsubhub::workers;

/// Init a static subscriber using the `once_cell` crate; alternatives include
/// `std::cell::OnceCell` and `lazy_static` (crate).
///
/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub struct TestApp {
    pub addr: String,
    pub port: u16,
    pub pool: PgPool,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub async fn post_publish(
        &self,
        urls: &[&str],
    ) -> reqwest::Response {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        ser.append_pair("hub.mode", "publish");
        for u in urls {
            ser.append_pair("hub.url", u);
        }
        self.post_form("/publish", ser.finish()).await
    }

    pub async fn post_subscribe(
        &self,
        fields: &[(&str, &str)],
    ) -> reqwest::Response {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in fields {
            ser.append_pair(k, v);
        }
        self.post_form("/subscribe", ser.finish()).await
    }

    async fn post_form(
        &self,
        path: &str,
        body: String,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}{path}", self.addr))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    /// Seeds a `KnownFeed` row so publish ingestion doesn't drop the topic
    /// for lack of an identity-index entry (§4.9).
    pub async fn seed_known_feed(
        &self,
        topic: &str,
    ) {
        store::known_feed::upsert(&self.pool, topic, None).await.unwrap();
    }

    /// Claims and runs at most one due task on `queue`, the same step the
    /// background worker loops repeat forever; returns whether anything was
    /// due.
    pub async fn drain_one(
        &self,
        queue: Queue,
    ) -> bool {
        workers::process_one(&self.state, queue).await.unwrap()
    }

    /// Drains `queue` until empty. Bounded so a stuck fixture fails the test
    /// instead of hanging.
    pub async fn drain_all(
        &self,
        queue: Queue,
    ) {
        for _ in 0..100 {
            if !self.drain_one(queue).await {
                return;
            }
        }
        panic!("queue {} did not drain within 100 iterations", queue.as_str());
    }
}

/// Read `DatabaseSettings` and create a db with a randomised name (but with
/// the same migrations/tables, specified in the `migrations` directory). The
/// connection to this db can then be used to run a single test.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running; run scripts/init_db.sh");

    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .unwrap();

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!().run(&pool).await.expect("failed to migrate");
    pool
}

/// Spawn a `TestApp` containing default config (randomised db, random port,
/// `dev_env` forced on so the §6 URL policy accepts wiremock's arbitrary
/// localhost ports), with the server and no background worker loops running
/// — tests drive the queues deterministically via `TestApp::drain_one`.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let cfg = {
        let mut rand_cfg = get_configuration().unwrap();
        rand_cfg.database.database_name = Uuid::new_v4().to_string();
        rand_cfg.application.port = 0;
        rand_cfg.application.dev_env = true;
        rand_cfg
    };

    configure_database(&cfg.database).await;

    let application = Application::build(&cfg).await.unwrap();
    let port = application.get_port();
    let addr = format!("http://localhost:{port}");
    let state = application.state();
    let pool = get_connection_pool(&cfg.database);

    tokio::spawn(application.run_until_stopped());

    TestApp { addr, port, pool, state }
}
