use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use actix_web_lab::middleware::from_fn;
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::auth_gate::work_queue_only;
use crate::auth_gate::DevEnv;
use crate::configuration::DatabaseSettings;
use crate::configuration::HubSettings;
use crate::configuration::Settings;
use crate::dispatch::TaskDispatcher;
use crate::event_builder::EventBuilderConfig;
use crate::hooks::HookRegistry;
use crate::identity::FeedIdentityExtractor;
use crate::identity::SimpleFeedIdentityExtractor;
use crate::polling::PollingConfig;
use crate::polling::PollingSweeper;
use crate::puller::FeedPuller;
use crate::puller::PullerConfig;
use crate::pusher::EventDeliverer;
use crate::pusher::PusherConfig;
use crate::queue::ForkJoinQueue;
use crate::queue::ForkJoinQueueConfig;
use crate::rate_limit::RateLimiter;
use crate::routes;
use crate::scoring::FailureScorer;
use crate::subscriptions::verification::no_redirect_client;
use crate::subscriptions::SubscriptionManager;

/// Everything a route handler or background worker loop needs, built once at
/// startup. Routes reach it as `web::Data<AppState>`; `main` hands the same
/// `Arc` to `workers::spawn_all` so both surfaces share one set of
/// connections, scorers and in-memory queues instead of each growing their
/// own.
pub struct AppState {
    pub pool: PgPool,
    pub dispatcher: TaskDispatcher,
    pub fork_join: Arc<ForkJoinQueue<String>>,
    pub hooks: Arc<HookRegistry>,
    pub subscriptions: SubscriptionManager,
    pub puller: Arc<FeedPuller>,
    pub deliverer: Arc<EventDeliverer>,
    pub polling: Arc<PollingSweeper>,
    pub fetch_scorer: Arc<FailureScorer>,
    pub delivery_scorer: Arc<FailureScorer>,
    pub identity_extractor: Arc<dyn FeedIdentityExtractor>,
    pub identity_client: Client,
    pub hub: HubSettings,
    pub dev_env: bool,
    pub publish_limiter: RateLimiter,
    pub subscribe_limiter: RateLimiter,
}

/// Wrapper for actix's `Server` with access to the bound port and the shared
/// state, so `main` can spawn the background worker loops against the exact
/// same components the HTTP routes use.
pub struct Application {
    port: u16,
    server: Server,
    state: Arc<AppState>,
}

impl Application {
    pub async fn build(cfg: &Settings) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&cfg.database);
        let state = Arc::new(build_state(pool, &cfg.hub, cfg.application.dev_env)?);

        let server = run(listener, state.clone())?;

        Ok(Self { port, server, state })
    }

    pub fn get_port(&self) -> u16 { self.port }

    pub fn state(&self) -> Arc<AppState> { self.state.clone() }

    /// Because this consumes `self`, this should be the final call (or be
    /// raced against the worker loops with `tokio::select!`).
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// Wires every backend component together from configuration. Kept separate
/// from `Application::build` so tests can construct an `AppState` against a
/// per-test database without also binding a TCP listener.
pub fn build_state(
    pool: PgPool,
    hub: &HubSettings,
    dev_env: bool,
) -> Result<AppState, anyhow::Error> {
    let dispatcher = TaskDispatcher::new(pool.clone());
    let fork_join = Arc::new(ForkJoinQueue::new(ForkJoinQueueConfig {
        batch_size: hub.batch_size,
        batch_period_ms: hub.batch_period_ms,
        acquire_attempts: hub.acquire_attempts,
        acquire_timeout_ms: hub.acquire_timeout_ms,
        expiration_seconds: hub.queue_item_expiration_seconds,
    }));
    let hooks = Arc::new(HookRegistry::new());

    let fetch_scorer = Arc::new(FailureScorer::new(
        "fetch",
        hub.scorer_period_seconds,
        hub.fetch_scorer_min_requests_per_sec,
        hub.fetch_scorer_max_failure_fraction,
    ));
    let delivery_scorer = Arc::new(FailureScorer::new(
        "delivery",
        hub.scorer_period_seconds,
        hub.delivery_scorer_min_requests_per_sec,
        hub.delivery_scorer_max_failure_fraction,
    ));

    let verify_client = no_redirect_client(Duration::from_secs(10))?;
    let subscriptions = SubscriptionManager::new(
        pool.clone(),
        dispatcher.clone(),
        verify_client,
        hub.max_subscription_confirm_failures,
        hub.retry_backoff_base_seconds,
    );

    let puller = Arc::new(FeedPuller::new(
        pool.clone(),
        dispatcher.clone(),
        fetch_scorer.clone(),
        PullerConfig {
            fetch_deadline_seconds: hub.fetch_deadline_seconds,
            max_redirects: hub.max_redirects,
            max_feed_pull_failures: hub.max_feed_pull_failures,
            retry_backoff_base_seconds: hub.retry_backoff_base_seconds,
            event_builder: EventBuilderConfig {
                max_feed_entry_record_lookups: hub.max_feed_entry_record_lookups,
                max_new_feed_entry_records: hub.max_new_feed_entry_records,
                max_delivery_failures: hub.max_delivery_failures as i32,
            },
        },
    )?);

    let deliverer = Arc::new(EventDeliverer::new(
        pool.clone(),
        dispatcher.clone(),
        delivery_scorer.clone(),
        PusherConfig {
            event_subscriber_chunk_size: hub.event_subscriber_chunk_size,
            max_delivery_failures: hub.max_delivery_failures as i32,
            retry_backoff_base_seconds: hub.retry_backoff_base_seconds,
            delivery_deadline_seconds: hub.delivery_deadline_seconds,
        },
    )?);

    let polling = Arc::new(PollingSweeper::new(
        pool.clone(),
        dispatcher.clone(),
        fork_join.clone(),
        hooks.clone(),
        PollingConfig {
            bootstrap_period_seconds: hub.polling_bootstrap_period_seconds,
            feed_chunk_size: hub.polling_feed_chunk_size,
            max_aliases: hub.max_aliases,
            dev_env,
        },
    ));

    let identity_client = Client::builder().timeout(Duration::from_secs(10)).build()?;

    Ok(AppState {
        pool,
        dispatcher,
        fork_join,
        hooks,
        subscriptions,
        puller,
        deliverer,
        polling,
        fetch_scorer,
        delivery_scorer,
        identity_extractor: Arc::new(SimpleFeedIdentityExtractor),
        identity_client,
        hub: hub.clone(),
        dev_env,
        // §6: 100 publish pings/s hub-wide, 10 subscribe requests/s per callback.
        publish_limiter: RateLimiter::new(100.0),
        subscribe_limiter: RateLimiter::new(10.0),
    })
}

/// Declares all API endpoints. The `/work/*` scope is the externally
/// triggerable twin of the `workers` background loops — same `process_one`
/// step, reachable over HTTP for an operator or a cron-style trigger instead
/// of waiting on the in-process poll.
pub fn run(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<Server, anyhow::Error> {
    let state_data = Data::from(state.clone());
    let dev_env_data = Data::new(DevEnv(state.dev_env));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(routes::health_check::health_check))
            .route("/", web::post().to(routes::multiplex))
            .route("/publish", web::post().to(routes::publish::publish))
            .route("/subscribe", web::post().to(routes::subscribe::subscribe))
            .route("/topic-details", web::get().to(routes::diagnostics::topic_details))
            .route("/subscription-details", web::get().to(routes::diagnostics::subscription_details))
            .route("/stats", web::get().to(routes::diagnostics::stats))
            .service(
                web::scope("/work")
                    .wrap(from_fn(work_queue_only))
                    .route("/subscriptions", web::post().to(routes::work::drain_subscriptions))
                    .route("/feed-pulls", web::post().to(routes::work::drain_feed_pulls))
                    .route("/feed-pulls-retries", web::post().to(routes::work::drain_feed_pulls_retries))
                    .route("/event-delivery", web::post().to(routes::work::drain_event_delivery))
                    .route("/event-delivery-retries", web::post().to(routes::work::drain_event_delivery_retries))
                    .route("/polling", web::post().to(routes::work::drain_polling))
                    .route("/mappings", web::post().to(routes::work::drain_mappings))
                    .route("/cleanup", web::post().to(routes::work::run_cleanup)),
            )
            .app_data(state_data.clone())
            .app_data(dev_env_data.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
