use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;
use sqlx::postgres::PgSslMode;

/// Top-level settings, loaded from `configuration/base.yaml` plus an
/// environment-specific overlay, then overridden by `HUB__*` env vars.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub hub: HubSettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
    /// Allows `/work/*` to be called without the internal-queue header, and
    /// lifts the §6 port allowlist. Never set outside local development.
    pub dev_env: bool,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> Secret<String> {
        Secret::new(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database_name,
        ))
    }

    /// Connection options pointed at this settings' specific database.
    pub fn connection(&self) -> PgConnectOptions {
        self.connection_without_db().database(&self.database_name)
    }

    /// Connection options with no database selected, for creating one ahead
    /// of running migrations (used by the test harness).
    pub fn connection_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(PgSslMode::Prefer)
    }
}

/// Knobs the original hub exposed as top-of-file constants (§4, §5).
#[derive(Deserialize, Clone)]
pub struct HubSettings {
    /// §4.1 scorer: window length for both the fetch and delivery scorers.
    pub scorer_period_seconds: u64,
    pub fetch_scorer_min_requests_per_sec: f64,
    pub fetch_scorer_max_failure_fraction: f64,
    pub delivery_scorer_min_requests_per_sec: f64,
    pub delivery_scorer_max_failure_fraction: f64,

    /// §4.3 fork-join queue.
    pub batch_size: usize,
    pub batch_period_ms: u64,
    pub acquire_attempts: u32,
    pub acquire_timeout_ms: u64,
    pub queue_item_expiration_seconds: i64,

    /// §4.4-4.8 retry/backoff discipline (shared base-30s exponential backoff).
    pub max_subscription_confirm_failures: u32,
    pub max_feed_pull_failures: u32,
    pub max_delivery_failures: u32,
    pub retry_backoff_base_seconds: i64,
    pub max_lease_seconds: i64,

    /// §4.6/§4.8 per-request fan-out sizes.
    pub event_subscriber_chunk_size: i64,
    pub max_redirects: u32,
    pub fetch_deadline_seconds: u64,
    pub delivery_deadline_seconds: u64,

    /// §4.7 diff/event-building limits.
    pub max_feed_entry_record_lookups: usize,
    pub max_new_feed_entry_records: usize,

    /// §4.9 identity index safety cap.
    pub max_aliases: usize,
    pub known_feed_refresh_period_days: i64,

    /// §4.10 bootstrap polling cadence.
    pub polling_bootstrap_period_seconds: i64,
    pub polling_feed_chunk_size: i64,

    /// §9 supplemented cleanup sweep: grace period before a `to_delete`
    /// subscription is actually removed, and how often the sweep runs.
    pub subscription_to_delete_grace_seconds: i64,
    pub cleanup_sweep_period_seconds: u64,
}

pub enum AppEnvironment {
    Local,
    Production,
}

impl AppEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "production",
        }
    }
}

impl TryFrom<String> for AppEnvironment {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment; use `local` or `production`"
            )),
        }
    }
}

/// Layer `configuration/base.yaml`, `configuration/{environment}.yaml`, and
/// `HUB__*` environment variables (`__` as the nesting separator, so
/// `HUB__APPLICATION__PORT=9090` sets `application.port`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().expect("failed to determine current directory");
    let configuration_dir = base_path.join("configuration");

    let environment: AppEnvironment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let settings = Config::builder()
        .add_source(File::from(configuration_dir.join("base.yaml")))
        .add_source(File::from(configuration_dir.join(environment.as_str())).required(false))
        .add_source(
            Environment::with_prefix("HUB")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}
