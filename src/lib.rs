pub mod auth_gate;
pub mod configuration;
pub mod dispatch;
pub mod domain;
pub mod event_builder;
pub mod feed_diff;
pub mod hooks;
pub mod identity;
pub mod polling;
pub mod publish;
pub mod puller;
pub mod pusher;
pub mod queue;
pub mod rate_limit;
pub mod routes;
pub mod scoring;
pub mod startup;
pub mod store;
pub mod subscriptions;
pub mod telemetry;
pub mod utils;
pub mod workers;
