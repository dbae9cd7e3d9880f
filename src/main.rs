use std::fmt::Debug;
use std::fmt::Display;

use pubsubhub::configuration::get_configuration;
use pubsubhub::startup::Application;
use pubsubhub::telemetry::get_subscriber;
use pubsubhub::telemetry::init_subscriber;
use pubsubhub::workers;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(error.cause_chain=?e, error.message=%e, "{name} failed (inner)")
        }
        Err(e) => {
            tracing::error!(error.cause_chain=?e, error.message=%e, "{name} failed (outer)")
        }
    }
}

/// Initialise telemetry, load config, and start the server and background
/// workers (§2, §4.3-4.10): one task per named queue, plus the polling and
/// cleanup heartbeats.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("pubsubhub", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration()?;

    let application = Application::build(&cfg).await?;
    let state = application.state();
    let port = application.get_port();
    tracing::info!(port, "hub listening");

    let server_thread = tokio::spawn(application.run_until_stopped());

    let mut worker_set = tokio::task::JoinSet::new();
    for handle in workers::spawn_all(state) {
        worker_set.spawn(handle);
    }

    tokio::select! {
        o = server_thread => { report_exit("API", o) },
        Some(_) = worker_set.join_next() => {
            tracing::error!("a background worker loop exited unexpectedly");
        }
    }

    Ok(())
}
