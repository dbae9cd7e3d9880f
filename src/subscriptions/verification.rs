//! §4.4 verification handshake: `GET {callback}?hub.mode=…` with the
//! subscriber's own query string preserved, redirects disabled, 10 s deadline.

use reqwest::Client;
use std::time::Duration;

use crate::domain::CallbackUrl;
use crate::domain::Challenge;
use crate::domain::HubMode;
use crate::domain::TopicUrl;
use crate::domain::VerifyToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// 2xx and the body echoed the challenge.
    Verified,
    /// 404 — treated as success for subscribe flow control (archive).
    NotFound,
    /// Anything else: wrong body, non-2xx/404, transport error, timeout.
    Failed,
}

pub fn no_redirect_client(deadline: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(deadline)
        .build()
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(http_client, challenge, verify_token), fields(callback = %callback, topic = %topic))]
pub async fn verify(
    http_client: &Client,
    callback: &CallbackUrl,
    mode: HubMode,
    topic: &TopicUrl,
    challenge: &Challenge,
    lease_seconds: i64,
    verify_token: &VerifyToken,
) -> VerificationOutcome {
    let mut url = match url::Url::parse(callback.as_ref()) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(error = %e, "callback is not a valid URL at verification time");
            return VerificationOutcome::Failed;
        }
    };
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("hub.mode", mode.as_str());
        pairs.append_pair("hub.topic", topic.as_ref());
        pairs.append_pair("hub.challenge", challenge.as_ref());
        pairs.append_pair("hub.lease_seconds", &lease_seconds.to_string());
        if !verify_token.as_ref().is_empty() {
            pairs.append_pair("hub.verify_token", verify_token.as_ref());
        }
    }

    let response = match http_client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::info!(error = %e, "verification request failed");
            return VerificationOutcome::Failed;
        }
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return VerificationOutcome::NotFound;
    }
    if !response.status().is_success() {
        tracing::info!(status = %response.status(), "verification got non-2xx");
        return VerificationOutcome::Failed;
    }

    match response.text().await {
        Ok(body) if body == challenge.as_ref() => VerificationOutcome::Verified,
        Ok(_) => {
            tracing::info!("verification body did not echo challenge");
            VerificationOutcome::Failed
        }
        Err(e) => {
            tracing::info!(error = %e, "could not read verification response body");
            VerificationOutcome::Failed
        }
    }
}
