//! Signup username-availability probe (secondary service).
//!
//! The endpoint wants a bearer token, a guest token, two client feature
//! headers and a browser user-agent. The user-agent is drawn at random on
//! every call; a fixed one gets fingerprinted and blocked quickly.

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::{
    classify_status, fetch, malformed, AvailabilityProbe, ProbeError, ProbeOutcome, Service,
    USER_AGENTS,
};
use crate::candidate::Candidate;
use crate::config::{SecretToken, Settings};
use crate::random::{choose, RandomSource};

const GUEST_TOKEN: HeaderName = HeaderName::from_static("x-guest-token");
const ACTIVE_USER: HeaderName = HeaderName::from_static("x-twitter-active-user");
const CLIENT_LANGUAGE: HeaderName = HeaderName::from_static("x-twitter-client-language");

#[derive(Deserialize)]
struct SignupBody {
    valid: bool,
}

/// Classify a signup response from its HTTP status and raw body.
pub fn classify_signup(status: u16, body: &str) -> ProbeOutcome {
    if let Some(outcome) = classify_status(status) {
        return outcome;
    }
    match serde_json::from_str::<SignupBody>(body) {
        Ok(SignupBody { valid: true }) => ProbeOutcome::Available,
        Ok(SignupBody { valid: false }) => ProbeOutcome::Taken,
        Err(e) => malformed(e),
    }
}

pub struct SignupProbe {
    client: reqwest::Client,
    url: Url,
    bearer_token: SecretToken,
    guest_token: String,
    rng: Arc<dyn RandomSource>,
}

impl SignupProbe {
    pub fn new(client: reqwest::Client, settings: &Settings, rng: Arc<dyn RandomSource>) -> Self {
        Self {
            client,
            url: settings.signup_url.clone(),
            bearer_token: settings.bearer_token.clone(),
            guest_token: settings.guest_token.clone(),
            rng,
        }
    }

    /// Headers for one request, with a freshly drawn user-agent.
    pub fn headers(&self) -> Result<HeaderMap, ProbeError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.bearer_token.expose()))
            .map_err(|_| ProbeError::InvalidHeader("authorization"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            GUEST_TOKEN,
            HeaderValue::from_str(&self.guest_token).map_err(|_| ProbeError::InvalidHeader("x-guest-token"))?,
        );
        headers.insert(ACTIVE_USER, HeaderValue::from_static("yes"));
        headers.insert(CLIENT_LANGUAGE, HeaderValue::from_static("en"));
        if let Some(agent) = choose(self.rng.as_ref(), USER_AGENTS) {
            headers.insert(USER_AGENT, HeaderValue::from_static(*agent));
        }
        Ok(headers)
    }
}

#[async_trait]
impl AvailabilityProbe for SignupProbe {
    fn service(&self) -> Service {
        Service::Signup
    }

    async fn probe(&self, candidate: &Candidate) -> ProbeOutcome {
        let headers = match self.headers() {
            Ok(h) => h,
            Err(e) => return ProbeOutcome::FatalError(e),
        };
        let req = self
            .client
            .get(self.url.clone())
            .query(&[("username", candidate.as_str())])
            .headers(headers);

        let start = Instant::now();
        let outcome = match fetch(req).await {
            Ok((status, body)) => classify_signup(status, &body),
            Err(outcome) => outcome,
        };
        debug!(
            candidate = %candidate,
            outcome = outcome.label(),
            latency_ms = start.elapsed().as_millis() as u64,
            "signup probe"
        );
        outcome
    }
}
