//! Reservation-status probe (primary service).
//!
//! `GET {base}/{candidate}` returns `{"data":{"check":{"status":N}}}`.
//! Status `2` is the only value observed for a free handle.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

use super::{classify_status, fetch, malformed, AvailabilityProbe, ProbeError, ProbeOutcome, Service};
use crate::candidate::Candidate;

/// Reservation status code meaning "handle is free".
pub const AVAILABLE_STATUS: i64 = 2;

#[derive(Deserialize)]
struct ReservationBody {
    data: ReservationData,
}

#[derive(Deserialize)]
struct ReservationData {
    check: ReservationCheck,
}

#[derive(Deserialize)]
struct ReservationCheck {
    status: i64,
}

/// Classify a reservation response from its HTTP status and raw body.
pub fn classify_reservation(status: u16, body: &str) -> ProbeOutcome {
    if let Some(outcome) = classify_status(status) {
        return outcome;
    }
    match serde_json::from_str::<ReservationBody>(body) {
        Ok(parsed) if parsed.data.check.status == AVAILABLE_STATUS => ProbeOutcome::Available,
        Ok(_) => ProbeOutcome::Taken,
        Err(e) => malformed(e),
    }
}

pub struct ReservationProbe {
    client: reqwest::Client,
    base_url: Url,
}

impl ReservationProbe {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// `{base}/{candidate}`, with the candidate percent-encoded as a single
    /// path segment.
    ///
    /// Dot segments (`.`, `..` and their `%2e` spellings) are refused: URL
    /// normalization would fold them into the base path and the answer
    /// would belong to some other resource.
    pub fn url_for(&self, candidate: &Candidate) -> Result<Url, ProbeError> {
        let unroutable = || ProbeError::UnroutableCandidate(candidate.to_string());
        if is_dot_segment(candidate.as_str()) {
            return Err(unroutable());
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| unroutable())?
            .pop_if_empty()
            .push(candidate.as_str());
        Ok(url)
    }
}

#[async_trait]
impl AvailabilityProbe for ReservationProbe {
    fn service(&self) -> Service {
        Service::Reservation
    }

    async fn probe(&self, candidate: &Candidate) -> ProbeOutcome {
        let url = match self.url_for(candidate) {
            Ok(url) => url,
            Err(e) => return ProbeOutcome::FatalError(e),
        };
        let start = Instant::now();
        let outcome = match fetch(self.client.get(url)).await {
            Ok((status, body)) => classify_reservation(status, &body),
            Err(outcome) => outcome,
        };
        debug!(
            candidate = %candidate,
            outcome = outcome.label(),
            latency_ms = start.elapsed().as_millis() as u64,
            "reservation probe"
        );
        outcome
    }
}

fn is_dot_segment(segment: &str) -> bool {
    let folded = segment.to_ascii_lowercase().replace("%2e", ".");
    folded == "." || folded == ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;

    #[test]
    fn test_status_two_is_available() {
        assert_eq!(
            classify_reservation(200, r#"{"data":{"check":{"status":2}}}"#),
            ProbeOutcome::Available
        );
    }

    #[test]
    fn test_other_status_is_taken() {
        assert_eq!(
            classify_reservation(200, r#"{"data":{"check":{"status":0}}}"#),
            ProbeOutcome::Taken
        );
        assert_eq!(
            classify_reservation(200, r#"{"data":{"check":{"status":1,"extra":true}}}"#),
            ProbeOutcome::Taken
        );
    }

    #[test]
    fn test_non_json_is_fatal() {
        let outcome = classify_reservation(200, "<html>blocked</html>");
        assert!(matches!(
            outcome,
            ProbeOutcome::FatalError(ProbeError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_wrong_shape_is_fatal() {
        assert!(matches!(
            classify_reservation(200, r#"{"data":{}}"#),
            ProbeOutcome::FatalError(_)
        ));
        assert!(matches!(
            classify_reservation(200, r#"{"data":{"check":{"status":"2"}}}"#),
            ProbeOutcome::FatalError(_)
        ));
    }

    #[test]
    fn test_http_errors_take_precedence_over_body() {
        assert_eq!(
            classify_reservation(429, r#"{"data":{"check":{"status":2}}}"#),
            ProbeOutcome::TransientError(ProbeError::RateLimited)
        );
        assert_eq!(
            classify_reservation(502, ""),
            ProbeOutcome::TransientError(ProbeError::HttpStatus(502))
        );
    }

    #[test]
    fn test_url_for_encodes_candidate() {
        let base = Url::parse("https://api.example.test/v3/discord/pomelo").unwrap();
        let probe = ReservationProbe::new(reqwest::Client::new(), base);
        assert_eq!(
            probe.url_for(&"alice".into()).unwrap().as_str(),
            "https://api.example.test/v3/discord/pomelo/alice"
        );
        assert_eq!(
            probe.url_for(&"a/b".into()).unwrap().as_str(),
            "https://api.example.test/v3/discord/pomelo/a%2Fb"
        );
    }

    #[test]
    fn test_url_for_refuses_dot_segments() {
        let base = Url::parse("http://x.test/pomelo").unwrap();
        let probe = ReservationProbe::new(reqwest::Client::new(), base);
        for name in [".", "..", "%2e", "%2E%2e", ".%2e"] {
            assert_eq!(
                probe.url_for(&name.into()),
                Err(ProbeError::UnroutableCandidate(name.to_string())),
                "{name} must not collapse into the base path"
            );
        }
        // Dots inside a handle are ordinary characters.
        assert_eq!(
            probe.url_for(&"a.b".into()).unwrap().as_str(),
            "http://x.test/pomelo/a.b"
        );
        assert_eq!(
            probe.url_for(&"...".into()).unwrap().as_str(),
            "http://x.test/pomelo/..."
        );
    }

    #[tokio::test]
    async fn test_dot_segment_candidate_is_fatal_without_request() {
        // Nothing listens here; a request would come back as a connection error.
        let base = Url::parse("http://127.0.0.1:9/pomelo").unwrap();
        let probe = ReservationProbe::new(reqwest::Client::new(), base);
        assert_eq!(
            probe.probe(&"..".into()).await,
            ProbeOutcome::FatalError(ProbeError::UnroutableCandidate("..".into()))
        );
    }

    #[test]
    fn test_url_for_tolerates_trailing_slash() {
        let base = Url::parse("https://api.example.test/pomelo/").unwrap();
        let probe = ReservationProbe::new(reqwest::Client::new(), base);
        assert_eq!(
            probe.url_for(&"bob".into()).unwrap().as_str(),
            "https://api.example.test/pomelo/bob"
        );
    }
}
