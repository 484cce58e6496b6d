//! Availability probes: one outbound check per call, classified into a
//! `ProbeOutcome`.
//!
//! A probe never retries and never returns an error: every transport or
//! parsing failure is folded into `TransientError` or `FatalError` so the
//! engine applies one policy to all of them. Retry and pacing decisions live
//! in the engine and the rate limiter, not here.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::candidate::Candidate;

pub mod reservation;
pub mod signup;
mod user_agents;

pub use reservation::ReservationProbe;
pub use signup::SignupProbe;
pub use user_agents::USER_AGENTS;

// ── Core Types ──────────────────────────────────────────────────────

/// The upstream services a candidate is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Handle-reservation status API (primary).
    Reservation,
    /// Legacy signup username-availability endpoint (secondary).
    Signup,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Reservation => f.write_str("reservation"),
            Service::Signup => f.write_str("signup"),
        }
    }
}

/// Why a probe could not produce an availability answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("too many redirects")]
    RedirectLoop,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("credentials rejected (HTTP {0})")]
    Unauthorized(u16),
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("invalid value for request header {0}")]
    InvalidHeader(&'static str),
    #[error("candidate {0:?} cannot be sent as a URL path segment")]
    UnroutableCandidate(String),
}

/// Classified result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    Taken,
    /// Retry-worthy: the answer is unknown for this pass.
    TransientError(ProbeError),
    /// Not retryable: the candidate is dropped for the rest of the run.
    FatalError(ProbeError),
}

impl ProbeOutcome {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeOutcome::TransientError(_))
    }

    /// Short label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Available => "available",
            ProbeOutcome::Taken => "taken",
            ProbeOutcome::TransientError(_) => "transient",
            ProbeOutcome::FatalError(_) => "fatal",
        }
    }
}

// ── Probe Trait ─────────────────────────────────────────────────────

/// One upstream availability check.
///
/// Implementations must bound the call by the configured timeout and must
/// not store or log credentials.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    fn service(&self) -> Service;

    async fn probe(&self, candidate: &Candidate) -> ProbeOutcome;
}

// ── Shared HTTP Classification ──────────────────────────────────────

/// Transport-level failure kinds, extracted from `reqwest::Error` so the
/// mapping can be exercised without a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Redirect,
    Connect(String),
    Body(String),
}

impl From<&reqwest::Error> for TransportFailure {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_redirect() {
            TransportFailure::Redirect
        } else if err.is_body() || err.is_decode() {
            TransportFailure::Body(err.to_string())
        } else {
            TransportFailure::Connect(err.to_string())
        }
    }
}

/// Every transport failure is retry-worthy.
pub fn classify_transport(failure: TransportFailure) -> ProbeOutcome {
    let err = match failure {
        TransportFailure::Timeout => ProbeError::Timeout,
        TransportFailure::Redirect => ProbeError::RedirectLoop,
        TransportFailure::Connect(msg) | TransportFailure::Body(msg) => {
            ProbeError::Connection(truncate(&msg, 200))
        }
    };
    ProbeOutcome::TransientError(err)
}

/// Map a non-success HTTP status. Returns `None` for 2xx.
pub fn classify_status(status: u16) -> Option<ProbeOutcome> {
    match status {
        200..=299 => None,
        401 | 403 => Some(ProbeOutcome::FatalError(ProbeError::Unauthorized(status))),
        429 => Some(ProbeOutcome::TransientError(ProbeError::RateLimited)),
        _ => Some(ProbeOutcome::TransientError(ProbeError::HttpStatus(status))),
    }
}

/// Build the shared HTTP client. Every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    client_builder(timeout).build()
}

pub(crate) fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
}

/// Send a prepared request and return `(status, body)`, or the classified
/// transport failure.
pub(crate) async fn fetch(req: reqwest::RequestBuilder) -> Result<(u16, String), ProbeOutcome> {
    let resp = req
        .send()
        .await
        .map_err(|e| classify_transport(TransportFailure::from(&e)))?;
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .map_err(|e| classify_transport(TransportFailure::from(&e)))?;
    Ok((status, body))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub(crate) fn malformed(err: impl fmt::Display) -> ProbeOutcome {
    ProbeOutcome::FatalError(ProbeError::MalformedBody(truncate(&err.to_string(), 200)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let outcome = classify_transport(TransportFailure::Timeout);
        assert_eq!(outcome, ProbeOutcome::TransientError(ProbeError::Timeout));
        assert!(outcome.is_transient());
    }

    #[test]
    fn test_redirect_loop_is_transient() {
        assert_eq!(
            classify_transport(TransportFailure::Redirect),
            ProbeOutcome::TransientError(ProbeError::RedirectLoop)
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(
            classify_status(429),
            Some(ProbeOutcome::TransientError(ProbeError::RateLimited))
        );
        assert_eq!(
            classify_status(503),
            Some(ProbeOutcome::TransientError(ProbeError::HttpStatus(503)))
        );
        assert_eq!(
            classify_status(401),
            Some(ProbeOutcome::FatalError(ProbeError::Unauthorized(401)))
        );
        assert_eq!(
            classify_status(403),
            Some(ProbeOutcome::FatalError(ProbeError::Unauthorized(403)))
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_build_client_with_timeout() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }

    // ── Over a real socket ──────────────────────────────────────────

    use crate::config::{FileConfig, Overrides, Settings};
    use crate::random::testing::ScriptedRandom;
    use reqwest::Url;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    enum Reply {
        /// Read the request, then never answer.
        Stall,
        /// Answer every connection with this raw response.
        Raw(String),
    }

    fn response(status: &str, headers: &[(&str, &str)], body: &str) -> Reply {
        let mut raw = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            status,
            body.len()
        );
        for (name, value) in headers {
            raw.push_str(&format!("{}: {}\r\n", name, value));
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        Reply::Raw(raw)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve `reply` on a local port. Request heads are sent to the
    /// returned channel.
    async fn serve(reply: Reply) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let reply = Arc::new(reply);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let reply = reply.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(read_request(&mut socket).await);
                    match reply.as_ref() {
                        Reply::Stall => {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Reply::Raw(raw) => {
                            let _ = socket.write_all(raw.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                    }
                });
            }
        });
        (addr, rx)
    }

    fn client() -> reqwest::Client {
        client_builder(Duration::from_millis(500))
            .no_proxy()
            .build()
            .unwrap()
    }

    fn reservation(addr: SocketAddr) -> ReservationProbe {
        let base = Url::parse(&format!("http://{}/pomelo", addr)).unwrap();
        ReservationProbe::new(client(), base)
    }

    #[tokio::test]
    async fn test_stalled_response_times_out_as_transient() {
        let (addr, _rx) = serve(Reply::Stall).await;
        assert_eq!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::TransientError(ProbeError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_redirect_loop_is_transient_over_the_wire() {
        let (addr, _rx) = serve(response("302 Found", &[("Location", "/pomelo/alice")], "")).await;
        assert_eq!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::TransientError(ProbeError::RedirectLoop)
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        assert!(matches!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::TransientError(ProbeError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_reservation_status_two_over_the_wire() {
        let (addr, mut rx) = serve(response(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"data":{"check":{"status":2}}}"#,
        ))
        .await;
        assert_eq!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::Available
        );
        let head = rx.recv().await.unwrap();
        assert!(head.starts_with("GET /pomelo/alice HTTP/1.1"), "{}", head);
    }

    #[tokio::test]
    async fn test_html_page_is_malformed_body() {
        let (addr, _rx) = serve(response(
            "200 OK",
            &[("Content-Type", "text/html")],
            "<html><body>Just a moment...</body></html>",
        ))
        .await;
        assert!(matches!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::FatalError(ProbeError::MalformedBody(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_status_is_transient_over_the_wire() {
        let (addr, _rx) = serve(response("429 Too Many Requests", &[], "")).await;
        assert_eq!(
            reservation(addr).probe(&"alice".into()).await,
            ProbeOutcome::TransientError(ProbeError::RateLimited)
        );
    }

    #[tokio::test]
    async fn test_signup_request_carries_query_and_headers() {
        let (addr, mut rx) = serve(response("200 OK", &[], r#"{"valid":true}"#)).await;
        let file = FileConfig {
            signup_url: Some(format!("http://{}/i/users/username_available.json", addr)),
            ..Default::default()
        };
        let settings =
            Settings::from_parts(file, Some("bearer-xyz".into()), &Overrides::default()).unwrap();
        let probe = SignupProbe::new(client(), &settings, Arc::new(ScriptedRandom::new(vec![0.0])));

        assert_eq!(probe.probe(&"alice".into()).await, ProbeOutcome::Available);
        let head = rx.recv().await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /i/users/username_available.json?username=alice "), "{}", head);
        assert!(head.contains("authorization: bearer bearer-xyz\r\n"));
        assert!(head.contains("x-guest-token: 1337\r\n"));
        assert!(head.contains(&format!("user-agent: {}\r\n", USER_AGENTS[0].to_ascii_lowercase())));
    }
}
