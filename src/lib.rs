//! Handlecheck: finds usernames that are free on both the handle
//! reservation service and the legacy signup service.
//!
//! The interesting part is the polling engine: it walks a candidate list,
//! paces requests per service, classifies every response, cools down after
//! transient failures, and keeps the result file deduplicated and current
//! after every pass.

pub mod candidate;
pub mod clock;
pub mod config;
pub mod engine;
pub mod pacing;
pub mod probe;
pub mod random;
pub mod source;
pub mod store;

pub use candidate::{Candidate, ResultSet};
pub use config::{ConfigError, Overrides, Settings};
pub use engine::{EngineError, LoopPolicy, PollingEngine, RunReport, StopSignal, Termination};
pub use probe::{AvailabilityProbe, ProbeError, ProbeOutcome, Service};
pub use store::{ResultStore, StoreError};
