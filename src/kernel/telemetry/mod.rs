//! Content-free observability for the resolver.
//!
//! # SAFETY INVARIANT
//! Telemetry is a read-only side-effect layer. Decision logic never reads it.
//!
//! # PRIVACY INVARIANT
//! Events carry tiers, states, kinds and counts. Never utterance text,
//! phrases, or action names.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::*;
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
