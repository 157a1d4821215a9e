//! # Switchyard Commitments
//!
//! Tracks promises the assistant makes ("I'll check the logs") and audits
//! whether they were kept. Detection runs on every reply; verification
//! runs on its own tick, independent of the request path.

pub mod detector;
pub mod supervisor;

pub use detector::{Promise, PromiseDetector, normalize_promise};
pub use supervisor::{CommitmentSupervisor, TickReport};
