//! Provider resilience for Switchyard.
//!
//! - [`health`] and [`rate_limit`] track per-backend failures and the
//!   primary provider's rate-limit circuit.
//! - [`context::ResilienceContext`] owns both and is shared process-wide.
//! - [`tier::TierSelector`] picks the ordered candidate list for a request.
//! - [`fallback::FailoverInvoker`] walks that list and never returns silently.
//! - [`openai_compat`] is the shipped backend adapter.

pub mod classify;
pub mod context;
pub mod fallback;
pub mod health;
pub mod openai_compat;
pub mod rate_limit;
pub mod registry;
pub mod tier;

pub use classify::{RateLimitNotice, RateLimitPhrases};
pub use context::{Admission, ResilienceContext, SkipReason};
pub use fallback::{AttemptFailure, Exhausted, FailoverInvoker, Invocation, StreamHandle};
pub use health::{FailureClass, HealthSnapshot, HealthTracker, ProviderStatus};
pub use openai_compat::OpenAiCompatProvider;
pub use rate_limit::{RateLimitMachine, RatePhase};
pub use registry::{ProviderRegistry, build_from_config};
pub use tier::{TierPlan, TierReason, TierSelector};
