//! Execution and fallback
//!
//! ```text
//! ExecutionRequest { tier }
//!        │
//!        ▼
//!   FallbackChain::plan ── skip unhealthy / open circuit, degraded last
//!        │
//!        ▼
//!   attempt ─fail/timeout─▶ next provider ─…─▶ ProviderExhaustion
//!        │ ok
//!        ▼
//!   premium? ── QualityChecker ─fail─▶ standard chain once ─▶ QualityDowngrade
//!        │ pass
//!        ▼
//!     Success ──▶ CostLedger + ExecutionRecorded event + audit
//! ```

pub mod fallback;
pub mod http;
pub mod manager;
pub mod provider;
pub mod quality;
pub mod rate_limit;

pub use fallback::{
    AttemptPlan, CircuitBreaker, CircuitState, FallbackChain, SkipReason, SkippedProvider,
};
pub use http::HttpAdapter;
pub use manager::{
    AttemptRecord, ExecutionError, ExecutionManager, ExecutionOutcome, ExecutionRequest,
    ExecutionResult, QUALITY_FALLBACK_KEY,
};
pub use provider::{ProviderAdapter, ProviderError, ProviderRegistry, ProviderResponse};
pub use quality::{QualityChecker, QualityIssue, QualityReport};
pub use rate_limit::SlidingWindowLimiter;
