//! Event feed and audit trail
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): decisions, approval status changes,
//!    execution outcomes, provider health, budget alerts, control swaps.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast pub/sub for live consumers.
//!
//! 3. **Audit Log** (`audit.rs`): write-behind JSONL persistence with replay.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────┬───────┘     └──────────────┘     └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐     ┌──────────────┐
//! │  Audit Log   │────▶│ JSONL writer │
//! │   (record)   │     │   (mpsc)     │
//! └──────────────┘     └──────────────┘
//! ```

pub mod audit;
pub mod bus;
pub mod types;

pub use audit::{AuditEntry, AuditError, AuditLog, AuditRecord};
pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::RouterEvent;
