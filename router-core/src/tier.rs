//! Model tiers: The cheap standard tier and the expensive premium tier.

use serde::{Deserialize, Serialize};

/// Model tiers a task can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// High-throughput, low-cost model
    Standard,
    /// Slow, expensive, high-quality model
    Premium,
}

impl ModelTier {
    /// Both tiers, cheapest first
    pub fn all() -> &'static [ModelTier] {
        &[Self::Standard, Self::Premium]
    }

    /// The tier used when this one is unavailable or downgraded
    pub fn downgrade(&self) -> ModelTier {
        Self::Standard
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Premium => write!(f, "premium"),
        }
    }
}
