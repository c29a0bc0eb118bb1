// =============================================================================
// Shared types used across the Livermore risk monitor
// =============================================================================

use serde::{Deserialize, Serialize};

/// Taker side of a trade, or the position side wiped out by a liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Side where the market is currently vulnerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn is_neutral(self) -> bool {
        self == Self::Neutral
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Which family of inputs dominates a risk reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskDriver {
    Crowd,
    Liquidation,
    Funding,
    Oi,
    Mixed,
    Unknown,
}

impl std::fmt::Display for RiskDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crowd => write!(f, "CROWD"),
            Self::Liquidation => write!(f, "LIQUIDATION"),
            Self::Funding => write!(f, "FUNDING"),
            Self::Oi => write!(f, "OI"),
            Self::Mixed => write!(f, "MIXED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Alert severity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Hard,
    Buildup,
    Divergence,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hard => write!(f, "HARD"),
            Self::Buildup => write!(f, "BUILDUP"),
            Self::Divergence => write!(f, "DIVERGENCE"),
        }
    }
}

/// Coarse label for recent mark-price movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceTrend {
    Up,
    Down,
    Flat,
}

impl std::fmt::Display for PriceTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

/// Liquidity tier of a symbol. Majors react slower and get wider thresholds
/// and longer cooldowns than thin tails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolClass {
    L1,
    L2,
    L3,
    L4,
}

impl std::fmt::Display for SymbolClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
            Self::L4 => write!(f, "L4"),
        }
    }
}

/// Current wall-clock time as fractional epoch seconds.
///
/// All window timestamps and freshness ages in the monitor use this single
/// clock representation.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
