// =============================================================================
// Stream Quality & Confidence
// =============================================================================
//
// Two small ratings consulted before alerting:
//
//   - stream quality: how much of the symbol's input surface is actually
//     populated and fresh. LOW quality suppresses alerts entirely.
//   - confidence: how many independent observations corroborate a risk
//     reading, bounded to 0..5.

use serde::Serialize;

use crate::market_data::SymbolSnapshot;
use crate::types::Direction;

// =============================================================================
// Stream quality
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityLevel {
    Low,
    Medium,
    Good,
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Good => write!(f, "GOOD"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamQuality {
    pub score: u32,
    pub level: QualityLevel,
}

/// Rate the input surface of one snapshot. Each populated facet counts one
/// point: live feed, known funding, usable OI series, trade flow, observed
/// liquidations, known price.
pub fn stream_quality(snapshot: &SymbolSnapshot, freshness_ttl_secs: f64) -> StreamQuality {
    let mut score = 0u32;

    let live = matches!(snapshot.freshest_age, Some(age) if age <= freshness_ttl_secs);
    if live {
        score += 1;
    }
    if snapshot.funding.is_some() {
        score += 1;
    }
    if snapshot.oi_series.len() >= 2 {
        score += 1;
    }
    if snapshot.long_qty + snapshot.short_qty > 0.0 {
        score += 1;
    }
    if snapshot.liq_total() > 0.0 {
        score += 1;
    }
    if snapshot.mark_price.is_some() {
        score += 1;
    }

    let level = if score < 3 {
        QualityLevel::Low
    } else if score >= 5 {
        QualityLevel::Good
    } else {
        QualityLevel::Medium
    };

    StreamQuality { score, level }
}

// =============================================================================
// Confidence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::VeryHigh => write!(f, "VERY_HIGH"),
        }
    }
}

/// Count corroborating observations for a risk reading, then credit each
/// spike once more, capped at 5.
pub fn calculate_confidence(
    score: u32,
    early_level: u32,
    direction: Direction,
    oi_spike: bool,
    funding_spike: bool,
    liquidation_sum: f64,
) -> u32 {
    let mut confidence = 0u32;

    if score >= early_level {
        confidence += 1;
    }
    if !direction.is_neutral() {
        confidence += 1;
    }
    if oi_spike {
        confidence += 1;
    }
    if funding_spike {
        confidence += 1;
    }
    if liquidation_sum > 0.0 {
        confidence += 1;
    }

    if funding_spike {
        confidence += 1;
    }
    if oi_spike {
        confidence += 1;
    }

    confidence.min(5)
}

pub fn confidence_level(confidence: u32) -> ConfidenceLevel {
    match confidence {
        0..=2 => ConfidenceLevel::Low,
        3 => ConfidenceLevel::Medium,
        4 => ConfidenceLevel::High,
        _ => ConfidenceLevel::VeryHigh,
    }
}
