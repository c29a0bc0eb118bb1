// =============================================================================
// Divergence Detector — positioning vs. OI vs. price mismatches
// =============================================================================
//
// Flags qualitative mismatches between crowd positioning, open-interest trend,
// short-term price trend and liquidation flow. Each symbol belongs to a
// liquidity class (L1 majors .. L4 thin tails); classes set the pressure
// thresholds, the price-trend epsilon and the cooldown multiplier, and a few
// symbols carry individual overrides on top.
//
// Emission is throttled: at most one message per (symbol, kind) within the
// kind's base cooldown scaled by the class multiplier. Nothing is emitted
// while the market regime is CALM.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::regime::MarketRegime;
use crate::types::{PriceTrend, SymbolClass};

// =============================================================================
// Kinds & parameters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DivergenceKind {
    LongTrap,
    ShortSqueeze,
    FakeMove,
    Capitulation,
}

impl std::fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongTrap => write!(f, "LONG_TRAP"),
            Self::ShortSqueeze => write!(f, "SHORT_SQUEEZE"),
            Self::FakeMove => write!(f, "FAKE_MOVE"),
            Self::Capitulation => write!(f, "CAPITULATION"),
        }
    }
}

impl DivergenceKind {
    /// Base cooldown before the same kind can fire again for a symbol.
    pub fn base_cooldown_secs(self) -> f64 {
        match self {
            Self::LongTrap => 1800.0,
            Self::ShortSqueeze => 900.0,
            Self::FakeMove => 1200.0,
            Self::Capitulation => 1800.0,
        }
    }
}

/// Per-symbol detection parameters after class + override resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergenceParams {
    pub long_trap_pressure: f64,
    pub short_squeeze_pressure: f64,
    pub fake_move_pressure: f64,
    pub capitulation_pressure: f64,
    pub price_trend_delta: f64,
    pub cooldown_multiplier: f64,
}

fn class_params(class: SymbolClass) -> DivergenceParams {
    match class {
        SymbolClass::L1 => DivergenceParams {
            long_trap_pressure: 0.68,
            short_squeeze_pressure: 0.74,
            fake_move_pressure: 0.74,
            capitulation_pressure: 0.32,
            price_trend_delta: 0.0007,
            cooldown_multiplier: 1.2,
        },
        SymbolClass::L2 => DivergenceParams {
            long_trap_pressure: 0.66,
            short_squeeze_pressure: 0.72,
            fake_move_pressure: 0.72,
            capitulation_pressure: 0.34,
            price_trend_delta: 0.0010,
            cooldown_multiplier: 1.0,
        },
        SymbolClass::L3 => DivergenceParams {
            long_trap_pressure: 0.65,
            short_squeeze_pressure: 0.71,
            fake_move_pressure: 0.71,
            capitulation_pressure: 0.35,
            price_trend_delta: 0.0012,
            cooldown_multiplier: 0.95,
        },
        SymbolClass::L4 => DivergenceParams {
            long_trap_pressure: 0.64,
            short_squeeze_pressure: 0.70,
            fake_move_pressure: 0.70,
            capitulation_pressure: 0.36,
            price_trend_delta: 0.0015,
            cooldown_multiplier: 0.9,
        },
    }
}

/// Liquidity class of a symbol; unknown symbols are treated as L3.
pub fn symbol_class(symbol: &str) -> SymbolClass {
    match symbol {
        "BTCUSDT" | "ETHUSDT" => SymbolClass::L1,
        "SOLUSDT" | "DOGEUSDT" | "ADAUSDT" | "LINKUSDT" | "LTCUSDT" | "BCHUSDT" => SymbolClass::L2,
        "BNBUSDT" | "TRXUSDT" | "XRPUSDT" | "XLMUSDT" => SymbolClass::L3,
        "HBARUSDT" | "XMRUSDT" | "ZECUSDT" | "HYPEUSDT" => SymbolClass::L4,
        _ => SymbolClass::L3,
    }
}

/// Resolve the effective parameters for `symbol`: class defaults plus any
/// per-symbol override.
pub fn params_for(symbol: &str) -> DivergenceParams {
    let mut p = class_params(symbol_class(symbol));

    match symbol {
        "ETHUSDT" => {
            p.long_trap_pressure = 0.67;
            p.short_squeeze_pressure = 0.73;
            p.fake_move_pressure = 0.73;
            p.capitulation_pressure = 0.33;
            p.cooldown_multiplier = 1.15;
        }
        "DOGEUSDT" | "ADAUSDT" | "LINKUSDT" | "LTCUSDT" | "BCHUSDT" => {
            p.price_trend_delta = 0.0010;
        }
        "SOLUSDT" => {
            p.price_trend_delta = 0.0009;
        }
        "BNBUSDT" | "TRXUSDT" => {
            p.price_trend_delta = 0.0011;
            p.cooldown_multiplier = 0.95;
        }
        "XRPUSDT" | "XLMUSDT" => {
            p.price_trend_delta = 0.0012;
            p.cooldown_multiplier = 0.95;
        }
        "HBARUSDT" | "XMRUSDT" => {
            p.price_trend_delta = 0.0014;
        }
        "ZECUSDT" => {
            p.price_trend_delta = 0.0015;
        }
        "HYPEUSDT" => {
            p.price_trend_delta = 0.0016;
            p.cooldown_multiplier = 0.85;
        }
        _ => {}
    }

    p
}

// =============================================================================
// Price trend
// =============================================================================

/// Label the short-term price movement from a `(ts, price)` series using the
/// symbol's relative epsilon.
pub fn price_trend(series: &[(f64, f64)], delta: f64) -> PriceTrend {
    if series.len() < 2 {
        return PriceTrend::Flat;
    }
    let first = series[0].1;
    let last = series[series.len() - 1].1;
    if first <= 0.0 {
        return PriceTrend::Flat;
    }
    let rel = (last - first) / first;
    if rel > delta {
        PriceTrend::Up
    } else if rel < -delta {
        PriceTrend::Down
    } else {
        PriceTrend::Flat
    }
}

// =============================================================================
// Cooldown tracking
// =============================================================================

/// Remembers the last emission time per (symbol, kind).
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_seen: Mutex<HashMap<(String, DivergenceKind), f64>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and stamps `now` if the (symbol, kind) pair is out of
    /// cooldown; otherwise leaves the stamp untouched.
    pub fn try_acquire(&self, symbol: &str, kind: DivergenceKind, now: f64) -> bool {
        let ttl = kind.base_cooldown_secs() * params_for(symbol).cooldown_multiplier;
        let mut map = self.last_seen.lock();
        let key = (symbol.to_string(), kind);

        if let Some(&last) = map.get(&key) {
            if now - last < ttl {
                return false;
            }
        }
        map.insert(key, now);
        true
    }
}

// =============================================================================
// Detection
// =============================================================================

/// One detected divergence: the kind plus the outgoing message body.
#[derive(Debug, Clone, Serialize)]
pub struct Divergence {
    pub kind: DivergenceKind,
    pub text: String,
}

/// Inputs to one divergence pass for a symbol.
#[derive(Debug, Clone, Copy)]
pub struct DivergenceInputs<'a> {
    pub regime: MarketRegime,
    /// Normalized long share of taker volume in [0, 1].
    pub pressure: f64,
    /// Open-interest `(ts, value)` series, oldest first.
    pub oi_series: &'a [(f64, f64)],
    pub price_trend: PriceTrend,
    /// Total liquidation notional in the window.
    pub liquidations: f64,
}

fn oi_trend(series: &[(f64, f64)]) -> Option<PriceTrend> {
    if series.len() < 2 {
        return None;
    }
    let start = series[0].1;
    let end = series[series.len() - 1].1;
    if end > start {
        Some(PriceTrend::Up)
    } else if end < start {
        Some(PriceTrend::Down)
    } else {
        None
    }
}

/// Run the state-aware divergence rules for one symbol.
///
/// Returns at most one entry per kind; the cooldown tracker throttles repeats
/// across ticks.
pub fn detect_divergences(
    symbol: &str,
    inputs: &DivergenceInputs,
    cooldowns: &CooldownTracker,
    now: f64,
) -> Vec<Divergence> {
    let mut out = Vec::new();

    // Quiet market: stay silent.
    if inputs.regime == MarketRegime::Calm {
        return out;
    }

    let params = params_for(symbol);
    let oi = oi_trend(inputs.oi_series);
    let pressure = inputs.pressure;

    // LONG TRAP: aggressive buying, positions building, price not following.
    if pressure > params.long_trap_pressure
        && oi == Some(PriceTrend::Up)
        && matches!(inputs.price_trend, PriceTrend::Flat | PriceTrend::Down)
        && cooldowns.try_acquire(symbol, DivergenceKind::LongTrap, now)
    {
        out.push(Divergence {
            kind: DivergenceKind::LongTrap,
            text: "LONG TRAP — active buying, positions building, price not following. \
                   Risk: buyers may be left without continuation."
                .to_string(),
        });
    }

    // SHORT SQUEEZE: crowded market, aggressive buying into rising OI with
    // liquidations already printing.
    if matches!(
        inputs.regime,
        MarketRegime::CrowdImbalance | MarketRegime::Stress
    ) && pressure > params.short_squeeze_pressure
        && oi == Some(PriceTrend::Up)
        && inputs.liquidations > 0.0
        && cooldowns.try_acquire(symbol, DivergenceKind::ShortSqueeze, now)
    {
        out.push(Divergence {
            kind: DivergenceKind::ShortSqueeze,
            text: "SHORT SQUEEZE — aggressive buying into rising open interest. \
                   Risk: shorts may be forced to cover higher."
                .to_string(),
        });
    }

    // FAKE MOVE: flow without interest — positions shrinking under the move.
    if pressure > params.fake_move_pressure
        && oi == Some(PriceTrend::Down)
        && matches!(inputs.price_trend, PriceTrend::Up | PriceTrend::Flat)
        && cooldowns.try_acquire(symbol, DivergenceKind::FakeMove, now)
    {
        out.push(Divergence {
            kind: DivergenceKind::FakeMove,
            text: "FAKE MOVE — trades printing while positions shrink. \
                   Risk: the move is not confirmed by interest."
                .to_string(),
        });
    }

    // CAPITULATION: stress regime, selling pressure, interest unwinding under
    // liquidations.
    if inputs.regime == MarketRegime::Stress
        && pressure < params.capitulation_pressure
        && oi == Some(PriceTrend::Down)
        && inputs.liquidations > 0.0
        && cooldowns.try_acquire(symbol, DivergenceKind::Capitulation, now)
    {
        out.push(Divergence {
            kind: DivergenceKind::Capitulation,
            text: "CAPITULATION — positions closing under liquidation pressure. \
                   Risk: this is an exit, not the start of a trend."
                .to_string(),
        });
    }

    out
}
