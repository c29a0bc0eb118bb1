// =============================================================================
// Market Regime & Activity Classifiers
// =============================================================================
//
// Two coarse, market-wide views recomputed on a slow cadence:
//
//   - the MARKET regime aggregates per-symbol risk into one of five states
//     (CALM / LATENT_STRESS / CROWD_IMBALANCE / STRESS / NEUTRAL). Committed
//     transitions into the noisy states require consecutive confirming ticks,
//     and leaving STRESS requires consecutive non-STRESS ticks, so a single
//     outlier evaluation cannot flip the regime.
//   - the ACTIVITY regime looks only at how many alerts fired recently and
//     partitions into CALM / FRAGILE_CALM / STRESS.

use serde::Serialize;

use crate::event_log::log_event;
use crate::types::Direction;

// =============================================================================
// Market state
// =============================================================================

/// Cross-symbol aggregate consumed by the regime candidate map.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MarketState {
    /// Mean risk score over all tracked symbols.
    pub avg_risk: f64,
    /// Symbols currently at or above the early alert level.
    pub buildup_count: usize,
    /// Alerts recorded inside the alert window.
    pub alerts_in_window: usize,
    /// Symbols whose current direction is LONG.
    pub long_bias: usize,
    /// Symbols whose current direction is SHORT.
    pub short_bias: usize,
    pub symbols_tracked: usize,
}

impl MarketState {
    /// Build from per-symbol `(score, direction)` pairs.
    pub fn from_results<'a, I>(results: I, early_level: u32, alerts_in_window: usize) -> Self
    where
        I: IntoIterator<Item = &'a (u32, Direction)>,
    {
        let mut sum = 0u64;
        let mut count = 0usize;
        let mut buildups = 0usize;
        let mut long_bias = 0usize;
        let mut short_bias = 0usize;

        for &(score, direction) in results {
            sum += score as u64;
            count += 1;
            if score >= early_level {
                buildups += 1;
            }
            match direction {
                Direction::Long => long_bias += 1,
                Direction::Short => short_bias += 1,
                Direction::Neutral => {}
            }
        }

        let avg_risk = if count > 0 {
            sum as f64 / count as f64
        } else {
            0.0
        };

        Self {
            avg_risk,
            buildup_count: buildups,
            alerts_in_window,
            long_bias,
            short_bias,
            symbols_tracked: count,
        }
    }
}

// =============================================================================
// Market regime
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarketRegime {
    Calm,
    LatentStress,
    CrowdImbalance,
    Stress,
    Neutral,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "CALM"),
            Self::LatentStress => write!(f, "LATENT_STRESS"),
            Self::CrowdImbalance => write!(f, "CROWD_IMBALANCE"),
            Self::Stress => write!(f, "STRESS"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Map a market state to a candidate regime. First match wins.
pub fn candidate_regime(state: &MarketState) -> MarketRegime {
    if state.avg_risk < 1.0 && state.buildup_count == 0 {
        MarketRegime::Calm
    } else if state.avg_risk >= 2.0 && state.buildup_count == 0 && state.alerts_in_window == 0 {
        MarketRegime::LatentStress
    } else if state.buildup_count >= 3 && state.avg_risk < 2.0 {
        MarketRegime::CrowdImbalance
    } else if state.avg_risk >= 2.0 && state.buildup_count >= 3 {
        MarketRegime::Stress
    } else {
        MarketRegime::Neutral
    }
}

/// Outcome of one classifier tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegimeDecision {
    /// The raw candidate for this tick.
    pub candidate: MarketRegime,
    /// The regime the classifier is standing on.
    pub committed: MarketRegime,
    /// What is reported outward: an unconfirmed STRESS streak reads as
    /// LATENT_STRESS until it confirms.
    pub reported: MarketRegime,
    pub changed: bool,
}

/// Confirmation ticks per regime, from the monitor configuration.
#[derive(Debug, Clone, Copy)]
pub struct HysteresisConfig {
    pub stress_confirm_ticks: u32,
    pub stress_exit_ticks: u32,
    pub crowd_confirm_ticks: u32,
}

/// Tick-based hysteresis over regime candidates.
#[derive(Debug)]
pub struct RegimeClassifier {
    config: HysteresisConfig,
    committed: MarketRegime,
    /// Last candidate seen and how many consecutive ticks it held.
    pending: MarketRegime,
    pending_streak: u32,
    /// Consecutive non-STRESS candidates while committed to STRESS.
    non_stress_streak: u32,
}

impl RegimeClassifier {
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            committed: MarketRegime::Neutral,
            pending: MarketRegime::Neutral,
            pending_streak: 0,
            non_stress_streak: 0,
        }
    }

    pub fn committed(&self) -> MarketRegime {
        self.committed
    }

    /// Ticks a candidate must hold before it can commit.
    fn confirm_ticks(&self, regime: MarketRegime) -> u32 {
        match regime {
            MarketRegime::Stress => self.config.stress_confirm_ticks,
            MarketRegime::CrowdImbalance => self.config.crowd_confirm_ticks,
            _ => 1,
        }
    }

    /// Feed one candidate observation and resolve the committed regime.
    pub fn observe(&mut self, candidate: MarketRegime) -> RegimeDecision {
        if candidate == self.pending {
            self.pending_streak += 1;
        } else {
            self.pending = candidate;
            self.pending_streak = 1;
        }

        if candidate == MarketRegime::Stress {
            self.non_stress_streak = 0;
        } else {
            self.non_stress_streak += 1;
        }

        let previous = self.committed;

        if candidate != self.committed {
            let confirmed = self.pending_streak >= self.confirm_ticks(candidate);
            let exit_ok = self.committed != MarketRegime::Stress
                || self.non_stress_streak >= self.config.stress_exit_ticks;

            if confirmed && exit_ok {
                self.committed = candidate;
            }
        }

        let reported = if self.committed != MarketRegime::Stress
            && candidate == MarketRegime::Stress
        {
            // Stress building but not yet confirmed.
            MarketRegime::LatentStress
        } else {
            self.committed
        };

        RegimeDecision {
            candidate,
            committed: self.committed,
            reported,
            changed: self.committed != previous,
        }
    }
}

// =============================================================================
// Activity regime
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityRegime {
    Calm,
    FragileCalm,
    Stress,
}

impl std::fmt::Display for ActivityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "CALM"),
            Self::FragileCalm => write!(f, "FRAGILE_CALM"),
            Self::Stress => write!(f, "STRESS"),
        }
    }
}

/// Partition a recent-alert count into an activity regime.
pub fn activity_regime(alerts: usize, calm_max: usize, fragile_max: usize) -> ActivityRegime {
    if alerts <= calm_max {
        ActivityRegime::Calm
    } else if alerts <= fragile_max {
        ActivityRegime::FragileCalm
    } else {
        ActivityRegime::Stress
    }
}

/// Tracks the previous activity regime and logs transitions.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    last: Option<ActivityRegime>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the current regime; logs and returns the transition if one
    /// occurred.
    pub fn observe(
        &mut self,
        current: ActivityRegime,
        alerts: usize,
        window_hours: u64,
        now_ts: i64,
    ) -> Option<(ActivityRegime, ActivityRegime)> {
        let transition = match self.last {
            Some(prev) if prev != current => Some((prev, current)),
            _ => None,
        };

        if let Some((from, to)) = transition {
            log_event(
                "activity_transition",
                serde_json::json!({
                    "ts": now_ts,
                    "from": from.to_string(),
                    "to": to.to_string(),
                    "alerts": alerts,
                    "window_h": window_hours,
                }),
            );
        }

        self.last = Some(current);
        transition
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn hysteresis() -> HysteresisConfig {
        HysteresisConfig {
            stress_confirm_ticks: 3,
            stress_exit_ticks: 2,
            crowd_confirm_ticks: 2,
        }
    }

    fn state(avg: f64, buildups: usize, alerts: usize) -> MarketState {
        MarketState {
            avg_risk: avg,
            buildup_count: buildups,
            alerts_in_window: alerts,
            long_bias: 0,
            short_bias: 0,
            symbols_tracked: 4,
        }
    }

    #[test]
    fn candidate_map() {
        assert_eq!(candidate_regime(&state(0.5, 0, 0)), MarketRegime::Calm);
        assert_eq!(
            candidate_regime(&state(2.5, 0, 0)),
            MarketRegime::LatentStress
        );
        assert_eq!(
            candidate_regime(&state(1.5, 3, 2)),
            MarketRegime::CrowdImbalance
        );
        assert_eq!(candidate_regime(&state(2.5, 3, 2)), MarketRegime::Stress);
        // Elevated risk with alerts but no buildups: nothing matches.
        assert_eq!(candidate_regime(&state(2.5, 0, 4)), MarketRegime::Neutral);
        assert_eq!(candidate_regime(&state(1.5, 1, 0)), MarketRegime::Neutral);
    }

    #[test]
    fn market_state_from_results() {
        let results = vec![
            (6, Direction::Long),
            (4, Direction::Short),
            (1, Direction::Neutral),
            (1, Direction::Long),
        ];
        let state = MarketState::from_results(&results, 4, 7);
        assert!((state.avg_risk - 3.0).abs() < 1e-9);
        assert_eq!(state.buildup_count, 2);
        assert_eq!(state.alerts_in_window, 7);
        assert_eq!(state.long_bias, 2);
        assert_eq!(state.short_bias, 1);
        assert_eq!(state.symbols_tracked, 4);
    }

    #[test]
    fn stress_needs_three_confirming_ticks() {
        let mut c = RegimeClassifier::new(hysteresis());

        let d = c.observe(MarketRegime::Stress);
        assert_eq!(d.committed, MarketRegime::Neutral);
        assert_eq!(d.reported, MarketRegime::LatentStress);

        let d = c.observe(MarketRegime::Stress);
        assert_eq!(d.committed, MarketRegime::Neutral);
        assert_eq!(d.reported, MarketRegime::LatentStress);

        let d = c.observe(MarketRegime::Stress);
        assert_eq!(d.committed, MarketRegime::Stress);
        assert_eq!(d.reported, MarketRegime::Stress);
        assert!(d.changed);
    }

    #[test]
    fn stress_exit_needs_two_non_stress_ticks() {
        let mut c = RegimeClassifier::new(hysteresis());
        for _ in 0..3 {
            c.observe(MarketRegime::Stress);
        }
        assert_eq!(c.committed(), MarketRegime::Stress);

        let d = c.observe(MarketRegime::Neutral);
        assert_eq!(d.committed, MarketRegime::Stress);

        let d = c.observe(MarketRegime::Neutral);
        assert_eq!(d.committed, MarketRegime::Neutral);
        assert!(d.changed);
    }

    #[test]
    fn interrupted_stress_streak_starts_over() {
        let mut c = RegimeClassifier::new(hysteresis());
        c.observe(MarketRegime::Stress);
        c.observe(MarketRegime::Stress);
        c.observe(MarketRegime::Calm);
        c.observe(MarketRegime::Stress);
        let d = c.observe(MarketRegime::Stress);
        // Only two consecutive STRESS ticks since the break.
        assert_ne!(d.committed, MarketRegime::Stress);
    }

    #[test]
    fn crowd_needs_two_ticks_others_commit_immediately() {
        let mut c = RegimeClassifier::new(hysteresis());

        let d = c.observe(MarketRegime::CrowdImbalance);
        assert_eq!(d.committed, MarketRegime::Neutral);
        let d = c.observe(MarketRegime::CrowdImbalance);
        assert_eq!(d.committed, MarketRegime::CrowdImbalance);

        let d = c.observe(MarketRegime::Calm);
        assert_eq!(d.committed, MarketRegime::Calm);
        assert!(d.changed);
    }

    #[test]
    fn exit_from_stress_lands_on_latest_candidate() {
        let mut c = RegimeClassifier::new(hysteresis());
        for _ in 0..3 {
            c.observe(MarketRegime::Stress);
        }
        c.observe(MarketRegime::Calm);
        let d = c.observe(MarketRegime::LatentStress);
        // Two consecutive non-stress ticks satisfy the exit; the immediate
        // commit rule installs the current candidate.
        assert_eq!(d.committed, MarketRegime::LatentStress);
    }

    #[test]
    fn activity_partition() {
        assert_eq!(activity_regime(0, 2, 5), ActivityRegime::Calm);
        assert_eq!(activity_regime(2, 2, 5), ActivityRegime::Calm);
        assert_eq!(activity_regime(3, 2, 5), ActivityRegime::FragileCalm);
        assert_eq!(activity_regime(5, 2, 5), ActivityRegime::FragileCalm);
        assert_eq!(activity_regime(6, 2, 5), ActivityRegime::Stress);
    }

    #[test]
    fn activity_tracker_reports_transitions_once() {
        let mut t = ActivityTracker::new();
        assert_eq!(t.observe(ActivityRegime::Calm, 0, 4, 0), None);
        assert_eq!(t.observe(ActivityRegime::Calm, 1, 4, 0), None);
        assert_eq!(
            t.observe(ActivityRegime::Stress, 6, 4, 0),
            Some((ActivityRegime::Calm, ActivityRegime::Stress))
        );
        assert_eq!(t.observe(ActivityRegime::Stress, 6, 4, 0), None);
    }
}
