use std::collections::VecDeque;

use tracing::{info, warn};

use crate::config::AdaptiveConfig;

/// Change in throttle state caused by one outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleChange {
    Engaged { success_ratio: f64 },
    Released { success_ratio: f64 },
}

/// Success-ratio throttle over the most recent terminal outcomes
///
/// Engages when the ratio drops below `low_water` (once `min_samples`
/// outcomes are known) and releases when it is back at or above `high_water`.
/// While engaged, the hourly budget is scaled by `throttle_factor`.
#[derive(Debug, Clone)]
pub struct AdaptiveThrottle {
    config: AdaptiveConfig,
    outcomes: VecDeque<bool>,
    throttled: bool,
}

impl AdaptiveThrottle {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(config.window),
            config,
            throttled: false,
        }
    }

    pub fn record(&mut self, success: bool) -> Option<ThrottleChange> {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.config.window {
            self.outcomes.pop_front();
        }

        let ratio = self.success_ratio()?;
        if !self.throttled && ratio < self.config.low_water {
            self.throttled = true;
            warn!(success_ratio = ratio, low_water = self.config.low_water, "adaptive throttle engaged");
            return Some(ThrottleChange::Engaged { success_ratio: ratio });
        }
        if self.throttled && ratio >= self.config.high_water {
            self.throttled = false;
            info!(success_ratio = ratio, high_water = self.config.high_water, "adaptive throttle released");
            return Some(ThrottleChange::Released { success_ratio: ratio });
        }
        None
    }

    /// Ratio over the window, once enough samples exist
    pub fn success_ratio(&self) -> Option<f64> {
        if self.outcomes.len() < self.config.min_samples {
            return None;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        Some(successes as f64 / self.outcomes.len() as f64)
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Hourly budget after throttling, never below one
    pub fn effective_limit(&self, calls_per_hour: u32) -> u32 {
        if !self.throttled {
            return calls_per_hour;
        }
        let scaled = (f64::from(calls_per_hour) * self.config.throttle_factor).floor() as u32;
        scaled.clamp(1, calls_per_hour.max(1))
    }

    pub fn update_config(&mut self, config: AdaptiveConfig) {
        while self.outcomes.len() > config.window {
            self.outcomes.pop_front();
        }
        self.config = config;
    }

    /// Forget history and release
    pub fn reset(&mut self) {
        self.outcomes.clear();
        self.throttled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> AdaptiveThrottle {
        AdaptiveThrottle::new(AdaptiveConfig {
            window: 10,
            min_samples: 4,
            low_water: 0.3,
            high_water: 0.6,
            throttle_factor: 0.5,
        })
    }

    #[test]
    fn test_needs_min_samples() {
        let mut t = throttle();
        for _ in 0..3 {
            assert_eq!(t.record(false), None);
        }
        assert!(!t.is_throttled());
        assert!(matches!(t.record(false), Some(ThrottleChange::Engaged { .. })));
        assert_eq!(t.effective_limit(60), 30);
    }

    #[test]
    fn test_hysteresis_between_water_marks() {
        let mut t = throttle();
        for _ in 0..4 {
            t.record(false);
        }
        // 5/10 successes is above low water but below high water
        for _ in 0..5 {
            t.record(true);
        }
        assert!(t.is_throttled());
        assert!(matches!(t.record(true), Some(ThrottleChange::Released { .. })));
        assert_eq!(t.effective_limit(60), 60);
    }

    #[test]
    fn test_effective_limit_floor_is_one() {
        let mut t = throttle();
        for _ in 0..4 {
            t.record(false);
        }
        assert_eq!(t.effective_limit(1), 1);
        assert_eq!(t.effective_limit(3), 1);
    }
}
