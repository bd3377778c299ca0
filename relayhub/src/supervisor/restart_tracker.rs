//! Crash-loop backoff for worker slots.
//!
//! A crashed worker is always replaced, but a slot that keeps crashing is
//! replaced with a growing delay so a broken deployment does not fork in a
//! tight loop.
//!
//! # Backoff Algorithm
//!
//! - First 2 crashes of a slot within the failure window: immediate replacement
//! - From the 3rd crash on: backoff = base * 2^(crashes - 3)
//! - Backoff is capped at max_backoff
//! - Crashes older than the failure window are forgotten

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default base backoff duration (1 second).
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default maximum backoff duration (5 minutes).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Default failure window (60 seconds).
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Crashes within the window before backoff kicks in.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 10;

#[derive(Debug, Clone)]
pub struct RestartTrackerConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Window for counting crashes.
    pub failure_window: Duration,
    pub failure_threshold: usize,
}

impl Default for RestartTrackerConfig {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            failure_window: DEFAULT_FAILURE_WINDOW,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SlotHistory {
    crashes: Vec<Instant>,
    replacements: u64,
}

impl SlotHistory {
    fn record(&mut self, now: Instant, window: Duration) -> usize {
        self.crashes.retain(|&t| now.duration_since(t) < window);
        self.crashes.push(now);
        self.replacements += 1;
        self.crashes.len()
    }

    fn recent(&self, now: Instant, window: Duration) -> usize {
        self.crashes
            .iter()
            .filter(|&&t| now.duration_since(t) < window)
            .count()
    }
}

/// Per-slot crash history.
#[derive(Debug, Default)]
pub struct RestartTracker {
    history: HashMap<usize, SlotHistory>,
    config: RestartTrackerConfig,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::with_config(RestartTrackerConfig::default())
    }

    pub fn with_config(config: RestartTrackerConfig) -> Self {
        Self {
            history: HashMap::new(),
            config,
        }
    }

    /// Record a crash of `slot` and return how long to wait before
    /// forking its replacement.
    pub fn record_failure(&mut self, slot: usize) -> Duration {
        let crashes = self
            .history
            .entry(slot)
            .or_default()
            .record(Instant::now(), self.config.failure_window);
        let backoff = self.calculate_backoff(crashes);

        debug!(
            "Worker slot {} crashed ({} times in window), backoff: {:?}",
            slot, crashes, backoff
        );

        backoff
    }

    /// base * 2^(crashes - threshold) for crashes >= threshold
    fn calculate_backoff(&self, crashes: usize) -> Duration {
        if crashes < self.config.failure_threshold {
            return Duration::ZERO;
        }

        let exponent = (crashes - self.config.failure_threshold).min(MAX_EXPONENT as usize) as u32;
        let multiplier = 2u32.saturating_pow(exponent);
        self.config
            .base_backoff
            .saturating_mul(multiplier)
            .min(self.config.max_backoff)
    }

    pub fn recent_failures(&self, slot: usize) -> usize {
        self.history
            .get(&slot)
            .map(|h| h.recent(Instant::now(), self.config.failure_window))
            .unwrap_or(0)
    }

    pub fn clear_failures(&mut self, slot: usize) {
        if let Some(history) = self.history.get_mut(&slot) {
            debug!("Clearing crash history for worker slot {}", slot);
            history.crashes.clear();
        }
    }

    pub fn stats(&self) -> RestartTrackerStats {
        let now = Instant::now();
        RestartTrackerStats {
            slots: self.history.len(),
            slots_with_failures: self
                .history
                .values()
                .filter(|h| h.recent(now, self.config.failure_window) > 0)
                .count(),
            total_restarts: self.history.values().map(|h| h.replacements).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartTrackerStats {
    /// Slots that crashed at least once.
    pub slots: usize,
    /// Slots with crashes inside the failure window.
    pub slots_with_failures: usize,
    pub total_restarts: u64,
}
