//! Per-intent cooldown tracking with an injectable clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether an intent may trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownState {
    Eligible,
    CoolingDown { remaining: Duration },
}

impl CooldownState {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Last successful trigger time per intent
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    duration: Duration,
    last_action: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last_action: HashMap::new(),
        }
    }

    /// State of `intent` at `now`.
    ///
    /// Eligible once `now - last >= duration`. If the clock went backwards
    /// the full duration remains.
    pub fn state(&self, intent: &str, now: DateTime<Utc>) -> CooldownState {
        let Some(last) = self.last_action.get(intent) else {
            return CooldownState::Eligible;
        };

        let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.duration {
            CooldownState::Eligible
        } else {
            CooldownState::CoolingDown {
                remaining: self.duration - elapsed,
            }
        }
    }

    /// Start the cooldown for `intent`
    pub fn record(&mut self, intent: &str, at: DateTime<Utc>) {
        self.last_action.insert(intent.to_string(), at);
    }

    /// Every intent that has triggered, sorted by name
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(String, CooldownState)> {
        let mut entries: Vec<(String, CooldownState)> = self
            .last_action
            .keys()
            .map(|intent| (intent.clone(), self.state(intent, now)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIFTEEN_MIN: Duration = Duration::from_secs(15 * 60);

    #[test]
    fn test_unknown_intent_is_eligible() {
        let tracker = CooldownTracker::new(FIFTEEN_MIN);
        assert_eq!(tracker.state("gaming", Utc::now()), CooldownState::Eligible);
    }

    #[test]
    fn test_cooldown_boundary() {
        let clock = ManualClock::default();
        let mut tracker = CooldownTracker::new(FIFTEEN_MIN);
        tracker.record("gaming", clock.now());

        clock.advance(Duration::from_secs(14 * 60));
        assert_eq!(
            tracker.state("gaming", clock.now()),
            CooldownState::CoolingDown {
                remaining: Duration::from_secs(60)
            }
        );

        clock.advance(Duration::from_secs(60));
        assert!(tracker.state("gaming", clock.now()).is_eligible());

        // Other intents never affected
        assert!(tracker.state("development", clock.now()).is_eligible());
    }

    #[test]
    fn test_clock_going_backwards() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut tracker = CooldownTracker::new(FIFTEEN_MIN);
        tracker.record("idle", start);

        clock.set(start - chrono::Duration::minutes(5));
        assert_eq!(
            tracker.state("idle", clock.now()),
            CooldownState::CoolingDown {
                remaining: FIFTEEN_MIN
            }
        );
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let before = other.now();
        clock.advance(Duration::from_secs(30));
        assert_eq!(other.now() - before, chrono::Duration::seconds(30));
    }

    #[test]
    fn test_snapshot_sorted() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new(FIFTEEN_MIN);
        tracker.record("multimedia", now);
        tracker.record("gaming", now - chrono::Duration::hours(1));

        let snapshot = tracker.snapshot(now);
        assert_eq!(snapshot[0].0, "gaming");
        assert!(snapshot[0].1.is_eligible());
        assert_eq!(snapshot[1].0, "multimedia");
        assert!(!snapshot[1].1.is_eligible());
    }
}
