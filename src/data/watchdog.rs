//! Per-stream liveness tracking.
//!
//! Every stream (the whole connection, or a single device) starts out
//! [`Connectivity::Stale`]. A qualifying sample makes it live and re-arms its
//! timer; when the timer fires the stream goes stale only if nothing
//! qualifying arrived within the staleness timeout.
//!
//! Timers here are plain deadlines. The session loop sleeps until
//! [`Watchdog::next_deadline`] and then calls [`Watchdog::fire_due`], so
//! cancelling a timer is just clearing its deadline and nothing can fire
//! into a session after teardown.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Silence after which a stream is considered stale.
pub const STALENESS_TIMEOUT: Duration = Duration::from_secs(8);

/// Delay the stale check is armed for after each qualifying sample.
///
/// One second longer than [`STALENESS_TIMEOUT`] so the check never lands
/// exactly on the boundary.
pub const REARM_DELAY: Duration = Duration::from_secs(9);

/// Liveness verdict for a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Live,
    #[default]
    Stale,
}

impl Connectivity {
    pub fn is_live(&self) -> bool {
        matches!(self, Connectivity::Live)
    }
}

/// One logical source of liveness.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKey {
    /// The connection as a whole (dashboard-level status).
    Connection,
    /// A single roster device, by resolved id.
    Device(String),
}

impl StreamKey {
    pub fn device(id: impl Into<String>) -> Self {
        StreamKey::Device(id.into())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::Connection => f.write_str("connection"),
            StreamKey::Device(id) => write!(f, "device:{}", id),
        }
    }
}

/// A one-shot, re-armable deadline.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Instant>,
    delay: Option<Duration>,
}

impl Timer {
    /// Arm (or re-arm) the timer to fire `delay` after `now`.
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.delay = Some(delay);
        self.deadline = Some(now + delay);
    }

    /// Cancel any pending deadline and arm again with the last delay.
    ///
    /// Returns false if the timer was never armed.
    pub fn reset(&mut self, now: Instant) -> bool {
        match self.delay {
            Some(delay) => {
                self.arm(now, delay);
                true
            }
            None => false,
        }
    }

    /// Cancel the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Clone, Default)]
struct StreamState {
    connectivity: Connectivity,
    last_accepted: Option<Instant>,
    timer: Timer,
}

/// Liveness state machines for every tracked stream.
#[derive(Debug, Clone)]
pub struct Watchdog {
    staleness_timeout: Duration,
    rearm_delay: Duration,
    streams: BTreeMap<StreamKey, StreamState>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(STALENESS_TIMEOUT, REARM_DELAY)
    }
}

impl Watchdog {
    pub fn new(staleness_timeout: Duration, rearm_delay: Duration) -> Self {
        Self {
            staleness_timeout,
            rearm_delay,
            streams: BTreeMap::new(),
        }
    }

    pub fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }

    /// Current verdict; untracked streams are stale.
    pub fn connectivity(&self, key: &StreamKey) -> Connectivity {
        self.streams.get(key).map(|s| s.connectivity).unwrap_or_default()
    }

    /// Record a qualifying sample: the stream becomes live and its stale
    /// check is cancelled and re-armed.
    pub fn accept(&mut self, key: StreamKey, now: Instant) -> Connectivity {
        let rearm_delay = self.rearm_delay;
        let state = self.streams.entry(key).or_default();
        state.connectivity = Connectivity::Live;
        state.last_accepted = Some(now);
        if !state.timer.reset(now) {
            state.timer.arm(now, rearm_delay);
        }
        Connectivity::Live
    }

    /// Feed one sample's self-reported liveness and return the verdict.
    ///
    /// Non-qualifying samples register the stream but never refresh it.
    pub fn observe(&mut self, key: StreamKey, qualifies: bool, now: Instant) -> Connectivity {
        if qualifies {
            self.accept(key, now)
        } else {
            self.streams.entry(key).or_default().connectivity
        }
    }

    /// Earliest pending deadline across all streams.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.streams.values().filter_map(|s| s.timer.deadline()).min()
    }

    /// Run every timer that is due at `now`.
    ///
    /// Returns the streams that went from live to stale. A due stream that
    /// has heard from its source within the timeout is re-armed instead.
    pub fn fire_due(&mut self, now: Instant) -> Vec<StreamKey> {
        let timeout = self.staleness_timeout;
        let rearm_delay = self.rearm_delay;
        let mut expired = Vec::new();

        for (key, state) in self.streams.iter_mut().filter(|(_, s)| s.timer.is_due(now)) {
            state.timer.cancel();
            let silent_for = state.last_accepted.map(|at| now.duration_since(at));
            match silent_for {
                Some(silence) if silence <= timeout => state.timer.arm(now, rearm_delay),
                _ => {
                    if state.connectivity.is_live() {
                        state.connectivity = Connectivity::Stale;
                        expired.push(key.clone());
                    }
                }
            }
        }

        expired
    }

    /// Mark one stream stale if it has been silent longer than the timeout.
    ///
    /// Used for explicit offline notices, which must not flap a stream that
    /// is still reporting.
    pub fn mark_stale_if_silent(&mut self, key: &StreamKey, now: Instant) -> bool {
        let timeout = self.staleness_timeout;
        let Some(state) = self.streams.get_mut(key) else {
            return false;
        };
        let silent = state.last_accepted.is_none_or(|at| now.duration_since(at) > timeout);
        if silent && state.connectivity.is_live() {
            state.connectivity = Connectivity::Stale;
            state.timer.cancel();
            true
        } else {
            false
        }
    }

    /// Force every stream stale and cancel all timers.
    ///
    /// Returns the streams that were live.
    pub fn force_stale_all(&mut self) -> Vec<StreamKey> {
        let mut expired = Vec::new();
        for (key, state) in self.streams.iter_mut() {
            state.timer.cancel();
            if state.connectivity.is_live() {
                state.connectivity = Connectivity::Stale;
                expired.push(key.clone());
            }
        }
        expired
    }

    /// Move a stream's state to a new key (device id upgraded in the roster).
    pub fn rename(&mut self, from: &StreamKey, to: StreamKey) {
        if let Some(state) = self.streams.remove(from) {
            self.streams.insert(to, state);
        }
    }

    /// Cancel every pending timer, returning how many were armed.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for state in self.streams.values_mut() {
            if state.timer.cancel() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn armed_timers(&self) -> usize {
        self.streams.values().filter(|s| s.timer.is_armed()).count()
    }

    pub fn tracked(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Step the watchdog the way the session loop does and report when the
    /// stream went stale.
    fn run_until(watchdog: &mut Watchdog, key: &StreamKey, until: Instant) -> Option<Instant> {
        while let Some(deadline) = watchdog.next_deadline() {
            if deadline > until {
                break;
            }
            if watchdog.fire_due(deadline).contains(key) {
                return Some(deadline);
            }
        }
        None
    }

    #[test]
    fn test_initial_state_is_stale() {
        let watchdog = Watchdog::default();
        assert_eq!(watchdog.connectivity(&StreamKey::Connection), Connectivity::Stale);
        assert_eq!(watchdog.next_deadline(), None);
    }

    #[test]
    fn test_accept_goes_live_and_arms() {
        let mut watchdog = Watchdog::default();
        let t0 = Instant::now();
        assert_eq!(watchdog.accept(StreamKey::Connection, t0), Connectivity::Live);
        assert_eq!(watchdog.next_deadline(), Some(t0 + REARM_DELAY));
        assert_eq!(watchdog.armed_timers(), 1);
    }

    #[test]
    fn test_silence_goes_stale_between_eight_and_nine_seconds() {
        let mut watchdog = Watchdog::default();
        let key = StreamKey::device("a");
        let t0 = Instant::now();
        watchdog.accept(key.clone(), t0);

        assert!(watchdog.fire_due(t0 + secs(8)).is_empty());
        assert!(watchdog.connectivity(&key).is_live());

        let stale_at = run_until(&mut watchdog, &key, t0 + secs(30)).unwrap();
        let elapsed = stale_at - t0;
        assert!(elapsed > STALENESS_TIMEOUT && elapsed <= REARM_DELAY);
        assert_eq!(watchdog.connectivity(&key), Connectivity::Stale);
        assert_eq!(watchdog.armed_timers(), 0);
    }

    #[test]
    fn test_sample_at_seven_seconds_resets_the_window() {
        let mut watchdog = Watchdog::default();
        let key = StreamKey::Connection;
        let t0 = Instant::now();
        watchdog.accept(key.clone(), t0);
        watchdog.accept(key.clone(), t0 + secs(7));

        // Only one deadline exists: the earlier one was replaced, not stacked.
        assert_eq!(watchdog.armed_timers(), 1);
        assert_eq!(watchdog.next_deadline(), Some(t0 + secs(16)));

        assert_eq!(run_until(&mut watchdog, &key, t0 + secs(15)), None);
        assert!(watchdog.connectivity(&key).is_live());

        let stale_at = run_until(&mut watchdog, &key, t0 + secs(30)).unwrap();
        assert_eq!(stale_at, t0 + secs(16));
    }

    #[test]
    fn test_non_qualifying_sample_does_not_refresh() {
        let mut watchdog = Watchdog::default();
        let key = StreamKey::device("a");
        let t0 = Instant::now();

        assert_eq!(watchdog.observe(key.clone(), false, t0), Connectivity::Stale);
        assert_eq!(watchdog.tracked(), 1);
        assert_eq!(watchdog.next_deadline(), None);

        watchdog.observe(key.clone(), true, t0);
        watchdog.observe(key.clone(), false, t0 + secs(5));
        assert_eq!(watchdog.next_deadline(), Some(t0 + REARM_DELAY));
    }

    #[test]
    fn test_due_timer_rearms_when_rearm_equals_timeout() {
        let mut watchdog = Watchdog::new(secs(8), secs(8));
        let key = StreamKey::Connection;
        let t0 = Instant::now();
        watchdog.accept(key.clone(), t0);

        // Exactly at the boundary the stream is not yet silent for longer
        // than the timeout, so the check is re-armed rather than dropped.
        assert!(watchdog.fire_due(t0 + secs(8)).is_empty());
        assert_eq!(watchdog.next_deadline(), Some(t0 + secs(16)));
        assert_eq!(watchdog.fire_due(t0 + secs(16)), vec![key]);
    }

    #[test]
    fn test_force_stale_all() {
        let mut watchdog = Watchdog::default();
        let t0 = Instant::now();
        watchdog.accept(StreamKey::Connection, t0);
        watchdog.accept(StreamKey::device("a"), t0);
        watchdog.observe(StreamKey::device("b"), false, t0);

        let expired = watchdog.force_stale_all();
        assert_eq!(expired, vec![StreamKey::Connection, StreamKey::device("a")]);
        assert_eq!(watchdog.armed_timers(), 0);
        assert_eq!(watchdog.connectivity(&StreamKey::device("a")), Connectivity::Stale);
    }

    #[test]
    fn test_mark_stale_if_silent_respects_timeout() {
        let mut watchdog = Watchdog::default();
        let key = StreamKey::device("a");
        let t0 = Instant::now();
        watchdog.accept(key.clone(), t0);

        assert!(!watchdog.mark_stale_if_silent(&key, t0 + secs(3)));
        assert!(watchdog.connectivity(&key).is_live());

        watchdog.accept(key.clone(), t0 + secs(4));
        assert!(watchdog.mark_stale_if_silent(&key, t0 + secs(13)));
        assert_eq!(watchdog.connectivity(&key), Connectivity::Stale);
        assert_eq!(watchdog.armed_timers(), 0);

        assert!(!watchdog.mark_stale_if_silent(&StreamKey::device("zz"), t0));
    }

    #[test]
    fn test_rename_keeps_state() {
        let mut watchdog = Watchdog::default();
        let t0 = Instant::now();
        watchdog.accept(StreamKey::device("local-1"), t0);
        watchdog.rename(&StreamKey::device("local-1"), StreamKey::device("42"));

        assert!(watchdog.connectivity(&StreamKey::device("42")).is_live());
        assert_eq!(watchdog.connectivity(&StreamKey::device("local-1")), Connectivity::Stale);
        assert_eq!(watchdog.tracked(), 1);
    }

    #[test]
    fn test_cancel_all_counts_armed_timers() {
        let mut watchdog = Watchdog::default();
        let t0 = Instant::now();
        watchdog.accept(StreamKey::Connection, t0);
        watchdog.accept(StreamKey::device("a"), t0);
        watchdog.observe(StreamKey::device("b"), false, t0);

        assert_eq!(watchdog.cancel_all(), 2);
        assert_eq!(watchdog.next_deadline(), None);
        assert_eq!(watchdog.cancel_all(), 0);
    }

    #[test]
    fn test_timer_reset_and_cancel() {
        let mut timer = Timer::default();
        let t0 = Instant::now();
        assert!(!timer.reset(t0));
        assert!(!timer.cancel());

        timer.arm(t0, secs(9));
        assert!(timer.is_due(t0 + secs(9)));
        assert!(!timer.is_due(t0 + secs(8)));

        assert!(timer.reset(t0 + secs(2)));
        assert_eq!(timer.deadline(), Some(t0 + secs(11)));

        assert!(timer.cancel());
        assert!(!timer.is_armed());
        assert!(timer.reset(t0 + secs(3)));
        assert_eq!(timer.deadline(), Some(t0 + secs(12)));
    }
}
