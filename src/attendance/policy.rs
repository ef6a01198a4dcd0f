use chrono::Duration;

/// Tunable windows of the attendance core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendancePolicy {
    /// Repeat reads of one tag closer than this are a single tap.
    pub debounce: Duration,
    /// Same `(tag, observed_at, device_id)` inside this window replays the first result.
    pub replay_window: Duration,
    /// How far in the future a reader clock may run.
    pub clock_skew: Duration,
    /// Oldest event still accepted.
    pub staleness: Duration,
    /// Open records older than this are stale-open.
    pub max_session: Duration,
    /// Repeat sightings of an unknown tag inside this window update the existing row.
    pub unknown_tag_cooldown: Duration,
    /// Fail-fast bound for directory and store calls.
    pub upstream_timeout: std::time::Duration,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::seconds(3),
            replay_window: Duration::seconds(5),
            clock_skew: Duration::minutes(2),
            staleness: Duration::hours(24),
            max_session: Duration::hours(18),
            unknown_tag_cooldown: Duration::minutes(10),
            upstream_timeout: std::time::Duration::from_secs(3),
        }
    }
}

impl AttendancePolicy {
    /// Replay window for the moka TTL; negative windows collapse to zero.
    pub fn replay_ttl(&self) -> std::time::Duration {
        self.replay_window.to_std().unwrap_or_default()
    }

    pub fn unknown_tag_ttl(&self) -> std::time::Duration {
        self.unknown_tag_cooldown.to_std().unwrap_or_default()
    }
}
