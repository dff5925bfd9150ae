use std::time::Duration;

use custos_clock::DurationSecs;
use serde::Deserialize;

/// Configuration for how eagerly a session renews its tokens
///
/// Can be embedded in a larger application configuration; every field is
/// optional when deserialized and falls back to its default.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    refresh_lookahead: DurationSecs,
    #[serde(with = "secs")]
    check_interval: Duration,
    remember_me_default: bool,
}

impl Default for SessionConfig {
    /// Default session configuration
    ///
    /// Refreshes tokens within 60 seconds of expiry, checks in the background
    /// every 5 minutes, and does not remember sessions unless asked.
    fn default() -> Self {
        Self {
            refresh_lookahead: DurationSecs(60),
            check_interval: Duration::from_secs(5 * 60),
            remember_me_default: false,
        }
    }
}

impl SessionConfig {
    /// Constructs a new session configuration
    ///
    /// An access token is refreshed once it is within `refresh_lookahead` of
    /// expiring. The background task looks for such tokens every
    /// `check_interval`.
    pub fn new(refresh_lookahead: DurationSecs, check_interval: Duration) -> Self {
        Self {
            refresh_lookahead,
            check_interval,
            ..Self::default()
        }
    }

    /// Sets the refresh lookahead window
    pub fn with_refresh_lookahead(mut self, refresh_lookahead: DurationSecs) -> Self {
        self.refresh_lookahead = refresh_lookahead;
        self
    }

    /// Sets the background check interval
    ///
    /// A zero interval is raised to one second.
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Sets whether logins remember the session unless told otherwise
    pub fn with_remember_me_default(mut self, remember_me: bool) -> Self {
        self.remember_me_default = remember_me;
        self
    }

    /// The refresh lookahead window
    #[inline]
    pub fn refresh_lookahead(&self) -> DurationSecs {
        self.refresh_lookahead
    }

    /// The background check interval
    #[inline]
    pub fn check_interval(&self) -> Duration {
        self.check_interval.max(Duration::from_secs(1))
    }

    /// Whether logins remember the session by default
    #[inline]
    pub fn remember_me_default(&self) -> bool {
        self.remember_me_default
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
