// src/time.rs

//! Date/time arithmetic and half-open interval helpers.
//!
//! All scheduling times are UTC. An [`Interval`] is `[start, end)`: two
//! intervals that only touch at an endpoint do not overlap.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical timestamp type used throughout the engine.
pub type Timestamp = DateTime<Utc>;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Interval starting at `start` and lasting `duration`.
    pub fn starting_at(start: Timestamp, duration: TimeDelta) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// True when `end <= start`.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Half-open overlap test; touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Whether `other` lies completely inside `self`.
    pub fn covers(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Same duration, moved to a new start.
    pub fn shifted_to(&self, start: Timestamp) -> Self {
        Self::starting_at(start, self.duration())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")
        .unwrap_or_else(|e| panic!("duration pattern does not compile: {e}"))
});

/// Parse a compact duration string such as `"45s"`, `"3m"` or `"1h30m"`.
///
/// A bare integer is taken as seconds.
pub fn parse_duration(s: &str) -> Option<TimeDelta> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<i64>() {
        return if secs >= 0 { TimeDelta::try_seconds(secs) } else { None };
    }
    let caps = DURATION_RE.captures(s)?;
    let part = |idx: usize, unit: i64| -> Option<i64> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse::<i64>().ok()?.checked_mul(unit),
            None => Some(0),
        }
    };
    // Out-of-range values give None.
    let total = part(1, 86_400)?
        .checked_add(part(2, 3_600)?)?
        .checked_add(part(3, 60)?)?
        .checked_add(part(4, 1)?)?;
    TimeDelta::try_seconds(total)
}

/// Inverse of [`parse_duration`] for display (`5400s` -> `"1h30m"`).
pub fn format_duration(d: TimeDelta) -> String {
    let mut secs = d.num_seconds();
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    if secs < 0 {
        out.push('-');
        secs = -secs;
    }
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        let n = secs / size;
        if n > 0 {
            out.push_str(&format!("{n}{unit}"));
            secs -= n * size;
        }
    }
    out
}

/// Serde adapter storing a `TimeDelta` as whole seconds.
pub mod serde_secs {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &TimeDelta, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeDelta, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(TimeDelta::seconds(secs))
    }
}

/// Serde adapter for `Option<TimeDelta>` stored as whole seconds.
pub mod serde_opt_secs {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<TimeDelta>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TimeDelta>, D::Error> {
        let secs = Option::<i64>::deserialize(d)?;
        Ok(secs.map(TimeDelta::seconds))
    }
}
