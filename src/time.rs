//! Simulated time, time units and the real-time clock.
//!
//! Simulated times are plain `f64` values expressed in the time unit declared
//! by the architecture. Real-time runs map them onto wall-clock instants
//! through an acceleration factor: with a factor of 1800, one simulated hour
//! lasts two wall-clock seconds.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PreconditionError, SimResult};

/// Unit in which simulated times of an architecture are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Number of wall-clock seconds in one unit.
    #[must_use]
    pub const fn seconds_per_unit(self) -> f64 {
        match self {
            Self::Nanoseconds => 1e-9,
            Self::Microseconds => 1e-6,
            Self::Milliseconds => 1e-3,
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3600.0,
            Self::Days => 86_400.0,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Finite(f64),
    Named(String),
}

impl TimeRepr {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            Self::Finite(value)
        } else if value > 0.0 {
            Self::Named("+inf".to_string())
        } else {
            Self::Named("-inf".to_string())
        }
    }

    fn decode(self) -> Result<f64, String> {
        match self {
            Self::Finite(v) => Ok(v),
            Self::Named(s) if s == "+inf" => Ok(f64::INFINITY),
            Self::Named(s) if s == "-inf" => Ok(f64::NEG_INFINITY),
            Self::Named(s) => Err(format!("invalid time value '{s}'")),
        }
    }
}

/// A point in simulated time.
///
/// JSON cannot carry infinities, so `SimTime::INFINITY` travels as `"+inf"`.
///
/// # Examples
///
/// ```
/// use distdevs::{SimDuration, SimTime};
///
/// let t = SimTime::new(2.0) + SimDuration::new(0.5);
/// assert_eq!(t, SimTime::new(2.5));
/// assert!(SimTime::INFINITY > t);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct SimTime(f64);

impl SimTime {
    /// The start of every simulation unless told otherwise.
    pub const ZERO: Self = Self(0.0);

    /// A time that is never reached (a passive model's next event).
    pub const INFINITY: Self = Self(f64::INFINITY);

    /// Creates a simulated time.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Returns the raw value in the architecture's time unit.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns true if this time is finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Total ordering (NaN sorts last).
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }

    /// The earlier of two times.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.total_cmp(&other) == Ordering::Greater {
            other
        } else {
            self
        }
    }

    /// Duration elapsed since `earlier` (zero if `earlier` is later).
    #[must_use]
    pub fn since(self, earlier: Self) -> SimDuration {
        SimDuration((self.0 - earlier.0).max(0.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SimTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TimeRepr::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SimTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TimeRepr::deserialize(deserializer)?
            .decode()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// A span of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct SimDuration(f64);

impl SimDuration {
    /// No time at all.
    pub const ZERO: Self = Self(0.0);

    /// Never (the time advance of a passive state).
    pub const INFINITY: Self = Self(f64::INFINITY);

    /// Creates a duration.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Returns the raw value in the architecture's time unit.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns true if this duration is finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SimDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TimeRepr::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SimDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TimeRepr::deserialize(deserializer)?
            .decode()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: SimTime) -> SimDuration {
        SimDuration(self.0 - rhs.0)
    }
}

/// Maps simulated time onto wall-clock time for a real-time run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealTimeClock {
    wall_start: DateTime<Utc>,
    sim_start: SimTime,
    time_unit: TimeUnit,
    acceleration: f64,
}

impl RealTimeClock {
    /// Creates a clock where `sim_start` happens at `wall_start`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::InvalidArgument` if the acceleration factor
    /// is not a strictly positive finite number.
    pub fn new(
        wall_start: DateTime<Utc>,
        sim_start: SimTime,
        time_unit: TimeUnit,
        acceleration: f64,
    ) -> SimResult<Self> {
        if !(acceleration.is_finite() && acceleration > 0.0) {
            return Err(PreconditionError::InvalidArgument {
                reason: format!("acceleration factor must be positive, got {acceleration}"),
            }
            .into());
        }
        Ok(Self {
            wall_start,
            sim_start,
            time_unit,
            acceleration,
        })
    }

    /// Wall-clock instant at which the run starts.
    #[must_use]
    pub const fn wall_start(&self) -> DateTime<Utc> {
        self.wall_start
    }

    /// Simulated time at which the run starts.
    #[must_use]
    pub const fn sim_start(&self) -> SimTime {
        self.sim_start
    }

    /// Acceleration factor of the run.
    #[must_use]
    pub const fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Wall-clock length of a simulated duration.
    #[must_use]
    pub fn wall_duration(&self, d: SimDuration) -> std::time::Duration {
        let secs = d.value() * self.time_unit.seconds_per_unit() / self.acceleration;
        if secs.is_finite() && secs > 0.0 {
            std::time::Duration::from_secs_f64(secs)
        } else if secs > 0.0 {
            std::time::Duration::MAX
        } else {
            std::time::Duration::ZERO
        }
    }

    /// Wall-clock instant at which simulated time `t` is reached.
    #[must_use]
    pub fn wall_instant(&self, t: SimTime) -> DateTime<Utc> {
        let offset = self.wall_duration(t.since(self.sim_start));
        chrono::Duration::from_std(offset)
            .ok()
            .and_then(|offset| self.wall_start.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Simulated time corresponding to the wall-clock instant `now`.
    #[must_use]
    pub fn sim_time_at(&self, now: DateTime<Utc>) -> SimTime {
        let elapsed = now - self.wall_start;
        let secs = elapsed.num_microseconds().map_or(0.0, |us| us as f64 / 1e6);
        let sim = secs * self.acceleration / self.time_unit.seconds_per_unit();
        SimTime::new(self.sim_start.value() + sim.max(0.0))
    }

    /// Simulated time corresponding to the current wall-clock instant.
    #[must_use]
    pub fn sim_now(&self) -> SimTime {
        self.sim_time_at(Utc::now())
    }

    /// Wall-clock time left before `t` is reached (zero if already past).
    #[must_use]
    pub fn until(&self, t: SimTime) -> std::time::Duration {
        (self.wall_instant(t) - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_times_survive_json() {
        let json = serde_json::to_string(&SimTime::INFINITY).unwrap();
        assert_eq!(json, "\"+inf\"");
        let back: SimTime = serde_json::from_str(&json).unwrap();
        assert!(!back.is_finite());

        let finite: SimTime = serde_json::from_str("1.5").unwrap();
        assert_eq!(finite, SimTime::new(1.5));
        assert!(serde_json::from_str::<SimTime>("\"soon\"").is_err());
    }

    #[test]
    fn min_prefers_earlier_time() {
        assert_eq!(SimTime::new(3.0).min(SimTime::INFINITY), SimTime::new(3.0));
        assert_eq!(SimTime::INFINITY.min(SimTime::new(1.0)), SimTime::new(1.0));
    }

    #[test]
    fn clock_maps_hours_with_acceleration() {
        let start = Utc::now();
        let clock = RealTimeClock::new(start, SimTime::ZERO, TimeUnit::Hours, 1800.0).unwrap();
        // One simulated hour lasts two wall-clock seconds.
        assert_eq!(clock.wall_duration(SimDuration::new(1.0)), std::time::Duration::from_secs(2));
        let at = clock.wall_instant(SimTime::new(24.1));
        assert!(((at - start).num_milliseconds() - 48_200).abs() <= 1);

        let later = start + chrono::Duration::seconds(4);
        let t = clock.sim_time_at(later);
        assert!((t.value() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn clock_rejects_non_positive_acceleration() {
        let err = RealTimeClock::new(Utc::now(), SimTime::ZERO, TimeUnit::Seconds, 0.0).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn infinite_duration_maps_to_max_wall_duration() {
        let clock = RealTimeClock::new(Utc::now(), SimTime::ZERO, TimeUnit::Seconds, 10.0).unwrap();
        assert_eq!(clock.wall_duration(SimDuration::INFINITY), std::time::Duration::MAX);
        assert_eq!(clock.wall_duration(SimDuration::ZERO), std::time::Duration::ZERO);
    }
}
