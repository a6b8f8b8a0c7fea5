//! Clock sources used to resolve relative start-after timestamps

use chrono::Utc;

/// Something that can tell the daemon's current time, in seconds
pub trait ClockSource {
    fn now(&self) -> f64;
}

/// Wall clock of the local host.
///
/// On the camera the daemon runs against the same clock, so this is what the
/// control panel uses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }
}

/// A clock frozen at a given time
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub f64);

impl ClockSource for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}
