//! Source of "today" for track propagation

use chrono::Local;

use crate::TrackDate;

pub trait Clock: Send + Sync {
    /// The caller's current local calendar date
    fn today(&self) -> TrackDate;
}

/// Local wall clock of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> TrackDate {
        TrackDate::from_naive(Local::now().date_naive())
    }
}

/// A clock pinned to one date
#[derive(Debug, Clone)]
pub struct FixedClock(pub TrackDate);

impl Clock for FixedClock {
    fn today(&self) -> TrackDate {
        self.0.clone()
    }
}
