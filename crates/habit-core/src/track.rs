//! Daily track data model
//!
//! A track holds the completion state of every habit for one user and one
//! calendar date. Statuses are embedded so a single document read yields the
//! whole day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Habit, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A user-local calendar date in `YYYY-MM-DD` form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackDate(String);

impl TrackDate {
    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date.format(DATE_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for TrackDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map_err(|e| Error::InvalidArgument(format!("invalid date {s:?}: {e}")))?;
        let canonical = Self::from_naive(date);
        // chrono accepts "2024-1-1"; the store key must be zero padded
        if canonical.0 != s {
            return Err(Error::InvalidArgument(format!(
                "invalid date {s:?}: expected YYYY-MM-DD"
            )));
        }
        Ok(canonical)
    }
}

impl TryFrom<String> for TrackDate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TrackDate> for String {
    fn from(value: TrackDate) -> Self {
        value.0
    }
}

impl std::fmt::Display for TrackDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Completion state of one habit inside a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitStatus {
    pub habit_id: String,

    /// Name at the time the status was created; not re-synced on rename
    pub habit_name: String,

    #[serde(default)]
    pub done: bool,
}

impl HabitStatus {
    pub fn pending(habit: &Habit) -> Self {
        Self {
            habit_id: habit.id.clone(),
            habit_name: habit.name.clone(),
            done: false,
        }
    }
}

/// One user's track for one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTrack {
    /// Unique identifier (trk-xxxxxxxxxx)
    pub id: String,

    pub user_id: String,

    pub date: TrackDate,

    #[serde(default)]
    pub habit_statuses: Vec<HabitStatus>,
}

/// Result of flipping statuses to done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkOutcome {
    /// Entries whose habit id matched
    pub matched: usize,
    /// Entries that went from not done to done
    pub flipped: usize,
}

impl DailyTrack {
    /// Build a fresh track with one pending status per habit, in the given order.
    pub fn materialize(id: String, user_id: String, date: TrackDate, habits: &[Habit]) -> Self {
        Self {
            id,
            user_id,
            date,
            habit_statuses: habits.iter().map(HabitStatus::pending).collect(),
        }
    }

    pub fn status(&self, habit_id: &str) -> Option<&HabitStatus> {
        self.habit_statuses.iter().find(|s| s.habit_id == habit_id)
    }

    /// Append a pending status for a newly registered habit
    pub fn append_pending(&mut self, habit: &Habit) {
        self.habit_statuses.push(HabitStatus::pending(habit));
    }

    /// Remove the first not-done status for `habit_id`.
    ///
    /// Done statuses are never removed. Returns whether an entry was removed.
    pub fn remove_pending(&mut self, habit_id: &str) -> bool {
        let position = self
            .habit_statuses
            .iter()
            .position(|s| s.habit_id == habit_id && !s.done);

        match position {
            Some(index) => {
                self.habit_statuses.remove(index);
                true
            }
            None => false,
        }
    }

    /// Set done on every status for `habit_id`
    pub fn mark_done(&mut self, habit_id: &str) -> MarkOutcome {
        let mut outcome = MarkOutcome::default();
        for status in self
            .habit_statuses
            .iter_mut()
            .filter(|s| s.habit_id == habit_id)
        {
            outcome.matched += 1;
            if !status.done {
                status.done = true;
                outcome.flipped += 1;
            }
        }
        outcome
    }

    pub fn done_count(&self) -> usize {
        self.habit_statuses.iter().filter(|s| s.done).count()
    }
}
