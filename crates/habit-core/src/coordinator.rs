//! Cross-entity consistency coordinator
//!
//! Every operation that touches more than one collection, or reads and then
//! writes the same document, runs in exactly one store transaction opened
//! here. Entity stores never commit; this module does.
//!
//! Invariants kept:
//! - at most one track per (user, date);
//! - a track lists the habits that existed when it was created, plus habits
//!   registered while it is today's track;
//! - done statuses are never removed, deleting a habit only drops its pending
//!   status from today's track;
//! - points rise by `points_per_completion` once per (user, date, habit).

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::db::{DocumentStore, Transaction};
use crate::habit::normalize_name;
use crate::id::{generate_id, validate_id};
use crate::store::{DocHabitStore, DocTrackStore, DocUserStore, HabitStore, TrackStore, UserStore};
use crate::{Config, Context, DailyTrack, Error, Habit, Result, TrackDate, User};

/// Attempts for the read-after-conflict path of track materialization
pub const MAX_CREATE_ATTEMPTS: usize = 3;

/// Result of marking a habit done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkDone {
    pub track: DailyTrack,
    /// Points credited by this call; zero when the habit was already done
    pub awarded: u64,
    /// User's total after this call
    pub points: u64,
}

pub struct Coordinator<U = DocUserStore, H = DocHabitStore, T = DocTrackStore> {
    db: DocumentStore,
    users: U,
    habits: H,
    tracks: T,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Coordinator {
    /// Coordinator over the document-backed entity stores
    pub fn new(db: DocumentStore, config: Config) -> Self {
        Self::with_stores(db, DocUserStore, DocHabitStore, DocTrackStore, config)
    }
}

impl<U: UserStore, H: HabitStore, T: TrackStore> Coordinator<U, H, T> {
    pub fn with_stores(db: DocumentStore, users: U, habits: H, tracks: T, config: Config) -> Self {
        Self {
            db,
            users,
            habits,
            tracks,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the source of "today"
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn today(&self) -> TrackDate {
        self.clock.today()
    }

    fn begin(&self, ctx: &Context) -> Result<Transaction> {
        self.db.begin(&ctx.clamped(self.config.op_timeout()))
    }

    /// Register a new user with zero points
    pub fn sign_up(&self, ctx: &Context, username: &str, password_hash: &str) -> Result<User> {
        let username = normalize_name("username", username)?;
        let mut tx = self.begin(ctx)?;

        if self.users.find_by_username(&mut tx, &username)?.is_some() {
            tx.rollback();
            return Err(Error::AlreadyExists(format!("user {username:?}")));
        }

        let user = User::new(
            generate_id(&self.config.ids.user_prefix),
            username,
            password_hash.to_string(),
        );
        self.users.insert(&mut tx, &user)?;
        tx.commit()?;

        tracing::info!(user_id = %user.id, username = %user.username, "user signed up");
        Ok(user)
    }

    pub fn get_user(&self, ctx: &Context, user_id: &str) -> Result<User> {
        validate_id(user_id)?;
        let mut tx = self.begin(ctx)?;
        let user = self
            .users
            .find(&mut tx, user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        tx.commit()?;
        Ok(user)
    }

    /// Look a user up by username
    pub fn find_user(&self, ctx: &Context, username: &str) -> Result<User> {
        let username = normalize_name("username", username)?;
        let mut tx = self.begin(ctx)?;
        let user = self
            .users
            .find_by_username(&mut tx, &username)?
            .ok_or_else(|| Error::NotFound(format!("user {username:?}")))?;
        tx.commit()?;
        Ok(user)
    }

    /// The user's habits, oldest first; empty when there are none
    pub fn list_habits(&self, ctx: &Context, user_id: &str) -> Result<Vec<Habit>> {
        validate_id(user_id)?;
        let mut tx = self.begin(ctx)?;
        let habits = self.habits.list(&mut tx, user_id)?;
        tx.commit()?;
        Ok(habits)
    }

    /// Look up a track without materializing it
    pub fn find_track(&self, ctx: &Context, user_id: &str, date: &TrackDate) -> Result<Option<DailyTrack>> {
        validate_id(user_id)?;
        let mut tx = self.begin(ctx)?;
        let track = self.tracks.find(&mut tx, user_id, date)?;
        tx.commit()?;
        Ok(track)
    }

    /// Return the track for (user, date), creating it from the user's current
    /// habits on first access.
    ///
    /// Losing a creation race (unique key or concurrent write) re-runs the
    /// read path so every caller ends up with the single winning track.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn get_or_create_track(&self, ctx: &Context, user_id: &str, date: &TrackDate) -> Result<DailyTrack> {
        validate_id(user_id)?;

        let mut attempt = 1;
        loop {
            match self.try_get_or_create_track(ctx, user_id, date) {
                Err(err @ (Error::Conflict(_) | Error::AlreadyExists(_))) => {
                    if attempt >= MAX_CREATE_ATTEMPTS {
                        tracing::warn!(attempt, error = %err, "giving up on track creation");
                        return Err(Error::Conflict(format!(
                            "track for {user_id} on {date}: {err}"
                        )));
                    }
                    tracing::debug!(attempt, error = %err, "track creation raced, re-reading");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn try_get_or_create_track(&self, ctx: &Context, user_id: &str, date: &TrackDate) -> Result<DailyTrack> {
        let mut tx = self.begin(ctx)?;

        if let Some(track) = self.tracks.find(&mut tx, user_id, date)? {
            tx.commit()?;
            return Ok(track);
        }

        let habits = self.habits.list(&mut tx, user_id)?;
        let track = DailyTrack::materialize(
            generate_id(&self.config.ids.track_prefix),
            user_id.to_string(),
            date.clone(),
            &habits,
        );
        self.tracks.insert(&mut tx, &track)?;
        tx.commit()?;

        tracing::info!(
            track_id = %track.id,
            user_id,
            %date,
            habits = track.habit_statuses.len(),
            "materialized daily track"
        );
        Ok(track)
    }

    /// Register a habit and, if today's track already exists, add a pending
    /// status for it. No track is created here.
    pub fn register_habit(&self, ctx: &Context, user_id: &str, name: &str) -> Result<Habit> {
        validate_id(user_id)?;
        let name = normalize_name("habit name", name)?;
        let mut tx = self.begin(ctx)?;

        if self.habits.find_by_name(&mut tx, user_id, &name)?.is_some() {
            tx.rollback();
            return Err(Error::AlreadyExists(format!("habit {name:?}")));
        }

        let habit = Habit::new(
            generate_id(&self.config.ids.habit_prefix),
            user_id.to_string(),
            name,
        );
        self.habits.insert(&mut tx, &habit)?;

        let today = self.clock.today();
        let propagated = match self.tracks.find(&mut tx, user_id, &today)? {
            Some(mut track) => {
                track.append_pending(&habit);
                self.tracks.update_statuses(&mut tx, &track)?;
                true
            }
            None => false,
        };

        tx.commit()?;
        tracing::info!(habit_id = %habit.id, user_id, propagated, "habit registered");
        Ok(habit)
    }

    /// Delete a habit owned by `user_id`. Its status is dropped from today's
    /// track only while still pending.
    pub fn delete_habit(&self, ctx: &Context, user_id: &str, habit_id: &str) -> Result<()> {
        validate_id(user_id)?;
        validate_id(habit_id)?;
        let mut tx = self.begin(ctx)?;

        let owned = self
            .habits
            .find(&mut tx, habit_id)?
            .is_some_and(|h| h.user_id == user_id);
        if !owned {
            tx.rollback();
            return Err(Error::NotFound(format!("habit {habit_id}")));
        }
        self.habits.delete(&mut tx, habit_id)?;

        let today = self.clock.today();
        let removed = match self.tracks.find(&mut tx, user_id, &today)? {
            Some(mut track) => {
                let removed = track.remove_pending(habit_id);
                if removed {
                    self.tracks.update_statuses(&mut tx, &track)?;
                }
                removed
            }
            None => false,
        };

        tx.commit()?;
        tracing::info!(habit_id, user_id, removed_from_today = removed, "habit deleted");
        Ok(())
    }

    /// Mark a habit done in the track for `date` and credit the user.
    ///
    /// Track and points are written in one transaction. Re-marking a done
    /// habit changes nothing and awards nothing.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn mark_done(&self, ctx: &Context, user_id: &str, date: &TrackDate, habit_id: &str) -> Result<MarkDone> {
        validate_id(user_id)?;
        validate_id(habit_id)?;
        let mut tx = self.begin(ctx)?;

        let mut track = self
            .tracks
            .find(&mut tx, user_id, date)?
            .ok_or_else(|| Error::NotFound(format!("track for {date}")))?;

        let outcome = track.mark_done(habit_id);
        if outcome.matched == 0 {
            tx.rollback();
            return Err(Error::NotFound(format!("habit {habit_id} in track for {date}")));
        }

        if outcome.flipped == 0 {
            let user = self
                .users
                .find(&mut tx, user_id)?
                .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
            tx.commit()?;
            tracing::debug!(habit_id, %date, "habit already done, nothing awarded");
            return Ok(MarkDone {
                track,
                awarded: 0,
                points: user.points,
            });
        }

        self.tracks.update_statuses(&mut tx, &track)?;

        let user = self
            .users
            .find(&mut tx, user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        let awarded = self.config.points_per_completion;
        let points = user.credited(awarded);
        self.users.update_points(&mut tx, user_id, points)?;

        tx.commit()?;
        tracing::info!(user_id, habit_id, %date, awarded, points, "habit marked done");
        Ok(MarkDone {
            track,
            awarded,
            points,
        })
    }
}
