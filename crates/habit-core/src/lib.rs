//! habit-core: Core library for the habit tracker
//!
//! Users register habits; a daily track records per-day completion for each
//! habit and completing one credits points. The library keeps users, habits
//! and tracks consistent with each other through store transactions.

pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod habit;
pub mod id;
pub mod store;
pub mod track;
pub mod user;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use context::Context;
pub use coordinator::{Coordinator, MarkDone};
pub use db::{Collection, DocumentStore, Transaction};
pub use error::Error;
pub use habit::Habit;
pub use id::generate_id;
pub use store::{DocHabitStore, DocTrackStore, DocUserStore, HabitStore, TrackStore, UserStore};
pub use track::{DailyTrack, HabitStatus, TrackDate};
pub use user::User;

/// Result type for habit operations
pub type Result<T> = std::result::Result<T, Error>;
