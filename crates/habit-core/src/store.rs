//! Entity stores
//!
//! One capability trait per collection. Every method takes the caller's
//! transaction so several store calls can be composed into one atomic unit;
//! none of them commits. Stores surface absent/duplicate conditions as-is and
//! carry no cross-entity logic.

use crate::db::{Collection, Transaction};
use crate::{DailyTrack, Error, Habit, Result, TrackDate, User};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub trait UserStore: Send + Sync {
    fn find(&self, tx: &mut Transaction, id: &str) -> Result<Option<User>>;
    fn find_by_username(&self, tx: &mut Transaction, username: &str) -> Result<Option<User>>;
    /// `AlreadyExists` if the id is taken
    fn insert(&self, tx: &mut Transaction, user: &User) -> Result<()>;
    /// Overwrite the point total only; `NotFound` if the user is absent
    fn update_points(&self, tx: &mut Transaction, id: &str, points: u64) -> Result<()>;
}

pub trait HabitStore: Send + Sync {
    fn find(&self, tx: &mut Transaction, id: &str) -> Result<Option<Habit>>;
    fn find_by_name(&self, tx: &mut Transaction, user_id: &str, name: &str) -> Result<Option<Habit>>;
    /// A user's habits, oldest first
    fn list(&self, tx: &mut Transaction, user_id: &str) -> Result<Vec<Habit>>;
    fn insert(&self, tx: &mut Transaction, habit: &Habit) -> Result<()>;
    /// `NotFound` if the habit is absent
    fn delete(&self, tx: &mut Transaction, id: &str) -> Result<()>;
}

pub trait TrackStore: Send + Sync {
    fn find(&self, tx: &mut Transaction, user_id: &str, date: &TrackDate) -> Result<Option<DailyTrack>>;
    fn insert(&self, tx: &mut Transaction, track: &DailyTrack) -> Result<()>;
    /// Overwrite the embedded status list only; `NotFound` if the track is absent
    fn update_statuses(&self, tx: &mut Transaction, track: &DailyTrack) -> Result<()>;
}

fn decode<T: DeserializeOwned>(doc: Value) -> Result<T> {
    Ok(serde_json::from_value(doc)?)
}

fn encode<T: Serialize>(entity: &T) -> Result<Value> {
    Ok(serde_json::to_value(entity)?)
}

/// Replace one top-level field of a stored document
fn set_field(tx: &mut Transaction, collection: Collection, id: &str, field: &str, value: Value) -> Result<()> {
    let mut doc = tx
        .get(collection, id)?
        .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
    match doc.as_object_mut() {
        Some(object) => {
            object.insert(field.to_string(), value);
        }
        None => {
            return Err(Error::Other(format!("{collection}/{id} is not an object")));
        }
    }
    tx.update(collection, id, doc)
}

/// Users backed by the document store
#[derive(Debug, Clone, Copy, Default)]
pub struct DocUserStore;

impl UserStore for DocUserStore {
    fn find(&self, tx: &mut Transaction, id: &str) -> Result<Option<User>> {
        tx.get(Collection::Users, id)?.map(decode).transpose()
    }

    fn find_by_username(&self, tx: &mut Transaction, username: &str) -> Result<Option<User>> {
        tx.find_one(Collection::Users, &[("username", username)])?
            .map(|(_, doc)| decode(doc))
            .transpose()
    }

    fn insert(&self, tx: &mut Transaction, user: &User) -> Result<()> {
        tx.insert(Collection::Users, &user.id, encode(user)?)
    }

    fn update_points(&self, tx: &mut Transaction, id: &str, points: u64) -> Result<()> {
        set_field(tx, Collection::Users, id, "points", Value::from(points))
    }
}

/// Habits backed by the document store
#[derive(Debug, Clone, Copy, Default)]
pub struct DocHabitStore;

impl HabitStore for DocHabitStore {
    fn find(&self, tx: &mut Transaction, id: &str) -> Result<Option<Habit>> {
        tx.get(Collection::Habits, id)?.map(decode).transpose()
    }

    fn find_by_name(&self, tx: &mut Transaction, user_id: &str, name: &str) -> Result<Option<Habit>> {
        tx.find_one(Collection::Habits, &[("user_id", user_id), ("name", name)])?
            .map(|(_, doc)| decode(doc))
            .transpose()
    }

    fn list(&self, tx: &mut Transaction, user_id: &str) -> Result<Vec<Habit>> {
        tx.find(Collection::Habits, &[("user_id", user_id)])?
            .into_iter()
            .map(|(_, doc)| decode(doc))
            .collect()
    }

    fn insert(&self, tx: &mut Transaction, habit: &Habit) -> Result<()> {
        tx.insert(Collection::Habits, &habit.id, encode(habit)?)
    }

    fn delete(&self, tx: &mut Transaction, id: &str) -> Result<()> {
        tx.delete(Collection::Habits, id)
    }
}

/// Daily tracks backed by the document store
#[derive(Debug, Clone, Copy, Default)]
pub struct DocTrackStore;

impl TrackStore for DocTrackStore {
    fn find(&self, tx: &mut Transaction, user_id: &str, date: &TrackDate) -> Result<Option<DailyTrack>> {
        tx.find_one(
            Collection::DailyTracks,
            &[("user_id", user_id), ("date", date.as_str())],
        )?
        .map(|(_, doc)| decode(doc))
        .transpose()
    }

    fn insert(&self, tx: &mut Transaction, track: &DailyTrack) -> Result<()> {
        tx.insert(Collection::DailyTracks, &track.id, encode(track)?)
    }

    fn update_statuses(&self, tx: &mut Transaction, track: &DailyTrack) -> Result<()> {
        set_field(
            tx,
            Collection::DailyTracks,
            &track.id,
            "habit_statuses",
            encode(&track.habit_statuses)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DocumentStore;
    use crate::Context;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_user_points_update_keeps_other_fields() {
        let db = DocumentStore::in_memory();
        let users = DocUserStore;
        let user = User::new("usr-aaaaaaaaaa".into(), "ada".into(), "hash".into());

        let mut tx = db.begin(&ctx()).unwrap();
        users.insert(&mut tx, &user).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin(&ctx()).unwrap();
        users.update_points(&mut tx, &user.id, 9).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin(&ctx()).unwrap();
        let stored = users.find_by_username(&mut tx, "ada").unwrap().unwrap();
        assert_eq!(stored.points, 9);
        assert_eq!(stored.password_hash, "hash");
        assert_eq!(stored.created_at, user.created_at);
    }

    #[test]
    fn test_update_points_on_missing_user() {
        let db = DocumentStore::in_memory();
        let mut tx = db.begin(&ctx()).unwrap();
        assert!(matches!(
            DocUserStore.update_points(&mut tx, "usr-missing000", 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_habit_lookup_is_scoped_to_user() {
        let db = DocumentStore::in_memory();
        let habits = DocHabitStore;
        let mut tx = db.begin(&ctx()).unwrap();
        habits
            .insert(&mut tx, &Habit::new("hab-1".into(), "usr-a".into(), "Read".into()))
            .unwrap();
        habits
            .insert(&mut tx, &Habit::new("hab-2".into(), "usr-b".into(), "Read".into()))
            .unwrap();

        let found = habits.find_by_name(&mut tx, "usr-b", "Read").unwrap().unwrap();
        assert_eq!(found.id, "hab-2");
        assert_eq!(habits.list(&mut tx, "usr-a").unwrap().len(), 1);
        assert!(habits.find_by_name(&mut tx, "usr-c", "Read").unwrap().is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn test_track_status_update() {
        let db = DocumentStore::in_memory();
        let tracks = DocTrackStore;
        let date: TrackDate = "2024-01-01".parse().unwrap();
        let habit = Habit::new("hab-1".into(), "usr-a".into(), "Read".into());
        let mut track = DailyTrack::materialize("trk-1".into(), "usr-a".into(), date.clone(), &[habit]);

        let mut tx = db.begin(&ctx()).unwrap();
        tracks.insert(&mut tx, &track).unwrap();
        tx.commit().unwrap();

        track.mark_done("hab-1");
        let mut tx = db.begin(&ctx()).unwrap();
        tracks.update_statuses(&mut tx, &track).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin(&ctx()).unwrap();
        let stored = tracks.find(&mut tx, "usr-a", &date).unwrap().unwrap();
        assert_eq!(stored, track);
        let other: TrackDate = "2024-01-02".parse().unwrap();
        assert!(tracks.find(&mut tx, "usr-a", &other).unwrap().is_none());
    }
}
