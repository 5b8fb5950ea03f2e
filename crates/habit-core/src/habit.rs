//! Habit data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A habit registered by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Habit {
    /// Unique identifier (hab-xxxxxxxxxx)
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Display name, unique per user
    pub name: String,

    pub created_at: DateTime<Utc>,
}

impl Habit {
    pub fn new(id: String, user_id: String, name: String) -> Self {
        Self {
            id,
            user_id,
            name,
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Habit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.id, self.name)
    }
}

/// Normalize a user-supplied name (habit name or username).
///
/// Surrounding whitespace is dropped; a blank result is rejected.
pub fn normalize_name(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument(format!("{field} must not be blank")));
    }
    Ok(trimmed.to_string())
}
