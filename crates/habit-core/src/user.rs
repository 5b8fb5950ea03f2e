//! User data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user and their point balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (usr-xxxxxxxxxx)
    pub id: String,

    /// Login name, unique across users
    pub username: String,

    /// Opaque credential produced by the request layer
    pub password_hash: String,

    /// Points earned by completing habits
    #[serde(default)]
    pub points: u64,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: String, username: String, password_hash: String) -> Self {
        Self {
            id,
            username,
            password_hash,
            points: 0,
            created_at: Utc::now(),
        }
    }

    /// Points after crediting `amount`, saturating at `u64::MAX`.
    pub fn credited(&self, amount: u64) -> u64 {
        self.points.saturating_add(amount)
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) - {} pts", self.username, self.id, self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_starts_at_zero() {
        let user = User::new("usr-0000000001".into(), "ada".into(), "h".into());
        assert_eq!(user.points, 0);
        assert_eq!(user.credited(3), 3);
    }

    #[test]
    fn test_credit_saturates() {
        let mut user = User::new("usr-0000000001".into(), "ada".into(), "h".into());
        user.points = u64::MAX - 1;
        assert_eq!(user.credited(3), u64::MAX);
    }
}
