use chrono::{DateTime, Utc};

/// A persisted refresh token. Only `revoked` and `updated_at` change after
/// insert.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Strictly after `expires_at`; the expiry instant itself is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_at: DateTime<Utc>, revoked: bool) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: 1,
            user_id: 7,
            token_hash: "h".to_string(),
            expires_at,
            revoked,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let expires_at = Utc::now();
        let t = token(expires_at, false);

        assert!(!t.is_expired_at(expires_at));
        assert!(t.is_expired_at(expires_at + Duration::milliseconds(1)));
        assert!(!t.is_expired_at(expires_at - Duration::seconds(1)));
    }

    #[test]
    fn test_revoked_is_not_active() {
        let t = token(Utc::now() + Duration::days(1), true);
        assert!(!t.is_active());
        assert!(token(Utc::now() + Duration::days(1), false).is_active());
    }
}
