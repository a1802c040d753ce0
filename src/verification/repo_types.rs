use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// What a verification token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "verification_purpose", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    PasswordReset,
    EmailChange,
}

/// Single-use token row. A row that exists has not been consumed yet.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: Purpose,
    pub token: String,
    pub payload: Option<String>, // pending email for EMAIL_CHANGE
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl VerificationToken {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewVerificationToken {
    pub user_id: Uuid,
    pub purpose: Purpose,
    pub token: String,
    pub payload: Option<String>,
    pub expires_at: OffsetDateTime,
}
