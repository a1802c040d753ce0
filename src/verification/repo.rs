use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewVerificationToken, Purpose, VerificationToken};

#[async_trait]
pub trait VerificationTokenRepo: Send + Sync {
    /// Remove every token of `purpose` owned by `user_id`; returns how many went away.
    async fn delete_for_user(&self, user_id: Uuid, purpose: Purpose) -> anyhow::Result<u64>;
    async fn insert(&self, new: NewVerificationToken) -> anyhow::Result<VerificationToken>;
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<VerificationToken>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgVerificationTokenRepo {
    db: PgPool,
}

impl PgVerificationTokenRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VerificationTokenRepo for PgVerificationTokenRepo {
    async fn delete_for_user(&self, user_id: Uuid, purpose: Purpose) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1 AND purpose = $2")
            .bind(user_id)
            .bind(purpose)
            .execute(&self.db)
            .await
            .context("delete verification tokens for user")?;
        Ok(res.rows_affected())
    }

    async fn insert(&self, new: NewVerificationToken) -> anyhow::Result<VerificationToken> {
        let row = sqlx::query_as::<_, VerificationToken>(
            r#"
            INSERT INTO verification_tokens (user_id, purpose, token, payload, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, purpose, token, payload, expires_at, created_at
            "#,
        )
        .bind(new.user_id)
        .bind(new.purpose)
        .bind(&new.token)
        .bind(&new.payload)
        .bind(new.expires_at)
        .fetch_one(&self.db)
        .await
        .context("insert verification token")?;
        Ok(row)
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<VerificationToken>> {
        let row = sqlx::query_as::<_, VerificationToken>(
            r#"
            SELECT id, user_id, purpose, token, payload, expires_at, created_at
              FROM verification_tokens
             WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("find verification token")?;
        Ok(row)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM verification_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete verification token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM verification_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await
            .context("delete expired verification tokens")?;
        Ok(res.rows_affected())
    }
}
