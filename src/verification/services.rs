use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    repo::VerificationTokenRepo,
    repo_types::{NewVerificationToken, Purpose, VerificationToken},
};
use crate::error::{AppError, AppResult};

const TOKEN_BYTES: usize = 32;

/// Opaque URL-safe token: 32 random bytes, base64url without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Lifecycle of single-use, expiring, purpose-tagged tokens.
///
/// At most one live token exists per (user, purpose): issuing deletes the
/// previous ones. Expiry is checked when a token is redeemed; expired rows are
/// left in place unless the sweeper is running.
pub struct VerificationTokens {
    repo: Arc<dyn VerificationTokenRepo>,
    ttl: Duration,
}

impl VerificationTokens {
    pub fn new(repo: Arc<dyn VerificationTokenRepo>, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace any token of `purpose` held by `user_id` and return the new raw token.
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: Purpose,
        payload: Option<String>,
    ) -> AppResult<String> {
        let superseded = self.repo.delete_for_user(user_id, purpose).await?;
        if superseded > 0 {
            debug!(%user_id, ?purpose, superseded, "previous verification tokens removed");
        }

        let token = generate_token();
        self.repo
            .insert(NewVerificationToken {
                user_id,
                purpose,
                token: token.clone(),
                payload,
                expires_at: OffsetDateTime::now_utc() + self.ttl,
            })
            .await?;

        info!(%user_id, ?purpose, "verification token issued");
        Ok(token)
    }

    /// Look up a live token for `purpose`. The row is not removed; call
    /// [`consume`](Self::consume) once the guarded change has been applied.
    pub async fn redeem(&self, token: &str, purpose: Purpose) -> AppResult<VerificationToken> {
        let record = self
            .repo
            .find_by_token(token)
            .await?
            .filter(|t| t.purpose == purpose)
            .ok_or_else(|| AppError::NotFound("Invalid token".into()))?;

        if record.is_expired_at(OffsetDateTime::now_utc()) {
            warn!(user_id = %record.user_id, ?purpose, "verification token expired");
            return Err(AppError::Expired("Token has expired".into()));
        }
        Ok(record)
    }

    pub async fn consume(&self, id: Uuid) -> AppResult<()> {
        self.repo.delete(id).await?;
        Ok(())
    }

    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let removed = self.repo.delete_expired(OffsetDateTime::now_utc()).await?;
        Ok(removed)
    }
}

/// Periodically delete expired tokens. Redeeming already rejects them, so
/// this only keeps the table small.
pub fn spawn_sweeper(tokens: Arc<VerificationTokens>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match tokens.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired verification tokens swept"),
                Err(e) => warn!(error = %e, "verification token sweep failed"),
            }
        }
    })
}
