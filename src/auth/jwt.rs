use std::time::Duration;

use anyhow::Context;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::{
    config::JwtConfig,
    error::{AppError, AppResult},
    users::repo_types::Role,
};

/// Upper bound on configured token lifetimes (ten years).
const MAX_TTL_MINUTES: i64 = 60 * 24 * 366 * 10;

fn ttl_from_minutes(minutes: i64) -> Duration {
    Duration::from_secs((minutes.clamp(0, MAX_TTL_MINUTES) as u64).saturating_mul(60))
}

/// Signs and verifies access/refresh tokens with one shared HS256 secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: ttl_from_minutes(cfg.ttl_minutes),
            refresh_ttl: ttl_from_minutes(cfg.refresh_ttl_minutes),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn claims_for(&self, user_id: Uuid, role: Role, kind: TokenKind, now: OffsetDateTime) -> Claims {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        }
    }

    fn encode_claims(&self, claims: &Claims) -> AppResult<String> {
        let token = encode(&Header::default(), claims, &self.encoding).context("sign jwt")?;
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid, role: Role) -> AppResult<String> {
        let claims = self.claims_for(user_id, role, TokenKind::Access, OffsetDateTime::now_utc());
        self.encode_claims(&claims)
    }

    pub fn sign_refresh(&self, user_id: Uuid, role: Role) -> AppResult<String> {
        let claims = self.claims_for(user_id, role, TokenKind::Refresh, OffsetDateTime::now_utc());
        self.encode_claims(&claims)
    }

    /// Check signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            AppError::InvalidToken
        })?;
        Ok(data.claims)
    }

    fn verify_kind(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            warn!(user_id = %claims.sub, expected = ?kind, got = ?claims.kind, "jwt of wrong kind");
            return Err(AppError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> AppResult<Claims> {
        self.verify_kind(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> AppResult<Claims> {
        self.verify_kind(token, TokenKind::Refresh)
    }
}
