use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtKeys, password::CredentialHasher},
    db,
    error::{AppError, AppResult},
    mail::{templates, Mailer},
    users::{
        repo::UserRepo,
        repo_types::{NewUser, PublicUser, User},
    },
    verification::{Purpose, VerificationTokens},
};

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Turn a unique-constraint failure that slipped past the existence check into a conflict.
fn conflict_or_internal(e: anyhow::Error, msg: &str) -> AppError {
    match e.downcast_ref::<sqlx::Error>() {
        Some(sql) if db::is_unique_violation(sql) => AppError::Conflict(msg.into()),
        _ => AppError::Internal(e),
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Registration, login, token refresh and the credential lifecycle
/// (password reset, email change, password update).
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    tokens: Arc<VerificationTokens>,
    hasher: Arc<dyn CredentialHasher>,
    jwt: JwtKeys,
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepo>,
        tokens: Arc<VerificationTokens>,
        hasher: Arc<dyn CredentialHasher>,
        jwt: JwtKeys,
        mailer: Arc<dyn Mailer>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            tokens,
            hasher,
            jwt,
            mailer,
            frontend_url: frontend_url.into(),
        }
    }

    pub fn jwt(&self) -> &JwtKeys {
        &self.jwt
    }

    async fn load_user(&self, user_id: Uuid) -> AppResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    /// Deliver in the background; the caller's response never waits on SMTP.
    fn dispatch_email(&self, to: String, subject: &'static str, html: String) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_email(&to, subject, &html).await {
                error!(error = %e, %to, %subject, "email delivery failed");
            }
        });
    }

    pub async fn register(&self, input: Registration) -> AppResult<PublicUser> {
        let email = normalize_email(&input.email);

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AppError::Conflict("User already exists".into()));
        }

        let password_hash = self.hasher.hash(&input.password)?;
        let user = self
            .users
            .create(NewUser {
                email,
                name: input.name,
                phone: input.phone,
                password_hash,
            })
            .await
            .map_err(|e| conflict_or_internal(e, "User already exists"))?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user.into())
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<LoginOutcome> {
        let email = normalize_email(email);
        let user = match self.users.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                warn!(%email, "login unknown email");
                return Err(AppError::NotFound("User not found".into()));
            }
        };

        if !self.hasher.verify(password, &user.password_hash)? {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }

        let access_token = self.jwt.sign_access(user.id, user.role)?;
        let refresh_token = self.jwt.sign_refresh(user.id, user.role)?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome {
            user: user.into(),
            access_token,
            refresh_token,
        })
    }

    /// Mint a new access token; the refresh token itself stays valid until it expires.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        let claims = self.jwt.verify_refresh(refresh_token)?;
        let access_token = self.jwt.sign_access(claims.sub, claims.role)?;
        info!(user_id = %claims.sub, "access token refreshed");
        Ok(access_token)
    }

    /// Issue a password reset token for `user_id` and return it raw.
    pub async fn issue_password_reset(&self, user_id: Uuid) -> AppResult<String> {
        self.tokens.issue(user_id, Purpose::PasswordReset, None).await
    }

    /// Email a reset link if the address is registered. The outcome is the
    /// same whether or not it is.
    pub async fn request_password_reset(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            info!("password reset requested for unknown email");
            return Ok(());
        };

        let token = self.issue_password_reset(user.id).await?;
        let html = templates::password_reset(
            &self.frontend_url,
            &token,
            self.tokens.ttl().whole_minutes(),
        );
        self.dispatch_email(user.email, "Password reset", html);
        info!(user_id = %user.id, "password reset issued");
        Ok(())
    }

    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> AppResult<()> {
        let record = self.tokens.redeem(token, Purpose::PasswordReset).await?;

        let password_hash = self.hasher.hash(new_password)?;
        if !self.users.update_password(record.user_id, &password_hash).await? {
            return Err(AppError::NotFound("User not found".into()));
        }
        self.tokens.consume(record.id).await?;

        info!(user_id = %record.user_id, "password reset completed");
        Ok(())
    }

    /// Issue an email change token carrying `new_email` and return it raw.
    pub async fn issue_email_change(&self, user_id: Uuid, new_email: &str) -> AppResult<String> {
        let new_email = normalize_email(new_email);
        let user = self.load_user(user_id).await?;

        if user.email == new_email {
            return Err(AppError::BadRequest("New email matches the current one".into()));
        }
        if self.users.find_by_email(&new_email).await?.is_some() {
            warn!(%user_id, "email change to an address already in use");
            return Err(AppError::Conflict("Email already in use".into()));
        }

        self.tokens
            .issue(user_id, Purpose::EmailChange, Some(new_email))
            .await
    }

    /// Send a confirmation link to the new address.
    pub async fn request_email_change(&self, user_id: Uuid, new_email: &str) -> AppResult<()> {
        let token = self.issue_email_change(user_id, new_email).await?;
        let html = templates::email_change(
            &self.frontend_url,
            &token,
            self.tokens.ttl().whole_minutes(),
        );
        self.dispatch_email(normalize_email(new_email), "Confirm your new email", html);
        info!(%user_id, "email change requested");
        Ok(())
    }

    pub async fn confirm_email_change(&self, token: &str) -> AppResult<PublicUser> {
        let record = self.tokens.redeem(token, Purpose::EmailChange).await?;
        let new_email = record
            .payload
            .clone()
            .ok_or_else(|| AppError::NotFound("Invalid token".into()))?;

        // the address may have been taken since the request
        if let Some(other) = self.users.find_by_email(&new_email).await? {
            if other.id != record.user_id {
                return Err(AppError::Conflict("Email already in use".into()));
            }
        }

        let user = self
            .users
            .update_email(record.user_id, &new_email)
            .await
            .map_err(|e| conflict_or_internal(e, "Email already in use"))?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        self.tokens.consume(record.id).await?;

        info!(user_id = %user.id, "email changed");
        Ok(user.into())
    }

    pub async fn update_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self.load_user(user_id).await?;

        if !self.hasher.verify(old_password, &user.password_hash)? {
            warn!(%user_id, "password update with wrong old password");
            return Err(AppError::Unauthorized("Old password is incorrect".into()));
        }

        let password_hash = self.hasher.hash(new_password)?;
        self.users.update_password(user_id, &password_hash).await?;
        info!(%user_id, "password updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Harness};

    fn registration(email: &str, password: &str) -> Registration {
        Registration {
            email: email.into(),
            password: password.into(),
            name: "A".into(),
            phone: "12345".into(),
        }
    }

    async fn registered(h: &Harness) -> PublicUser {
        h.auth
            .register(registration("a@x.com", "secret1"))
            .await
            .expect("register")
    }

    #[tokio::test]
    async fn register_returns_public_projection() {
        let h = testing::harness();
        let user = registered(&h).await;
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.name, "A");
        assert_eq!(user.phone, "12345");
        assert_eq!(user.role, crate::users::repo_types::Role::User);

        let stored = h.users.get(user.id).unwrap();
        assert_ne!(stored.password_hash, "secret1");
    }

    #[tokio::test]
    async fn register_same_email_twice_conflicts() {
        let h = testing::harness();
        registered(&h).await;
        let err = h
            .auth
            .register(registration("  A@X.com ", "other12"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_checks_credentials_and_issues_pair() {
        let h = testing::harness();
        let user = registered(&h).await;

        assert!(matches!(
            h.auth.login("nobody@x.com", "secret1").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.auth.login("a@x.com", "wrong").await,
            Err(AppError::Unauthorized(_))
        ));

        let out = h.auth.login("a@x.com", "secret1").await.unwrap();
        assert_eq!(out.user, user);
        let access = h.auth.jwt().verify_access(&out.access_token).unwrap();
        let refresh = h.auth.jwt().verify_refresh(&out.refresh_token).unwrap();
        assert_eq!(access.sub, user.id);
        assert_eq!(refresh.sub, user.id);
    }

    #[tokio::test]
    async fn refresh_mints_access_and_keeps_refresh_valid() {
        let h = testing::harness();
        let user = registered(&h).await;
        let out = h.auth.login("a@x.com", "secret1").await.unwrap();

        let access = h.auth.refresh(&out.refresh_token).await.unwrap();
        assert_eq!(h.auth.jwt().verify_access(&access).unwrap().sub, user.id);
        // not rotated: the same refresh token still works
        assert!(h.auth.refresh(&out.refresh_token).await.is_ok());
        // an access token is not a refresh token
        assert!(matches!(
            h.auth.refresh(&out.access_token).await,
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn password_reset_request_is_silent_for_unknown_email() {
        let h = testing::harness();
        registered(&h).await;
        assert!(h.auth.request_password_reset("ghost@x.com").await.is_ok());
        assert_eq!(h.tokens.len(), 0);

        assert!(h.auth.request_password_reset("a@x.com").await.is_ok());
        assert_eq!(h.tokens.len(), 1);
    }

    #[tokio::test]
    async fn password_reset_email_is_sent_with_link() {
        let h = testing::harness();
        registered(&h).await;
        h.auth.request_password_reset("a@x.com").await.unwrap();

        let sent = h.mailer.wait_for(1).await;
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].html.contains("http://front.test/reset-password?token="));
    }

    #[tokio::test]
    async fn only_latest_reset_token_is_valid() {
        let h = testing::harness();
        let user = registered(&h).await;
        let first = h.auth.issue_password_reset(user.id).await.unwrap();
        let second = h.auth.issue_password_reset(user.id).await.unwrap();

        assert!(matches!(
            h.auth.confirm_password_reset(&first, "newpass1").await,
            Err(AppError::NotFound(_))
        ));
        h.auth.confirm_password_reset(&second, "newpass1").await.unwrap();
        assert!(h.auth.login("a@x.com", "newpass1").await.is_ok());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let h = testing::harness();
        let user = registered(&h).await;
        let token = h.auth.issue_password_reset(user.id).await.unwrap();

        h.auth.confirm_password_reset(&token, "newpass1").await.unwrap();
        assert!(matches!(
            h.auth.confirm_password_reset(&token, "newpass2").await,
            Err(AppError::NotFound(_))
        ));
        assert!(h.auth.login("a@x.com", "newpass1").await.is_ok());
        assert!(h.auth.login("a@x.com", "secret1").await.is_err());
    }

    #[tokio::test]
    async fn expired_reset_token_leaves_hash_untouched() {
        let h = testing::harness_with_token_ttl(time::Duration::minutes(-1));
        let user = registered(&h).await;
        let before = h.users.get(user.id).unwrap().password_hash;

        let token = h.auth.issue_password_reset(user.id).await.unwrap();
        assert!(matches!(
            h.auth.confirm_password_reset(&token, "newpass1").await,
            Err(AppError::Expired(_))
        ));
        assert_eq!(h.users.get(user.id).unwrap().password_hash, before);
    }

    #[tokio::test]
    async fn email_change_flow() {
        let h = testing::harness();
        let user = registered(&h).await;

        h.auth.request_email_change(user.id, "New@X.com").await.unwrap();
        let sent = h.mailer.wait_for(1).await;
        assert_eq!(sent[0].to, "new@x.com");
        let token = testing::token_from_link(&sent[0].html);

        let updated = h.auth.confirm_email_change(&token).await.unwrap();
        assert_eq!(updated.email, "new@x.com");
        assert!(matches!(
            h.auth.confirm_email_change(&token).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn email_change_to_taken_address_conflicts() {
        let h = testing::harness();
        let user = registered(&h).await;
        h.auth
            .register(registration("b@x.com", "secret2"))
            .await
            .unwrap();

        assert!(matches!(
            h.auth.issue_email_change(user.id, "b@x.com").await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            h.auth.issue_email_change(user.id, "a@x.com").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn email_change_confirm_rechecks_availability() {
        let h = testing::harness();
        let user = registered(&h).await;
        let token = h.auth.issue_email_change(user.id, "c@x.com").await.unwrap();
        h.auth
            .register(registration("c@x.com", "secret3"))
            .await
            .unwrap();

        assert!(matches!(
            h.auth.confirm_email_change(&token).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(h.users.get(user.id).unwrap().email, "a@x.com");
    }

    #[tokio::test]
    async fn reset_token_cannot_confirm_email_change() {
        let h = testing::harness();
        let user = registered(&h).await;
        let token = h.auth.issue_password_reset(user.id).await.unwrap();
        assert!(matches!(
            h.auth.confirm_email_change(&token).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_password_requires_old_password() {
        let h = testing::harness();
        let user = registered(&h).await;

        assert!(matches!(
            h.auth.update_password(user.id, "wrong", "newpass1").await,
            Err(AppError::Unauthorized(_))
        ));
        h.auth
            .update_password(user.id, "secret1", "newpass1")
            .await
            .unwrap();
        assert!(h.auth.login("a@x.com", "newpass1").await.is_ok());
        assert!(matches!(
            h.auth.update_password(Uuid::new_v4(), "x", "y").await,
            Err(AppError::NotFound(_))
        ));
    }
}
