use std::sync::Arc;

use time::Duration;
use tracing::info;

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{Argon2Hasher, CredentialHasher},
        services::AuthService,
    },
    categories::{
        repo::{CategoryRepo, PgCategoryRepo},
        services::CategoryService,
    },
    config::AppConfig,
    db,
    mail::{LogMailer, Mailer, SmtpMailer},
    storage::{S3Storage, StorageClient},
    users::{
        repo::{PgUserRepo, UserRepo},
        services::ProfileService,
    },
    verification::{
        repo::{PgVerificationTokenRepo, VerificationTokenRepo},
        services::spawn_sweeper,
        VerificationTokens,
    },
};

/// Collaborators injected into the services at startup.
pub struct Parts {
    pub users: Arc<dyn UserRepo>,
    pub verification_tokens: Arc<dyn VerificationTokenRepo>,
    pub categories: Arc<dyn CategoryRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub users: Arc<dyn UserRepo>,
    pub tokens: Arc<VerificationTokens>,
    pub auth: Arc<AuthService>,
    pub profiles: Arc<ProfileService>,
    pub categories: Arc<CategoryService>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let s3 = S3Storage::from_config(&config.storage).await?;
        s3.ensure_bucket().await?;
        let storage: Arc<dyn StorageClient> = Arc::new(s3);
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                info!("SMTP not configured; emails will only be logged");
                Arc::new(LogMailer)
            }
        };

        let state = Self::from_parts(
            Arc::new(config),
            Parts {
                users: Arc::new(PgUserRepo::new(pool.clone())),
                verification_tokens: Arc::new(PgVerificationTokenRepo::new(pool.clone())),
                categories: Arc::new(PgCategoryRepo::new(pool)),
                storage,
                hasher: Arc::new(Argon2Hasher),
                mailer,
            },
        );

        let sweep = state.config.verification.sweep_interval_secs;
        if sweep > 0 {
            spawn_sweeper(state.tokens.clone(), std::time::Duration::from_secs(sweep));
            info!(every_secs = sweep, "verification token sweeper started");
        }

        Ok(state)
    }

    pub fn from_parts(config: Arc<AppConfig>, parts: Parts) -> Self {
        let jwt = JwtKeys::from_config(&config.jwt);
        let tokens = Arc::new(VerificationTokens::new(
            parts.verification_tokens,
            Duration::minutes(config.verification.ttl_minutes),
        ));
        let auth = Arc::new(AuthService::new(
            parts.users.clone(),
            tokens.clone(),
            parts.hasher,
            jwt.clone(),
            parts.mailer,
            config.frontend_url.clone(),
        ));
        let profiles = Arc::new(ProfileService::new(parts.users.clone()));
        let categories = Arc::new(CategoryService::new(parts.categories, parts.storage));

        Self {
            config,
            jwt,
            users: parts.users,
            tokens,
            auth,
            profiles,
            categories,
        }
    }
}
