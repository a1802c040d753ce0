//! In-memory collaborators for unit and router tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{password::CredentialHasher, services::AuthService},
    categories::{
        repo::CategoryRepo,
        repo_types::{Category, CategoryPatch, NewCategory, SortOrder},
    },
    config::AppConfig,
    mail::Mailer,
    state::{AppState, Parts},
    storage::StorageClient,
    users::{
        repo::UserRepo,
        repo_types::{NewUser, Role, User},
    },
    verification::{
        repo::VerificationTokenRepo,
        repo_types::{NewVerificationToken, Purpose, VerificationToken},
    },
};

#[derive(Default)]
pub struct MemoryUserRepo {
    rows: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn set_role(&self, id: Uuid, role: Role) {
        if let Some(u) = self.rows.lock().unwrap().get_mut(&id) {
            u.role = role;
        }
    }

    fn modify(&self, id: Uuid, f: impl FnOnce(&mut User)) -> Option<User> {
        let mut rows = self.rows.lock().unwrap();
        let user = rows.get_mut(&id)?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Some(user.clone())
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|u| u.email == new.email) {
            anyhow::bail!("duplicate email {}", new.email);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            phone: new.phone,
            password_hash: new.password_hash,
            role: Role::User,
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_email(&self, id: Uuid, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.modify(id, |u| u.email = email.to_string()))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        Ok(self
            .modify(id, |u| u.password_hash = password_hash.to_string())
            .is_some())
    }

    async fn update_phone(&self, id: Uuid, phone: &str) -> anyhow::Result<Option<User>> {
        Ok(self.modify(id, |u| u.phone = phone.to_string()))
    }

    async fn update_name(&self, id: Uuid, name: &str) -> anyhow::Result<Option<User>> {
        Ok(self.modify(id, |u| u.name = name.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryTokenRepo {
    rows: Mutex<Vec<VerificationToken>>,
}

impl MemoryTokenRepo {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl VerificationTokenRepo for MemoryTokenRepo {
    async fn delete_for_user(&self, user_id: Uuid, purpose: Purpose) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|t| !(t.user_id == user_id && t.purpose == purpose));
        Ok((before - rows.len()) as u64)
    }

    async fn insert(&self, new: NewVerificationToken) -> anyhow::Result<VerificationToken> {
        let row = VerificationToken {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            purpose: new.purpose,
            token: new.token,
            payload: new.payload,
            expires_at: new.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<VerificationToken>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|t| t.id != id);
        Ok(rows.len() < before)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|t| !t.is_expired_at(now));
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryCategoryRepo {
    rows: Mutex<HashMap<Uuid, Category>>,
}

#[async_trait]
impl CategoryRepo for MemoryCategoryRepo {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Category>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn create(&self, new: NewCategory) -> anyhow::Result<Category> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|c| c.name == new.name) {
            anyhow::bail!("duplicate category {}", new.name);
        }
        let now = OffsetDateTime::now_utc();
        let category = Category {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            image_key: new.image_key,
            created_at: now,
            updated_at: now,
        };
        rows.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list(&self, offset: i64, limit: i64, order: SortOrder) -> anyhow::Result<Vec<Category>> {
        let mut all: Vec<Category> = self.rows.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        if order == SortOrder::Desc {
            all.reverse();
        }
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self) -> anyhow::Result<i64> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }

    async fn update(&self, id: Uuid, patch: CategoryPatch) -> anyhow::Result<Option<Category>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(c) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            c.name = name;
        }
        if let Some(description) = patch.description {
            c.description = Some(description);
        }
        if let Some(key) = patch.image_key {
            c.image_key = Some(key);
        }
        c.updated_at = OffsetDateTime::now_utc();
        Ok(Some(c.clone()))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{key}?expires={seconds}"))
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingMailer {
    /// Mail goes out from a spawned task, so poll until `n` messages arrive.
    pub async fn wait_for(&self, n: usize) -> Vec<SentEmail> {
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        loop {
            let sent = self.sent.lock().unwrap().clone();
            if sent.len() >= n || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

/// Argon2 is slow in debug builds; tests only need a reversible stand-in.
pub struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        Ok(format!("plain${plain}"))
    }

    fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        Ok(hash.strip_prefix("plain$") == Some(plain))
    }
}

pub fn seed_user(repo: &Arc<MemoryUserRepo>, email: &str, password: &str) -> User {
    let now = OffsetDateTime::now_utc();
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: "Seed".into(),
        phone: "12345".into(),
        password_hash: PlainHasher.hash(password).unwrap(),
        role: Role::User,
        created_at: now,
        updated_at: now,
    };
    repo.rows.lock().unwrap().insert(user.id, user.clone());
    user
}

pub struct Harness {
    pub auth: Arc<AuthService>,
    pub users: Arc<MemoryUserRepo>,
    pub tokens: Arc<MemoryTokenRepo>,
    pub mailer: Arc<RecordingMailer>,
    pub state: AppState,
}

pub fn harness() -> Harness {
    harness_with_config(AppConfig::for_tests())
}

pub fn harness_with_token_ttl(ttl: time::Duration) -> Harness {
    let mut config = AppConfig::for_tests();
    config.verification.ttl_minutes = ttl.whole_minutes();
    harness_with_config(config)
}

fn harness_with_config(config: AppConfig) -> Harness {
    let users = Arc::new(MemoryUserRepo::default());
    let tokens = Arc::new(MemoryTokenRepo::default());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::from_parts(
        Arc::new(config),
        Parts {
            users: users.clone(),
            verification_tokens: tokens.clone(),
            categories: Arc::new(MemoryCategoryRepo::default()),
            storage: Arc::new(MemoryStorage::default()),
            hasher: Arc::new(PlainHasher),
            mailer: mailer.clone(),
        },
    );

    Harness {
        auth: state.auth.clone(),
        users,
        tokens,
        mailer,
        state,
    }
}

lazy_static! {
    static ref LINK_TOKEN_RE: Regex = Regex::new(r"token=([A-Za-z0-9_-]+)").unwrap();
}

/// Pull the raw token out of a reset or verify link in an email body.
pub fn token_from_link(html: &str) -> String {
    LINK_TOKEN_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .expect("email has no token link")
}

/// Database error carrying Postgres code 23505, as a racing insert would raise.
#[derive(Debug)]
struct UniqueViolation;

impl std::fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("duplicate key value violates unique constraint")
    }
}

impl std::error::Error for UniqueViolation {}

impl sqlx::error::DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint"
    }

    fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
        Some("23505".into())
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::UniqueViolation
    }
}

pub fn unique_violation() -> anyhow::Error {
    anyhow::Error::new(sqlx::Error::Database(Box::new(UniqueViolation)))
        .context("insert row")
}
