use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::{repo::UserRepo, repo_types::PublicUser};
use crate::error::{AppError, AppResult};

/// Profile reads and the non-credential profile updates.
pub struct ProfileService {
    users: Arc<dyn UserRepo>,
}

impl ProfileService {
    pub fn new(users: Arc<dyn UserRepo>) -> Self {
        Self { users }
    }

    fn not_found() -> AppError {
        AppError::NotFound("User not found".into())
    }

    pub async fn me(&self, user_id: Uuid) -> AppResult<PublicUser> {
        let user = self.users.find_by_id(user_id).await?.ok_or_else(Self::not_found)?;
        Ok(user.into())
    }

    pub async fn update_phone(&self, user_id: Uuid, phone: &str) -> AppResult<PublicUser> {
        let user = self
            .users
            .update_phone(user_id, phone.trim())
            .await?
            .ok_or_else(Self::not_found)?;
        info!(%user_id, "phone updated");
        Ok(user.into())
    }

    pub async fn update_name(&self, user_id: Uuid, name: &str) -> AppResult<PublicUser> {
        let user = self
            .users
            .update_name(user_id, name.trim())
            .await?
            .ok_or_else(Self::not_found)?;
        info!(%user_id, "name updated");
        Ok(user.into())
    }
}
