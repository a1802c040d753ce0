use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::{
    dto::{CategoryFields, CategoryPage, CategoryResponse, ListQuery},
    repo::CategoryRepo,
    repo_types::{Category, CategoryPatch, NewCategory},
};
use crate::{
    db,
    error::{AppError, AppResult},
    images::services::{discard_image, presign, upload_image, ImageUpload},
    storage::StorageClient,
};

const IMAGE_PREFIX: &str = "categories";
const MAX_PAGE_SIZE: i64 = 100;

fn already_exists() -> AppError {
    AppError::BadRequest("Category already exists".into())
}

fn not_found() -> AppError {
    AppError::NotFound("Category not found".into())
}

/// A racing insert or rename can still hit the unique index on `name`.
fn already_exists_or_internal(e: anyhow::Error) -> AppError {
    match e.downcast_ref::<sqlx::Error>() {
        Some(sql) if db::is_unique_violation(sql) => already_exists(),
        _ => AppError::Internal(e),
    }
}

/// Trimmed name; blank is rejected.
fn clean_name(name: String) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }
    Ok(name.to_string())
}

pub struct CategoryService {
    repo: Arc<dyn CategoryRepo>,
    storage: Arc<dyn StorageClient>,
}

impl CategoryService {
    pub fn new(repo: Arc<dyn CategoryRepo>, storage: Arc<dyn StorageClient>) -> Self {
        Self { repo, storage }
    }

    async fn to_response(&self, c: Category) -> AppResult<CategoryResponse> {
        let image_url = match &c.image_key {
            Some(key) => Some(presign(self.storage.as_ref(), key).await?),
            None => None,
        };
        Ok(CategoryResponse {
            id: c.id,
            name: c.name,
            description: c.description,
            image_url,
        })
    }

    pub async fn create(
        &self,
        fields: CategoryFields,
        image: Option<ImageUpload>,
    ) -> AppResult<CategoryResponse> {
        let name = clean_name(fields.name.unwrap_or_default())?;

        if self.repo.find_by_name(&name).await?.is_some() {
            return Err(already_exists());
        }

        let image_key = match image {
            Some(img) => Some(upload_image(self.storage.as_ref(), IMAGE_PREFIX, img).await?),
            None => None,
        };

        let created = self
            .repo
            .create(NewCategory {
                name,
                description: fields.description,
                image_key: image_key.clone(),
            })
            .await;
        let category = match created {
            Ok(c) => c,
            Err(e) => {
                if let Some(key) = image_key {
                    discard_image(self.storage.as_ref(), &key).await;
                }
                return Err(already_exists_or_internal(e));
            }
        };

        info!(category_id = %category.id, name = %category.name, "category created");
        self.to_response(category).await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<CategoryResponse> {
        let category = self.repo.find_by_id(id).await?.ok_or_else(not_found)?;
        self.to_response(category).await
    }

    pub async fn list(&self, query: ListQuery) -> AppResult<CategoryPage> {
        let page = query.page.max(1);
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| AppError::BadRequest("page is out of range".into()))?;

        let rows = self.repo.list(offset, limit, query.order).await?;
        let total = self.repo.count().await?;

        let mut items = Vec::with_capacity(rows.len());
        for c in rows {
            items.push(self.to_response(c).await?);
        }
        Ok(CategoryPage {
            items,
            total,
            page,
            limit,
            order: query.order,
        })
    }

    /// Apply the provided fields; a new image replaces (and deletes) the old one.
    pub async fn update(
        &self,
        id: Uuid,
        fields: CategoryFields,
        image: Option<ImageUpload>,
    ) -> AppResult<CategoryResponse> {
        let existing = self.repo.find_by_id(id).await?.ok_or_else(not_found)?;

        let name = fields.name.map(clean_name).transpose()?;
        if let Some(name) = name.as_deref() {
            if name != existing.name && self.repo.find_by_name(name).await?.is_some() {
                return Err(already_exists());
            }
        }

        let new_key = match image {
            Some(img) => Some(upload_image(self.storage.as_ref(), IMAGE_PREFIX, img).await?),
            None => None,
        };

        let patch = CategoryPatch {
            name,
            description: fields.description,
            image_key: new_key.clone(),
        };
        let updated = match self.repo.update(id, patch).await {
            Ok(Some(c)) => c,
            outcome => {
                if let Some(key) = new_key.as_deref() {
                    discard_image(self.storage.as_ref(), key).await;
                }
                return Err(match outcome {
                    Err(e) => already_exists_or_internal(e),
                    Ok(_) => not_found(),
                });
            }
        };

        if new_key.is_some() {
            if let Some(old) = existing.image_key.as_deref() {
                discard_image(self.storage.as_ref(), old).await;
            }
        }

        info!(category_id = %id, "category updated");
        self.to_response(updated).await
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let existing = self.repo.find_by_id(id).await?.ok_or_else(not_found)?;
        if !self.repo.delete(id).await? {
            return Err(not_found());
        }
        if let Some(key) = existing.image_key.as_deref() {
            discard_image(self.storage.as_ref(), key).await;
        }
        info!(category_id = %id, "category deleted");
        Ok(())
    }
}
