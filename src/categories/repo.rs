use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{Category, CategoryPatch, NewCategory, SortOrder};

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Category>>;
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Category>>;
    async fn create(&self, new: NewCategory) -> anyhow::Result<Category>;
    /// Page of categories ordered by name.
    async fn list(&self, offset: i64, limit: i64, order: SortOrder) -> anyhow::Result<Vec<Category>>;
    async fn count(&self) -> anyhow::Result<i64>;
    async fn update(&self, id: Uuid, patch: CategoryPatch) -> anyhow::Result<Option<Category>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgCategoryRepo {
    db: PgPool,
}

impl PgCategoryRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CategoryRepo for PgCategoryRepo {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, name, description, image_key, created_at, updated_at
              FROM categories
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find category by id")?;
        Ok(row)
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, name, description, image_key, created_at, updated_at
              FROM categories
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .context("find category by name")?;
        Ok(row)
    }

    async fn create(&self, new: NewCategory) -> anyhow::Result<Category> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (name, description, image_key)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, image_key, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.image_key)
        .fetch_one(&self.db)
        .await
        .context("insert category")?;
        Ok(row)
    }

    async fn list(&self, offset: i64, limit: i64, order: SortOrder) -> anyhow::Result<Vec<Category>> {
        let sql = format!(
            r#"
            SELECT id, name, description, image_key, created_at, updated_at
              FROM categories
             ORDER BY name {}
             LIMIT $1 OFFSET $2
            "#,
            order.as_sql()
        );
        let rows = sqlx::query_as::<_, Category>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await
            .context("list categories")?;
        Ok(rows)
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.db)
            .await
            .context("count categories")?;
        Ok(n)
    }

    async fn update(&self, id: Uuid, patch: CategoryPatch) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            UPDATE categories
               SET name        = COALESCE($2, name),
                   description = COALESCE($3, description),
                   image_key   = COALESCE($4, image_key),
                   updated_at  = now()
             WHERE id = $1
            RETURNING id, name, description, image_key, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(&patch.image_key)
        .fetch_optional(&self.db)
        .await
        .context("update category")?;
        Ok(row)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete category")?;
        Ok(res.rows_affected() == 1)
    }
}
