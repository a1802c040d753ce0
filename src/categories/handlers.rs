use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::dto::{CategoryFields, CategoryPage, CategoryResponse, ListQuery};
use crate::{
    auth::{
        dto::MessageResponse,
        extractors::{AdminUser, AuthUser},
    },
    error::{AppError, AppResult},
    images::{services::MAX_IMAGE_BYTES, ImageUpload},
    state::AppState,
};

pub fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category).patch(update_category).delete(delete_category),
        )
        // room for the image plus the text fields
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(e.body_text())
}

/// Read `name`, `description` and an optional `image` file from a multipart form.
async fn read_form(mut mp: Multipart) -> AppResult<(CategoryFields, Option<ImageUpload>)> {
    let mut fields = CategoryFields::default();
    let mut image = None;

    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("name") => fields.name = Some(field.text().await.map_err(bad_multipart)?),
            Some("description") => {
                fields.description = Some(field.text().await.map_err(bad_multipart)?)
            }
            Some("image") => {
                let content_type = field
                    .content_type()
                    .map(str::to_owned)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(bad_multipart)?;
                if !body.is_empty() {
                    image = Some(ImageUpload::new(body, content_type)?);
                }
            }
            _ => {}
        }
    }

    fields.validate()?;
    Ok((fields, image))
}

#[instrument(skip(state, mp))]
pub async fn create_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    mp: Multipart,
) -> AppResult<Json<CategoryResponse>> {
    let (fields, image) = read_form(mp).await?;
    Ok(Json(state.categories.create(fields, image).await?))
}

#[instrument(skip(state))]
pub async fn get_category(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CategoryResponse>> {
    Ok(Json(state.categories.get(id).await?))
}

#[instrument(skip(state))]
pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<CategoryPage>> {
    Ok(Json(state.categories.list(query).await?))
}

#[instrument(skip(state, mp))]
pub async fn update_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> AppResult<Json<CategoryResponse>> {
    let (fields, image) = read_form(mp).await?;
    Ok(Json(state.categories.update(id, fields, image).await?))
}

#[instrument(skip(state))]
pub async fn delete_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    state.categories.delete(id).await?;
    Ok(Json(MessageResponse::new("Category deleted successfully")))
}
