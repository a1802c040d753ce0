use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    storage::StorageClient,
};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const IMAGE_URL_TTL_SECS: u64 = 30 * 60;

/// An uploaded image not yet written to storage.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

impl ImageUpload {
    /// Accept only supported image types up to [`MAX_IMAGE_BYTES`].
    pub fn new(body: Bytes, content_type: impl Into<String>) -> AppResult<Self> {
        let content_type = content_type.into();
        if ext_from_mime(&content_type).is_none() {
            return Err(AppError::BadRequest(
                "Invalid file type. Only images are allowed.".into(),
            ));
        }
        if body.len() > MAX_IMAGE_BYTES {
            return Err(AppError::BadRequest("File too large".into()));
        }
        Ok(Self { body, content_type })
    }
}

/// Store the image under `<prefix>/<uuid>.<ext>` and return the key.
pub async fn upload_image(
    storage: &dyn StorageClient,
    prefix: &str,
    image: ImageUpload,
) -> anyhow::Result<String> {
    let ext = ext_from_mime(&image.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);
    storage
        .put_object(&key, image.body, &image.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(key)
}

/// Best-effort delete; a leftover object is only logged.
pub async fn discard_image(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = %e, %key, "failed to delete stored image");
    }
}

pub async fn presign(storage: &dyn StorageClient, key: &str) -> anyhow::Result<String> {
    storage
        .presign_get(key, IMAGE_URL_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {}", key))
}
