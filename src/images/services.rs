use std::time::Duration;

use anyhow::Context;
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub const IMAGE_PREFIX: &str = "recipes/images";

#[derive(Debug)]
pub struct DecodedImage {
    pub body: Bytes,
    pub content_type: String,
}

/// Parses `data:<mime>;base64,<payload>`.
pub fn decode_data_uri(raw: &str) -> Result<DecodedImage, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::validation("image must not be empty"));
    }
    let (header, payload) = raw
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .ok_or_else(|| ApiError::validation("image must be a base64 data URI"))?;

    let content_type = header.to_ascii_lowercase();
    if ext_from_mime(&content_type).is_none() {
        return Err(ApiError::validation(format!(
            "unsupported image type {content_type}"
        )));
    }

    let body = Base64::decode_vec(payload.trim())
        .map_err(|_| ApiError::validation("image is not valid base64"))?;
    if body.is_empty() {
        return Err(ApiError::validation("image must not be empty"));
    }

    Ok(DecodedImage {
        body: Bytes::from(body),
        content_type,
    })
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Uploads a recipe image and returns its storage key.
pub async fn store_recipe_image(st: &AppState, img: DecodedImage) -> anyhow::Result<String> {
    let ext = ext_from_mime(&img.content_type).unwrap_or("bin");
    let key = format!("{IMAGE_PREFIX}/{}.{ext}", Uuid::new_v4());
    st.storage
        .put(&key, img.body, &img.content_type)
        .await
        .context("store recipe image")?;
    Ok(key)
}

/// Deletes an image, logging instead of failing.
pub async fn remove_quietly(st: &AppState, key: &str) {
    if let Err(e) = st.storage.remove(key).await {
        warn!(error = %e, key, "image cleanup failed");
    }
}

pub async fn image_url(st: &AppState, key: &str) -> anyhow::Result<String> {
    st.storage
        .presigned_url(key, Duration::from_secs(st.config.image_url_ttl_secs))
        .await
        .with_context(|| format!("presign url for {key}"))
}
