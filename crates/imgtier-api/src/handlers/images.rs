//! Image ingestion and retrieval handlers.

use std::path::Path as FsPath;
use std::time::Instant;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{StreamExt, TryStreamExt};
use imgtier_models::{ImageId, ProcessingTask, QualityLevel};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DEFAULT_LIST_LIMIT;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the uploaded image.
pub const UPLOAD_FIELD: &str = "image";

/// Filename extensions accepted for upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Stored variants never change for a given key.
const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: ImageId,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QualityQuery {
    pub quality: Option<String>,
}

impl QualityQuery {
    fn parse(&self) -> ApiResult<Option<QualityLevel>> {
        self.quality
            .as_deref()
            .map(|q| {
                QualityLevel::from_token(q)
                    .ok_or_else(|| ApiError::bad_request("Invalid quality parameter"))
            })
            .transpose()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub ids: Vec<ImageId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: ImageId,
    pub deleted: Vec<QualityLevel>,
}

fn has_allowed_extension(filename: &str) -> bool {
    FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

/// Read the `image` field, returning its filename and bytes.
async fn read_upload(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, data.to_vec()));
    }
    Err(ApiError::bad_request("No image provided"))
}

/// Upload an image.
///
/// The original is stored first and a processing task is published only
/// after the write succeeds. Rejected uploads store and publish nothing.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let started = Instant::now();
    let (filename, data) = read_upload(&mut multipart).await?;

    if !has_allowed_extension(&filename) {
        metrics::record_upload_rejected("extension");
        return Err(ApiError::bad_request("File is not an image"));
    }
    if data.is_empty() || !state.codec.is_supported(&data) {
        metrics::record_upload_rejected("format");
        return Err(ApiError::bad_request("Unsupported image format"));
    }

    let id = ImageId::new();
    let locator = state.store.save(&id, QualityLevel::Original, &data).await?;

    let task = ProcessingTask::new(id.clone(), locator);
    if let Err(e) = state.channel.publish(&task).await {
        // No task will ever reference the original, so drop it
        if let Err(de) = state.store.delete(&id, QualityLevel::Original).await {
            warn!(image_id = %id, error = %de, "Failed to remove original after publish failure");
        }
        return Err(e.into());
    }

    metrics::record_upload(data.len(), started.elapsed().as_secs_f64());
    info!(
        image_id = %id,
        filename = %filename,
        bytes = data.len(),
        source_path = %task.source_path,
        "Image uploaded and queued"
    );

    Ok(Json(UploadResponse {
        id,
        message: "Image uploaded successfully and queued for processing".to_string(),
    }))
}

/// Fetch one quality variant; defaults to the original.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QualityQuery>,
) -> ApiResult<Response> {
    let quality = query.parse()?.unwrap_or(QualityLevel::Original);
    let id = ImageId::from_string(id);

    let data = state.store.get(&id, quality).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::not_found("Image not found")
        } else {
            e.into()
        }
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, IMAGE_CACHE_CONTROL),
        ],
        data,
    )
        .into_response())
}

/// Delete one quality variant, or every stored variant when no quality is given.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QualityQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = ImageId::from_string(id);
    let levels = match query.parse()? {
        Some(level) => vec![level],
        None => QualityLevel::ALL.to_vec(),
    };

    let mut deleted = Vec::with_capacity(levels.len());
    for level in levels {
        match state.store.delete(&id, level).await {
            Ok(()) => deleted.push(level),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    if deleted.is_empty() {
        return Err(ApiError::not_found("Image not found"));
    }

    info!(image_id = %id, deleted = ?deleted, "Image variants deleted");
    Ok(Json(DeleteResponse { id, deleted }))
}

/// List stored image ids.
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(state.config.max_list_limit);

    let ids: Vec<ImageId> = state.store.list().take(limit).try_collect().await?;
    Ok(Json(ListResponse { ids }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extensions() {
        assert!(has_allowed_extension("photo.jpg"));
        assert!(has_allowed_extension("photo.JPEG"));
        assert!(has_allowed_extension("scan.final.png"));
        assert!(has_allowed_extension("x.webp"));
        assert!(!has_allowed_extension("notes.txt"));
        assert!(!has_allowed_extension("jpg"));
        assert!(!has_allowed_extension(""));
    }

    #[test]
    fn test_quality_query() {
        let query = QualityQuery {
            quality: Some("50".to_string()),
        };
        assert_eq!(query.parse().unwrap(), Some(QualityLevel::Medium));
        assert_eq!(QualityQuery::default().parse().unwrap(), None);

        for bad in ["90", "high", "Original"] {
            let query = QualityQuery {
                quality: Some(bad.to_string()),
            };
            assert_eq!(query.parse().unwrap_err().status_code(), StatusCode::BAD_REQUEST);
        }
    }
}
