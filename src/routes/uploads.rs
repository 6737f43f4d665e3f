use std::time::Duration;

use axum::extract::{Json, Multipart, State};
use axum::http::StatusCode;
use tracing::{error, info};

use crate::{
    attachments::Attachment,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    state::AppState,
    storage::{attachment_key, AttachmentUpload},
};

pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 7 * 24 * 60 * 60;

pub async fn upload_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Attachment>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        original_name = field.file_name().map(|n| n.to_string());
        content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file_bytes = Some(data.to_vec());
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::bad_request("file is too large"));
    }

    let name = original_name
        .as_deref()
        .map(sanitize_file_name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = content_type
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let key = attachment_key(user.user_id, &name);
    let size = file_bytes.len();
    state
        .storage
        .put_attachment(AttachmentUpload {
            key: key.clone(),
            file_name: name.clone(),
            content_type: content_type.clone(),
            bytes: file_bytes,
        })
        .await?;
    let url = state
        .storage
        .presign_attachment(&key, Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS))
        .await?;

    info!(user_id = %user.user_id, %key, size, "attachment uploaded");
    Ok((
        StatusCode::CREATED,
        Json(Attachment {
            url,
            content_type: Some(content_type),
            name,
        }),
    ))
}

/// Keeps the last path segment and replaces characters that are unsafe in
/// object keys or header values.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    base.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => ch,
            _ => '_',
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
