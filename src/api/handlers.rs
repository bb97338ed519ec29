//! Route handlers for uploads, replacements and deletions.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, Result},
    models::{MediaBuffer, NewPost, PostId, PostUpdate, Safety},
    AppState,
};

use super::responses::{ApiResponse, CheckResponse, CreatedPost, DuplicateResponse};

/// Fields of an upload form.
struct UploadForm {
    media: MediaBuffer,
    anonymous: bool,
    safety: Safety,
    force: bool,
}

async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm> {
    let mut media = None;
    let mut anonymous = false;
    let mut safety = Safety::default();
    let mut force = false;

    // Process the multipart form data
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .ok_or_else(|| AppError::UploadError("No filename provided".to_string()))?
                    .to_string();
                let content = field.bytes().await?;
                if content.is_empty() {
                    return Err(AppError::UploadError("Uploaded file is empty".to_string()));
                }
                media = Some(MediaBuffer::from_file_name(content, &file_name));
            }
            "anonymous" => anonymous = parse_flag(&field.text().await?),
            "safety" => safety = field.text().await?.parse()?,
            "force" => force = parse_flag(&field.text().await?),
            _ => {}
        }
    }

    let media = media.ok_or_else(|| AppError::UploadError("No file provided".to_string()))?;
    Ok(UploadForm {
        media,
        anonymous,
        safety,
        force,
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

/// Token cancelled when the request future is dropped, e.g. on client abort.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// `POST /api/check`: duplicate check without persisting anything.
pub async fn check_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let form = read_upload_form(&mut multipart).await?;
    let (cancel, _guard) = request_token();

    let verdict = state.dedup.check_duplicate(&form.media, &cancel).await?;
    Ok(Json(CheckResponse::from(&verdict)))
}

/// `POST /api/posts`: check, then create the post and record its
/// fingerprint.
pub async fn upload_post(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response> {
    let form = read_upload_form(&mut multipart).await?;
    let (cancel, _guard) = request_token();

    let verdict = state.dedup.check_duplicate(&form.media, &cancel).await?;
    if verdict.is_duplicate {
        if !form.force {
            return Ok(DuplicateResponse::from(&verdict).into_response());
        }
        log::info!(
            "Forced upload despite duplicate of post {:?}",
            verdict.matched_post_id
        );
    }

    let post = state
        .dedup
        .accept(NewPost {
            anonymous: form.anonymous,
            safety: form.safety,
            file_ext: form.media.extension.clone(),
            fingerprint: Some(verdict.fingerprint.clone()),
            content_digest: Some(verdict.content_digest.clone()),
        })
        .await?;
    log::info!("Created post {} ({})", post.id, form.media.kind);

    Ok(ApiResponse::created(CreatedPost {
        post,
        check: CheckResponse::from(&verdict),
    })
    .into_response())
}

/// `POST /api/posts/:id/replace`: swap a post's media, recomputing its
/// fingerprint.
pub async fn replace_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PostId>,
    mut multipart: Multipart,
) -> Result<Response> {
    if state.posts.get_post(id).await?.is_none() {
        return Err(AppError::NotFound(format!("post {}", id)));
    }

    let form = read_upload_form(&mut multipart).await?;
    let (cancel, _guard) = request_token();

    let verdict = state.dedup.check_replacement(id, &form.media, &cancel).await?;
    if verdict.is_duplicate && !form.force {
        return Ok(DuplicateResponse::from(&verdict).into_response());
    }

    let post = state
        .posts
        .update_post(
            id,
            PostUpdate {
                file_ext: form.media.extension.clone(),
                fingerprint: Some(verdict.fingerprint.clone()),
                content_digest: Some(verdict.content_digest.clone()),
            },
        )
        .await?;
    state.dedup.register(id, verdict.fingerprint.clone()).await?;
    log::info!("Replaced media of post {}", id);

    Ok(ApiResponse::success(CreatedPost {
        post,
        check: CheckResponse::from(&verdict),
    })
    .into_response())
}

/// `DELETE /api/posts/:id`
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PostId>,
) -> Result<StatusCode> {
    if !state.posts.delete_post(id).await? {
        return Err(AppError::NotFound(format!("post {}", id)));
    }
    state.dedup.forget(id).await?;
    log::info!("Deleted post {}", id);
    Ok(StatusCode::NO_CONTENT)
}
