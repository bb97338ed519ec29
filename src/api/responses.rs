//! Response bodies of the upload routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::models::{DuplicateVerdict, Post, PostId};

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::success(data)
        }
    }
}

// Implement IntoResponse for ApiResponse
impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = json!({
            "success": self.success,
            "data": self.data,
            "error": self.error,
        });

        (self.status, Json(body)).into_response()
    }
}

/// Wire shape of a duplicate check: `{ status, genHash, ogPost? }`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub status: bool,
    pub gen_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub og_post: Option<PostRef>,
    pub content_digest: String,
}

/// Reference to the post an upload duplicates.
#[derive(Debug, Serialize)]
pub struct PostRef {
    pub id: PostId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Post>,
}

impl From<&DuplicateVerdict> for CheckResponse {
    fn from(verdict: &DuplicateVerdict) -> Self {
        Self {
            status: verdict.is_duplicate,
            gen_hash: verdict.fingerprint.to_hex(),
            og_post: verdict.matched_post_id.map(|id| PostRef {
                id,
                post: verdict.original_post.clone(),
            }),
            content_digest: verdict.content_digest.clone(),
        }
    }
}

/// 409 body for a rejected duplicate upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResponse {
    pub duplicate: bool,
    pub post_id: Option<PostId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Post>,
    pub message: String,
}

impl From<&DuplicateVerdict> for DuplicateResponse {
    fn from(verdict: &DuplicateVerdict) -> Self {
        let message = match &verdict.original_post {
            Some(post) => format!("duplicate of post {}", post.id),
            None => "this upload duplicates an existing post".to_string(),
        };
        Self {
            duplicate: true,
            post_id: verdict.matched_post_id,
            post: verdict.original_post.clone(),
            message,
        }
    }
}

impl IntoResponse for DuplicateResponse {
    fn into_response(self) -> Response {
        (StatusCode::CONFLICT, Json(self)).into_response()
    }
}

/// 201 body for an accepted upload.
#[derive(Debug, Serialize)]
pub struct CreatedPost {
    pub post: Post,
    pub check: CheckResponse,
}
