use crate::{AppState, errors::AppError, templates};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing;

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "postImg";

#[derive(Debug, Deserialize)]
pub struct VoteParams {
    id: Option<String>,
}

impl VoteParams {
    fn id(&self) -> Result<&str, AppError> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::InvalidInput("id param is missing".to_string()))
    }
}

/// Handler for GET /
pub async fn feed(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let posts = state.posts.assemble_posts().await?;
    tracing::debug!("Rendering feed with {} posts", posts.len());
    Ok(Html(templates::render_feed(&posts)))
}

/// Handler for POST /upload
pub async fn upload_post(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Redirect, AppError> {
    let mut image: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            tracing::debug!(field = ?field.name(), "Ignoring unknown multipart field");
            continue;
        }
        // Fall back to the file extension when the client sends no Content-Type.
        let content_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| {
                field
                    .file_name()
                    .and_then(|name| mime_guess::from_path(name).first_raw())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field.bytes().await?.to_vec();
        image = Some((data, content_type));
    }

    let (data, content_type) = image.ok_or_else(|| AppError::MissingFormField(IMAGE_FIELD.to_string()))?;
    let post = state.posts.create_post(data, &content_type).await?;
    tracing::info!(post_id = %post.id, "Post uploaded via handler");
    Ok(Redirect::to("/"))
}

/// Handler for GET /upvote?id=
pub async fn upvote(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VoteParams>,
) -> Result<Redirect, AppError> {
    state.posts.upvote(params.id()?).await?;
    Ok(Redirect::to("/"))
}

/// Handler for GET /downvote?id=
pub async fn downvote(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VoteParams>,
) -> Result<Redirect, AppError> {
    state.posts.downvote(params.id()?).await?;
    Ok(Redirect::to("/"))
}

/// Handler for GET /posts/{id}
pub async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post = state.posts.get_post(&id).await?;
    Ok(Json(post))
}

/// Handler for DELETE /posts/{id}. Only the metadata row is removed.
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.posts.delete_post(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn healthz() -> &'static str {
    "200 OK"
}
