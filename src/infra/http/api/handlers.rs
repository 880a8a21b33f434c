use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use reverie_api_types::{MarkSeenRequest, MarkSeenResponse, RelationshipResponse};
use uuid::Uuid;

use crate::application::pagination::{ConnectionCursor, PageRequest};
use crate::application::repos::RepoError;
use crate::infra::db::map_sqlx_error;

use super::error::ApiError;
use super::middleware::Viewer;
use super::models::*;
use super::state::ApiState;

/// -------- Relationships --------
pub async fn follow(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_follow(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

pub async fn unfollow(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_unfollow(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

pub async fn block(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_block(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

pub async fn unblock(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_unblock(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

pub async fn mute(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_mute(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

pub async fn unmute(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(target): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.feed.on_unmute(viewer, target).await?;
    Ok(Json(current_relationship(&state, viewer, target).await?))
}

/// -------- Identity lists --------
pub async fn followers(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<IdentityListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = identity_request(&query)?;
    let result = state.feed.social().followers(user_id, page).await?;
    Ok(Json(identity_page(result)))
}

pub async fn following(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<IdentityListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = identity_request(&query)?;
    let result = state.feed.social().following(user_id, page).await?;
    Ok(Json(identity_page(result)))
}

/// -------- Feed --------
pub async fn get_feed(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1);
    let result = state.feed.get_feed(viewer, page, query.page_size).await?;
    Ok(Json(feed_page_response(result)))
}

pub async fn mark_seen(
    State(state): State<ApiState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Json(payload): Json<MarkSeenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let evicted = state.feed.mark_seen(viewer, &payload.post_ids).await?;
    Ok(Json(MarkSeenResponse { evicted }))
}

/// -------- Health --------
pub async fn health(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    if let Some(db) = state.db.as_ref() {
        db.health_check()
            .await
            .map_err(|err| ApiError::from(map_sqlx_error(err)))?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn current_relationship(
    state: &ApiState,
    viewer: Uuid,
    target: Uuid,
) -> Result<RelationshipResponse, ApiError> {
    let rel = state.feed.social().relationship(viewer, target).await?;
    Ok(relationship_response(&rel))
}

fn identity_request(query: &IdentityListQuery) -> Result<PageRequest<ConnectionCursor>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_IDENTITY_LIMIT)
        .clamp(1, MAX_IDENTITY_LIMIT);
    let cursor = query
        .cursor
        .as_deref()
        .map(ConnectionCursor::decode)
        .transpose()
        .map_err(RepoError::from)?;
    Ok(PageRequest::new(limit, cursor))
}
