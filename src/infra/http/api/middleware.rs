use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::error::ApiError;

/// Header set by the upstream auth layer once it has authenticated the caller.
pub const VIEWER_HEADER: &str = "x-reverie-viewer";

/// The authenticated caller, resolved from [`VIEWER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub Uuid);

pub async fn require_viewer(mut request: Request<Body>, next: Next) -> Response {
    let viewer = request
        .headers()
        .get(VIEWER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

    let Some(viewer) = viewer else {
        return ApiError::unauthorized().into_response();
    };

    request.extensions_mut().insert(Viewer(viewer));
    let mut response = next.run(request).await;
    response.extensions_mut().insert(Viewer(viewer));
    response
}
