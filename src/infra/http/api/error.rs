use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reverie_api_types::{ApiErrorBody, ApiErrorMessage};

use crate::application::error::ErrorReport;
use crate::application::feed::FeedError;
use crate::application::repos::RepoError;
use crate::application::social::SocialGraphError;

use super::models::relationship_response;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const SELF_REFERENCE: &str = "self_reference";
    pub const NOT_FOLLOWING: &str = "not_following";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INVALID_PAGE: &str = "invalid_page";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const FEED_UNAVAILABLE: &str = "feed_unavailable";
    pub const REPO: &str = "repo_error";
}

const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    retry_after: bool,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            retry_after: false,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Viewer identity required",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn retryable(mut self) -> Self {
        self.retry_after = true;
        self
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { constraint } => Self::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "Duplicate record",
                Some(constraint),
            ),
            RepoError::Pagination(p) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_CURSOR,
                "Invalid cursor",
                Some(p.to_string()),
            ),
            RepoError::NotFound => Self::not_found("Resource not found"),
            RepoError::InvalidInput { message } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid input",
                Some(message),
            ),
            RepoError::Integrity { message } => Self::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "Integrity constraint violated",
                Some(message),
            ),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                None,
            )
            .retryable(),
            RepoError::Persistence(message) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                Some(message),
            ),
        }
    }
}

impl From<SocialGraphError> for ApiError {
    fn from(err: SocialGraphError) -> Self {
        match err {
            SocialGraphError::SelfReference { action } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::SELF_REFERENCE,
                "Users cannot target themselves",
                Some(format!("cannot {action} yourself")),
            ),
            SocialGraphError::NotFound { user_id } => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
                "User not found",
                Some(user_id.to_string()),
            ),
            // The existing relationship rides along so a retrying client can
            // read the current state without another round trip.
            SocialGraphError::Conflict { message, existing } => Self::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                message,
                serde_json::to_string(&relationship_response(&existing)).ok(),
            ),
            SocialGraphError::NotFollowing { target_id } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::NOT_FOLLOWING,
                "Not following this user",
                Some(target_id.to_string()),
            ),
            SocialGraphError::Store(err) => Self::from(err),
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::InvalidPage { page } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_PAGE,
                "Page must be 1 or greater",
                Some(format!("page={page}")),
            ),
            FeedError::ColdCacheUnavailable(source) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::FEED_UNAVAILABLE,
                "Feed is not available yet",
                Some(source.to_string()),
            )
            .retryable(),
            FeedError::Store(err) => Self::from(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}
