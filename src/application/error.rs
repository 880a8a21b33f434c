use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::repos::RepoError,
    infra::error::InfraError,
};

/// Diagnostic messages attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code used by the binary when a command fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Infra(InfraError::Configuration { .. }) => 2,
            AppError::Infra(InfraError::Database { .. })
            | AppError::Infra(InfraError::Migration { .. })
            | AppError::Repo(_) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_attaches_to_response() {
        let mut response = Response::new(axum::body::Body::empty());
        ErrorReport::from_message("test", StatusCode::BAD_GATEWAY, "upstream gone")
            .attach(&mut response);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["upstream gone".to_string()]);
        assert_eq!(report.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn exit_codes_group_failures() {
        assert_eq!(
            AppError::from(InfraError::configuration("bad")).exit_code(),
            2
        );
        assert_eq!(AppError::from(RepoError::Timeout).exit_code(), 3);
        assert_eq!(AppError::unexpected("boom").exit_code(), 1);
    }
}
