use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Error taxonomy for the whole API surface.
///
/// Every variant maps to a uniform `{ "success": false, "message": ... }`
/// body; the 401 variants deliberately carry generic messages so callers
/// cannot distinguish wrong credentials from unknown accounts.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is inactive")]
    AccountInactive,
    #[error("Refresh token missing")]
    MissingToken,
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Server Error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::DuplicateEmail => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::MissingToken
            | Self::InvalidRefreshToken
            | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::AccountInactive | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            // Internals stay in the server log, never in the body.
            error!(error = ?err, "internal error");
        }
        let status = self.status();
        let body = json!({ "success": false, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_share_a_generic_message() {
        // Unknown email and wrong password must be indistinguishable.
        assert_eq!(
            ApiError::InvalidCredentials.to_string(),
            "Invalid credentials"
        );
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ApiError::DuplicateEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::InvalidRefreshToken.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::AccountInactive.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Forbidden("nope".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("User not found").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_never_leak_the_source() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.to_string(), "Server Error");
    }
}
