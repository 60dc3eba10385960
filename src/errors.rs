use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

/// Failures of a backing store (membership or role rows).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query timed out after {0} ms")]
    Timeout(u64),
    #[error("corrupt store row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
                Self::Corrupt(value.to_string())
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("audit channel full, record dropped")]
    ChannelFull,
    #[error("audit channel closed")]
    ChannelClosed,
    #[error("audit write failed: {0}")]
    Write(String),
}

/// Internal authorization failures. None of these ever reach the end user;
/// the enforcement point maps each one to a [`DenyReason`].
#[derive(thiserror::Error, Debug)]
pub enum AuthzError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("legacy role '{0}' has no role record or static entry")]
    RoleUnresolvable(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthzError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn deny_reason(&self) -> DenyReason {
        match self {
            AuthzError::Store(_) | AuthzError::Config(_) => DenyReason::InfrastructureFailure,
            AuthzError::RoleUnresolvable(_) => DenyReason::RoleUnresolvable,
        }
    }
}

/// Why a request was denied. Recorded in the audit trail and logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Unauthenticated,
    MissingScopeContext,
    NotAMember,
    RoleUnresolvable,
    InsufficientPermission,
    InfrastructureFailure,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "unauthenticated",
            DenyReason::MissingScopeContext => "missing_scope_context",
            DenyReason::NotAMember => "not_a_member",
            DenyReason::RoleUnresolvable => "role_unresolvable",
            DenyReason::InsufficientPermission => "insufficient_permission",
            DenyReason::InfrastructureFailure => "infrastructure_failure",
        }
    }

    /// Outages are not policy decisions and are reported separately.
    pub fn is_outage(&self) -> bool {
        matches!(self, DenyReason::InfrastructureFailure)
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        let error = match &self {
            AppError::Forbidden => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        };

        let payload = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<AuthzError> for AppError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Config(msg) => Self::Configuration(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
