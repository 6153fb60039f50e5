use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid OAuth provider: {0}")]
    InvalidProvider(String),

    #[error("Token exchange with {provider} failed: {reason}")]
    TokenExchangeFailed { provider: String, reason: String },

    #[error("Invalid token for {provider}: {reason}")]
    InvalidToken { provider: String, reason: String },

    #[error("User creation failed: {0}")]
    UserCreationFailed(String),

    #[error("State parameter mismatch")]
    StateMismatch,

    #[error("Missing state parameter")]
    MissingState,

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn token_exchange(provider: &str, reason: impl std::fmt::Display) -> Self {
        Self::TokenExchangeFailed {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_token(provider: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidToken {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Prefix the message with the step that failed, keeping the error kind.
    #[must_use]
    pub fn context(self, step: &str) -> Self {
        match self {
            Self::NotFound(msg) => Self::NotFound(format!("{step}: {msg}")),
            Self::AlreadyExists(msg) => Self::AlreadyExists(format!("{step}: {msg}")),
            Self::InvalidInput(msg) => Self::InvalidInput(format!("{step}: {msg}")),
            Self::UserCreationFailed(msg) => Self::UserCreationFailed(format!("{step}: {msg}")),
            Self::Internal(msg) => Self::Internal(format!("{step}: {msg}")),
            Self::TokenExchangeFailed { provider, reason } => Self::TokenExchangeFailed {
                provider,
                reason: format!("{step}: {reason}"),
            },
            Self::InvalidToken { provider, reason } => Self::InvalidToken {
                provider,
                reason: format!("{step}: {reason}"),
            },
            other => other,
        }
    }

    /// Whether the failure was caused by the caller's input rather than
    /// an upstream provider or the store.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidProvider(_)
                | Self::StateMismatch
                | Self::MissingState
                | Self::MissingCode
                | Self::InvalidRedirectUrl(_)
                | Self::InvalidInput(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => {
                        let detail = db_err.message().to_string();
                        if detail.contains("provider") {
                            Self::AlreadyExists("Provider account already linked".to_string())
                        } else if detail.contains("email") {
                            Self::AlreadyExists("Email already registered".to_string())
                        } else {
                            Self::AlreadyExists("Resource already exists".to_string())
                        }
                    }
                    // PostgreSQL foreign_key_violation
                    "23503" => Self::NotFound("Referenced identity not found".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Self::InvalidInput("Required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
