use std::fmt;

/// Failure of the durable key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents are not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a login attempt. Every variant is terminal for the attempt.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization denied by provider: {reason}")]
    AuthorizationDenied { reason: String },
    #[error("callback did not include an authorization code")]
    MissingAuthorizationCode,
    #[error("no PKCE verifier in storage; restart the login")]
    MissingVerifier,
    #[error(
        "token exchange rejected (HTTP {status}): {}",
        .description.as_deref().unwrap_or("no description")
    )]
    ExchangeRejected {
        status: u16,
        description: Option<String>,
    },
    #[error("invalid token response: {0}")]
    InvalidTokenResponse(String),
    #[error("access token verification failed (HTTP {status}): {message}")]
    TokenVerificationFailed { status: u16, message: String },
    #[error(transparent)]
    StorageUnavailable(#[from] StorageError),
    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Discriminant of [`AuthError`], recorded in the flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    AuthorizationDenied,
    MissingAuthorizationCode,
    MissingVerifier,
    ExchangeRejected,
    InvalidTokenResponse,
    TokenVerificationFailed,
    StorageUnavailable,
    Transport,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::AuthorizationDenied { .. } => AuthErrorKind::AuthorizationDenied,
            Self::MissingAuthorizationCode => AuthErrorKind::MissingAuthorizationCode,
            Self::MissingVerifier => AuthErrorKind::MissingVerifier,
            Self::ExchangeRejected { .. } => AuthErrorKind::ExchangeRejected,
            Self::InvalidTokenResponse(_) => AuthErrorKind::InvalidTokenResponse,
            Self::TokenVerificationFailed { .. } => AuthErrorKind::TokenVerificationFailed,
            Self::StorageUnavailable(_) => AuthErrorKind::StorageUnavailable,
            Self::Transport(_) => AuthErrorKind::Transport,
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthorizationDenied => "authorization_denied",
            Self::MissingAuthorizationCode => "missing_authorization_code",
            Self::MissingVerifier => "missing_verifier",
            Self::ExchangeRejected => "exchange_rejected",
            Self::InvalidTokenResponse => "invalid_token_response",
            Self::TokenVerificationFailed => "token_verification_failed",
            Self::StorageUnavailable => "storage_unavailable",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_rejected_message_includes_description() {
        let err = AuthError::ExchangeRejected {
            status: 400,
            description: Some("Invalid authorization code".into()),
        };
        assert_eq!(
            err.to_string(),
            "token exchange rejected (HTTP 400): Invalid authorization code"
        );
        assert_eq!(err.kind(), AuthErrorKind::ExchangeRejected);
    }

    #[test]
    fn storage_error_maps_to_storage_kind() {
        let err: AuthError = StorageError::Unavailable("quota exceeded".into()).into();
        assert_eq!(err.kind(), AuthErrorKind::StorageUnavailable);
        assert_eq!(err.kind().to_string(), "storage_unavailable");
    }
}
