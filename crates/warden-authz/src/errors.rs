use thiserror::Error;

/// Token validation failure taxonomy. Every variant maps to a 401 at the
/// gateway edge.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token")]
    MalformedToken,
    #[error("no signing key matches the token")]
    UnknownSigner,
    #[error("token signature verification failed")]
    BadSignature,
    #[error("token is outside its validity window")]
    Expired,
    #[error("token issuer is not accepted")]
    WrongIssuer,
    #[error("token audience is not accepted")]
    WrongAudience,
    #[error("signing key fetch failed: {0}")]
    KeyFetch(#[from] reqwest::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
