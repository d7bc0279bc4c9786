use thiserror::Error;

/// Closed set of outcomes a session operation can fail with.
///
/// The first five are expected results of bad input and map to 4xx
/// responses. `Storage` covers credential-store and ledger I/O and is
/// only ever reported to clients as an opaque server error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("an account with this email already exists")]
    DuplicateAccount,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("refresh token missing from request")]
    MissingToken,
    #[error("refresh token rejected")]
    InvalidRefreshToken,
    #[error("{0}")]
    InvalidInput(String),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}
