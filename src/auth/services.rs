use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    claims::TokenKind,
    errors::AuthError,
    jwt::TokenCodec,
    password::{hash_password, verify_password},
    repo::{RefreshTokenLedger, StoreError, UserStore},
    repo_types::{NewUser, User},
};

// Argon2id digest (default params) that no password matches. Unknown emails
// are verified against it so both login failures cost one hash.
const DUMMY_DIGEST: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub instrument: Option<String>,
}

impl Registration {
    fn validate(&self) -> Result<(), AuthError> {
        let required = [
            ("email", &self.email),
            ("password", &self.password),
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(AuthError::InvalidInput(format!("{field} is required")));
        }
        if !is_valid_email(&self.email) {
            return Err(AuthError::InvalidInput("Invalid email".into()));
        }
        Ok(())
    }
}

/// Outcome of a successful register or login.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Register, login, refresh and logout over the credential store, the
/// token codec and the refresh-token ledger.
#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
    codec: TokenCodec,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            users,
            ledger,
            codec,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn register(&self, reg: Registration) -> Result<Session, AuthError> {
        reg.validate()?;

        if self.users.find_by_email(&reg.email).await?.is_some() {
            warn!(email = %reg.email, "email already registered");
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = hash_password(&reg.password).await?;
        let user = self
            .users
            .create(NewUser {
                email: reg.email,
                password_hash,
                first_name: reg.first_name,
                last_name: reg.last_name,
                phone: reg.phone,
                default_instrument: reg.instrument,
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail => {
                    warn!("email claimed by a concurrent registration");
                    AuthError::DuplicateAccount
                }
                StoreError::Backend(e) => AuthError::Storage(e),
            })?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.open_session(user).await
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            let _ = verify_password(password, DUMMY_DIGEST).await;
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        self.open_session(user).await
    }

    /// Exchanges the sanctioned refresh token for a new access token. The
    /// refresh token and its ledger row are left as they are.
    pub async fn refresh(&self, presented: Option<&str>) -> Result<String, AuthError> {
        let token = presented
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.codec.verify(token).map_err(|e| {
            warn!(reason = %e, "refresh token failed verification");
            AuthError::InvalidRefreshToken
        })?;
        if claims.kind != TokenKind::Refresh {
            warn!(user_id = %claims.sub, "access token presented for refresh");
            return Err(AuthError::InvalidRefreshToken);
        }
        if self.ledger.find(claims.sub, token).await?.is_none() {
            warn!(user_id = %claims.sub, "refresh token not in ledger");
            return Err(AuthError::InvalidRefreshToken);
        }

        let access = self.codec.issue(claims.sub, TokenKind::Access)?;
        info!(user_id = %claims.sub, "access token refreshed");
        Ok(access.token)
    }

    /// Revokes by value. Succeeds whether or not anything matched.
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let token = presented
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let removed = self.ledger.revoke(token).await?;
        info!(removed, "logout");
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.find_by_id(user_id).await?)
    }

    // Tokens only leave this function once the ledger holds the refresh token.
    async fn open_session(&self, user: User) -> Result<Session, AuthError> {
        let access = self.codec.issue(user.id, TokenKind::Access)?;
        let refresh = self.codec.issue(user.id, TokenKind::Refresh)?;
        let record = self
            .ledger
            .replace(user.id, &refresh.token, refresh.expires_at)
            .await?;
        debug!(user_id = %user.id, record_id = %record.id, "refresh token recorded");

        Ok(Session {
            user,
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }
}
