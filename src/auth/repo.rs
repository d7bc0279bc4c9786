use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, RefreshTokenRecord, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Read access to user credentials plus the one insert registration needs.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Fails with `DuplicateEmail` when the address is taken, even if another
    /// registration claimed it after the caller's existence check.
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
}

/// Durable single-session bookkeeping: at most one refresh token per user.
///
/// `replace` is the only operation that can install a live token, and it
/// always removes every earlier one for that user in the same atomic step.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    async fn replace(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<RefreshTokenRecord>;

    /// Exact match on both the owner and the token value.
    async fn find(&self, user_id: Uuid, token: &str) -> anyhow::Result<Option<RefreshTokenRecord>>;

    /// Deletes by token value alone; returns how many rows went away (possibly zero).
    async fn revoke(&self, token: &str) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, phone,
                   default_instrument, created_at, updated_at
              FROM users
             WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, phone,
                   default_instrument, created_at, updated_at
              FROM users
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let now = OffsetDateTime::now_utc();
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone,
                               default_instrument, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING id, email, password_hash, first_name, last_name, phone,
                      default_instrument, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(&user.default_instrument)
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }
}

#[derive(Clone)]
pub struct PgRefreshTokenLedger {
    db: PgPool,
}

impl PgRefreshTokenLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokenLedger {
    async fn replace(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<RefreshTokenRecord> {
        let mut tx = self.db.begin().await.context("begin ledger transaction")?;

        // Row lock on the owner serializes concurrent replaces for one user.
        let owner: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT id FROM users WHERE id = $1 FOR UPDATE"#)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .context("lock user row")?;
        if owner.is_none() {
            anyhow::bail!("cannot record refresh token for unknown user {user_id}");
        }

        sqlx::query(r#"DELETE FROM refresh_tokens WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("purge previous refresh tokens")?;

        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, token, created_at, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(OffsetDateTime::now_utc())
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .context("insert refresh token")?;

        tx.commit().await.context("commit ledger transaction")?;
        Ok(record)
    }

    async fn find(&self, user_id: Uuid, token: &str) -> anyhow::Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token, created_at, expires_at
              FROM refresh_tokens
             WHERE user_id = $1 AND token = $2
            "#,
        )
        .bind(user_id)
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("find refresh token")?;
        Ok(record)
    }

    async fn revoke(&self, token: &str) -> anyhow::Result<u64> {
        let res = sqlx::query(r#"DELETE FROM refresh_tokens WHERE token = $1"#)
            .bind(token)
            .execute(&self.db)
            .await
            .context("revoke refresh token")?;
        Ok(res.rows_affected())
    }
}
