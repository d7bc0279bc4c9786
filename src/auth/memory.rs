//! In-process stores backing the service and handler tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::{RefreshTokenLedger, StoreError, UserStore};
use crate::auth::repo_types::{NewUser, RefreshTokenRecord, User};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            default_instrument: user.default_instrument,
            created_at: now,
            updated_at: now,
        };
        users.push(created.clone());
        Ok(created)
    }
}

/// Keyed by user, so holding two live rows for one user is unrepresentable.
#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryLedger {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, user_id: Uuid) -> Option<RefreshTokenRecord> {
        self.rows.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryLedger {
    async fn replace(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<RefreshTokenRecord> {
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_owned(),
            created_at: OffsetDateTime::now_utc(),
            expires_at,
        };
        self.rows.lock().unwrap().insert(user_id, record.clone());
        Ok(record)
    }

    async fn find(&self, user_id: Uuid, token: &str) -> anyhow::Result<Option<RefreshTokenRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&user_id).filter(|r| r.token == token).cloned())
    }

    async fn revoke(&self, token: &str) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, r| r.token != token);
        Ok((before - rows.len()) as u64)
    }
}

/// Ledger whose writes always fail, for exercising the storage-error path.
pub struct BrokenLedger;

#[async_trait]
impl RefreshTokenLedger for BrokenLedger {
    async fn replace(
        &self,
        _user_id: Uuid,
        _token: &str,
        _expires_at: OffsetDateTime,
    ) -> anyhow::Result<RefreshTokenRecord> {
        anyhow::bail!("ledger unavailable")
    }

    async fn find(&self, _user_id: Uuid, _token: &str) -> anyhow::Result<Option<RefreshTokenRecord>> {
        anyhow::bail!("ledger unavailable")
    }

    async fn revoke(&self, _token: &str) -> anyhow::Result<u64> {
        anyhow::bail!("ledger unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn expiry() -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::days(7)
    }

    #[tokio::test]
    async fn replace_supersedes_previous_row() {
        let ledger = MemoryLedger::default();
        let user = Uuid::new_v4();
        ledger.replace(user, "first", expiry()).await.unwrap();
        ledger.replace(user, "second", expiry()).await.unwrap();

        assert_eq!(ledger.len(), 1);
        assert!(ledger.find(user, "first").await.unwrap().is_none());
        assert!(ledger.find(user, "second").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn find_requires_matching_owner() {
        let ledger = MemoryLedger::default();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.replace(alice, "alice-token", expiry()).await.unwrap();
        assert!(ledger.find(bob, "alice-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_is_by_value_and_tolerates_misses() {
        let ledger = MemoryLedger::default();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.replace(alice, "a", expiry()).await.unwrap();
        ledger.replace(bob, "b", expiry()).await.unwrap();

        assert_eq!(ledger.revoke("a").await.unwrap(), 1);
        assert_eq!(ledger.revoke("a").await.unwrap(), 0);
        assert_eq!(ledger.revoke("never-issued").await.unwrap(), 0);
        assert!(ledger.get(bob).is_some());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryUserStore::default();
        let new = NewUser {
            email: "a@x.com".into(),
            password_hash: "h".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            phone: None,
            default_instrument: None,
        };
        store.create(new.clone()).await.unwrap();
        assert!(matches!(store.create(new).await, Err(StoreError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn email_lookup_is_exact() {
        let store = MemoryUserStore::default();
        store
            .create(NewUser {
                email: "Case@x.com".into(),
                password_hash: "h".into(),
                first_name: "A".into(),
                last_name: "B".into(),
                phone: None,
                default_instrument: None,
            })
            .await
            .unwrap();
        assert!(store.find_by_email("case@x.com").await.unwrap().is_none());
        assert!(store.find_by_email("Case@x.com").await.unwrap().is_some());
    }
}
