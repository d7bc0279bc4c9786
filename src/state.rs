use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::{
    jwt::TokenCodec,
    repo::{PgRefreshTokenLedger, PgUserStore},
    services::SessionManager,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

impl AppState {
    pub fn from_parts(config: &AppConfig, db: PgPool) -> Self {
        let sessions = SessionManager::new(
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgRefreshTokenLedger::new(db)),
            TokenCodec::new(&config.jwt),
        );
        Self { sessions }
    }

    #[cfg(test)]
    pub fn fake(ledger: Arc<dyn crate::auth::repo::RefreshTokenLedger>) -> Self {
        use crate::auth::memory::MemoryUserStore;

        let sessions = SessionManager::new(
            Arc::new(MemoryUserStore::default()),
            ledger,
            TokenCodec::new(&crate::auth::jwt::test_config("test")),
        );
        Self { sessions }
    }
}

impl FromRef<AppState> for TokenCodec {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.codec().clone()
    }
}
