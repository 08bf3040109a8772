#[macro_use]
extern crate tracing;

pub mod api;
pub mod config;
pub mod extract;
pub mod http;
pub mod listener;
pub mod middleware;
pub mod service;
pub mod token;

use std::sync::Arc;

use anyhow::Context as _;
use user_store::DynUserStore;

use crate::config::ConfHandle;
use crate::token::TokenCache;

#[derive(Clone)]
pub struct AppState {
    pub conf_handle: ConfHandle,
    pub token_cache: Arc<TokenCache>,
    pub user_store: DynUserStore,
}

impl AppState {
    /// Builds a state backed by an in-memory database, for tests.
    pub async fn mock(conf_json: &str) -> anyhow::Result<Self> {
        let conf_file = serde_json::from_str(conf_json).context("invalid mock configuration")?;
        let conf_handle = ConfHandle::mock(conf_file)?;
        let user_store = make_user_store(":memory:").await?;

        Ok(Self {
            conf_handle,
            token_cache: Arc::new(token::new_token_cache()),
            user_store,
        })
    }
}

pub async fn make_user_store(database_path: &str) -> anyhow::Result<DynUserStore> {
    use user_store::UserStore as _;
    use user_store_libsql::LibSqlUserStore;

    let conn = user_store_libsql::libsql::Builder::new_local(database_path)
        .build()
        .await
        .context("build database")?
        .connect()
        .context("open database connection")?;

    let store = LibSqlUserStore::new(conn);

    store.setup().await.context("database migration")?;

    Ok(Arc::new(store))
}

pub fn make_http_service(state: AppState) -> axum::Router<()> {
    let auth_layer = axum::middleware::from_fn_with_state(state.clone(), middleware::auth::auth_middleware);

    // Outermost first: request span, then CORS (so preflights are answered
    // without a token), then authentication.
    api::make_router(state)
        .layer(auth_layer)
        .layer(middleware::cors::make_middleware())
        .layer(axum::middleware::from_fn(middleware::log::log_middleware))
}
