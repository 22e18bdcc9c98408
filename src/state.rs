use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::TokenService,
    config::AppConfig,
    db::PgPool,
    email::Mailer,
    error::{AppError, AppResult},
    export::Renderers,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
    pub renderers: Renderers,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        tokens: TokenService,
        mailer: Arc<dyn Mailer>,
        renderers: Renderers,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            tokens,
            mailer,
            renderers,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
