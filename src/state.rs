use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    hub::WorkroomHub,
    payments::PaymentGateway,
    storage::ObjectStorage,
};

pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Shared handles for every request. External services sit behind trait
/// objects so the integration tests can swap in fakes.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub payments: Arc<dyn PaymentGateway>,
    /// Live workroom channels; lives as long as the process.
    pub hub: Arc<WorkroomHub>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        payments: Arc<dyn PaymentGateway>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            payments,
            hub: Arc::new(WorkroomHub::new()),
            jwt,
        }
    }

    pub fn db(&self) -> AppResult<DbConn> {
        self.pool.get().map_err(|err| {
            tracing::error!(error = %err, "database pool exhausted or unreachable");
            AppError::internal(format!("database pool error: {err}"))
        })
    }
}
