use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::{db, state::AppState};

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = state
        .db()
        .ok()
        .and_then(|mut conn| db::ping(&mut conn).ok())
        .is_some();

    if !database {
        warn!("health check failed: database unreachable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": false })),
        );
    }

    (StatusCode::OK, Json(json!({ "status": "ok", "database": true })))
}
