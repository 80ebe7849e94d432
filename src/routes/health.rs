use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const DB_PING_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db = match &state.db_pool {
        Some(pool) => {
            if database_reachable(pool).await {
                "ok"
            } else {
                "unreachable"
            }
        }
        None => "not_configured",
    };

    Json(json!({
        "status": if db == "ok" { "ok" } else { "degraded" },
        "app": state.config.app_name,
        "environment": state.config.environment,
        "report_timezone": state.config.report_timezone.name(),
        "now": Utc::now().to_rfc3339(),
        "db": db,
    }))
}

async fn database_reachable(pool: &sqlx::PgPool) -> bool {
    match tokio::time::timeout(DB_PING_TIMEOUT, sqlx::query("SELECT 1").fetch_one(pool)).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            tracing::error!(error = %error, "Health check DB query failed");
            false
        }
        Err(_) => {
            tracing::error!("Health check DB query timed out");
            false
        }
    }
}
