//! Liveness probe.

use axum::Json;
use serde_json::{Value, json};

/// GET /health: answers as long as the process serves HTTP. Collaborators,
/// the broker and the database are not probed.
pub async fn check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
