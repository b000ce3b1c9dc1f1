//! `GET /`, `GET /health` — liveness, no upstream calls.

use axum::Json;
use serde_json::{json, Value};

pub async fn handle() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
