pub mod channels;
pub mod events;
pub mod invitations;
pub mod members;
pub mod messages;

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
