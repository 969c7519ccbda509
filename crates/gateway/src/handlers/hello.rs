//! Liveness handler

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: &'static str,
}

/// Liveness probe - answers as soon as the listener is up
pub async fn hello() -> Json<HelloResponse> {
    Json(HelloResponse {
        message: "Hello, world!",
    })
}
