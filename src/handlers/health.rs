use actix_web::{HttpResponse, Result};
use serde::Serialize;

use crate::VERSION;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    message: &'static str,
}

/// Health check endpoint
///
/// # Errors
///
/// This function currently never returns an error, but the Result type
/// is used for consistency with other handlers
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: VERSION,
        message: "Book Worm passkey server is running",
    }))
}
