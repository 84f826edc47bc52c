// HTTP request handlers for the passkey ceremony server
pub mod ceremony;
pub mod health;


use actix_web::{error::InternalError, web, HttpResponse};
use serde_json::json;

// Re-export the main handler functions
pub use ceremony::{
    generate_authentication_options, generate_registration_options, verify_authentication,
    verify_registration,
};
pub use health::health;

/// Largest accepted JSON body; attestation objects are a few kilobytes
const JSON_LIMIT: usize = 64 * 1024;

/// Register the ceremony routes and JSON extractor configuration
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(JSON_LIMIT).error_handler(
        |err, _req| {
            log::debug!("Rejected request body: {err}");
            let response = HttpResponse::BadRequest().json(json!({
                "error": "invalid_request",
                "message": "Request body is not valid JSON for this endpoint"
            }));
            InternalError::from_response(err, response).into()
        },
    ))
    .route(
        "/generate-registration-options",
        web::post().to(generate_registration_options),
    )
    .route("/verify-registration", web::post().to(verify_registration))
    .route(
        "/generate-authentication-options",
        web::post().to(generate_authentication_options),
    )
    .route("/verify-authentication", web::post().to(verify_authentication))
    .route("/ping", web::get().to(health));
}
