//! Passkey ceremony handlers
//!
//! Thin HTTP layer over [`CredentialCeremonyManager`]. Rejections come back as
//! `{verified: false, reason}`; infrastructure faults become a generic 500.

use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use crate::ceremony::{CredentialCeremonyManager, VerifiedResult};
use crate::errors::{CeremonyError, CeremonyFailure};
use crate::webauthn::{AuthenticationResponse, RegistrationResponse};

/// Longest identity accepted, in bytes
pub const MAX_IDENTITY_LEN: usize = 256;

/// Body of the option generation endpoints
#[derive(Deserialize, Debug)]
pub struct OptionsRequest {
    #[serde(alias = "email")]
    pub identity: String,
}

/// Body of `/verify-registration`
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationVerificationRequest {
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "attResp")]
    pub credential_response: RegistrationResponse,
}

/// Body of `/verify-authentication`
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationVerificationRequest {
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "assertionResp")]
    pub credential_response: AuthenticationResponse,
}

/// Start a registration ceremony
///
/// # Errors
///
/// Never fails; errors are rendered as JSON responses
pub async fn generate_registration_options(
    data: web::Json<OptionsRequest>,
    manager: web::Data<CredentialCeremonyManager>,
) -> Result<HttpResponse> {
    let identity = match validate_identity(&data.identity) {
        Ok(identity) => identity,
        Err(response) => return Ok(response),
    };

    match manager.generate_registration_options(identity).await {
        Ok(options) => Ok(HttpResponse::Ok().json(options)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

/// Finish a registration ceremony
///
/// # Errors
///
/// Never fails; errors are rendered as JSON responses
pub async fn verify_registration(
    data: web::Json<RegistrationVerificationRequest>,
    manager: web::Data<CredentialCeremonyManager>,
) -> Result<HttpResponse> {
    let identity = match validate_identity(&data.identity) {
        Ok(identity) => identity,
        Err(response) => return Ok(response),
    };

    match manager
        .verify_registration(identity, &data.credential_response)
        .await
    {
        Ok(result) => Ok(result_to_response(&result)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

/// Start an authentication ceremony
///
/// # Errors
///
/// Never fails; errors are rendered as JSON responses
pub async fn generate_authentication_options(
    data: web::Json<OptionsRequest>,
    manager: web::Data<CredentialCeremonyManager>,
) -> Result<HttpResponse> {
    let identity = match validate_identity(&data.identity) {
        Ok(identity) => identity,
        Err(response) => return Ok(response),
    };

    match manager.generate_authentication_options(identity).await {
        Ok(options) => Ok(HttpResponse::Ok().json(options)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

/// Finish an authentication ceremony
///
/// # Errors
///
/// Never fails; errors are rendered as JSON responses
pub async fn verify_authentication(
    data: web::Json<AuthenticationVerificationRequest>,
    manager: web::Data<CredentialCeremonyManager>,
) -> Result<HttpResponse> {
    let identity = match validate_identity(&data.identity) {
        Ok(identity) => identity,
        Err(response) => return Ok(response),
    };

    match manager
        .verify_authentication(identity, &data.credential_response)
        .await
    {
        Ok(result) => Ok(result_to_response(&result)),
        Err(e) => Ok(error_to_response(&e)),
    }
}

fn validate_identity(identity: &str) -> Result<&str, HttpResponse> {
    if identity.trim().is_empty() {
        return Err(invalid_request("identity must not be empty"));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(invalid_request("identity is too long"));
    }
    Ok(identity)
}

/// 400 with the standard error body
pub(crate) fn invalid_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "error": "invalid_request",
        "message": message
    }))
}

fn result_to_response(result: &VerifiedResult) -> HttpResponse {
    if result.reason == Some(CeremonyFailure::UnknownUser) {
        HttpResponse::BadRequest().json(result)
    } else {
        HttpResponse::Ok().json(result)
    }
}

/// Convert `CeremonyError` to HTTP response
fn error_to_response(error: &CeremonyError) -> HttpResponse {
    match error {
        CeremonyError::Rejected(failure) => HttpResponse::BadRequest().json(json!({
            "error": failure.code(),
            "message": failure.to_string()
        })),
        CeremonyError::InfrastructureFault(_) | CeremonyError::EntropyUnavailable => {
            log::error!("Ceremony request failed: {error}");
            HttpResponse::InternalServerError().json(json!({
                "error": "internal_error",
                "message": "Internal server error"
            }))
        }
    }
}
