#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use bookworm_auth::{configure_services, settings::AuthServerSettings, CredentialCeremonyManager};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml, .env and environment variables
    let settings = AuthServerSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;
    settings
        .init_logging()
        .map_err(|e| std::io::Error::other(format!("Failed to initialize logging: {e}")))?;

    let manager = CredentialCeremonyManager::from_settings(&settings)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to open credential store: {e}")))?;

    spawn_challenge_sweeper(manager.clone(), settings.webauthn.challenge_sweep_seconds);
    start_server(manager, settings).await
}

/// Periodically drop challenges nobody answered
fn spawn_challenge_sweeper(manager: CredentialCeremonyManager, interval_seconds: u64) {
    if interval_seconds == 0 {
        log::info!("Expired challenge sweeper disabled");
        return;
    }
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            interval.tick().await;
            let purged = manager.purge_expired_challenges();
            if purged > 0 {
                log::debug!("Purged {purged} expired challenge(s)");
            }
        }
    });
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(
    manager: CredentialCeremonyManager,
    settings: AuthServerSettings,
) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    // Configure CORS for the browser client
    let cors_origins = settings.get_cors_origins();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Content-Type", "Accept"])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(manager.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &AuthServerSettings) {
    println!("Starting Book Worm passkey server on http://{bind_address}");
    println!(
        "Relying party: {} ({}) at {}",
        settings.webauthn.rp_name, settings.webauthn.rp_id, settings.webauthn.rp_origin
    );
    println!("Credential store: {:?}", settings.storage.backend);
    println!();
    println!("Ceremony endpoints:");
    println!("  POST /generate-registration-options   - Start passkey registration");
    println!("  POST /verify-registration             - Complete passkey registration");
    println!("  POST /generate-authentication-options - Start passkey sign-in");
    println!("  POST /verify-authentication           - Complete passkey sign-in");
    println!();
    println!("System endpoints:");
    println!("  GET  /ping - Health check");
}
