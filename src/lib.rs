#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the bookworm-auth application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ceremony;
pub mod errors;
pub mod handlers;
pub mod repository;
pub mod settings;
pub mod webauthn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use ceremony::{CredentialCeremonyManager, VerifiedResult};
pub use errors::{CeremonyError, CeremonyFailure, RepositoryError};
pub use handlers::configure_services;
pub use settings::AuthServerSettings;
