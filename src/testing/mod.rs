//! Testing utilities for the ceremony server
//!
//! - [`authenticator`] - Software authenticator (ES256, `EdDSA`, RS256) producing real responses
//! - [`fixtures`] - Pre-built settings and managers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bookworm_auth::testing::{SoftAuthenticator, TestFixtures};
//!
//! let manager = TestFixtures::manager();
//! let mut authenticator = SoftAuthenticator::for_relying_party(manager.settings());
//! let options = manager.generate_registration_options("reader@example.com").await?;
//! let response = authenticator.register(&options);
//! ```

pub mod authenticator;
pub mod fixtures;

pub use authenticator::{tamper, AttestationMode, KeyAlgorithm, SoftAuthenticator};
pub use fixtures::TestFixtures;

/// Common test constants
pub mod constants {
    /// Default test identity
    pub const TEST_IDENTITY: &str = "reader@example.com";

    /// Identity that never has an account
    pub const UNKNOWN_IDENTITY: &str = "ghost@example.com";

    /// Origin that does not belong to the relying party
    pub const FOREIGN_ORIGIN: &str = "https://evil.example";
}
