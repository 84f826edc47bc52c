use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::webauthn::WebAuthnSettings;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthServerSettings {
    pub application: ApplicationSettings,
    pub webauthn: WebAuthnSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: String,
}

/// Where credential records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-lifetime map, lost on restart
    #[default]
    Memory,
    /// JSON document on disk
    File,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown credential store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// File backend location
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: "http://localhost:3000,http://localhost:5173".to_string(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: "data/credentials.json".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AuthServerSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - The resulting configuration is invalid
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        // Load base settings from TOML or defaults
        let mut settings = Self::load_base_settings()?;

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut settings);

        settings.validate()?;
        Ok(settings)
    }

    /// Initialize `env_logger` with the configured level; `RUST_LOG` filters win
    ///
    /// # Errors
    ///
    /// Returns an error if a logger is already installed
    pub fn init_logging(&self) -> Result<(), log::SetLoggerError> {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.logging.level.as_str()),
        )
        .try_init()
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `BOOKWORM_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::load_from_file(default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("BOOKWORM_SECRETS_DIR") {
            let secrets_path = Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::load_from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ BOOKWORM_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a TOML settings file; missing sections and keys take defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_webauthn_env_overrides(&mut settings.webauthn);
        Self::apply_storage_env_overrides(&mut settings.storage);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        Self::apply_parsed_env_override("PORT", &mut app_settings.port);
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
    }

    /// Apply environment overrides for the relying party
    pub fn apply_webauthn_env_overrides(webauthn: &mut WebAuthnSettings) {
        if let Ok(rp_id) = std::env::var("RP_ID") {
            webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("RP_NAME") {
            webauthn.rp_name = rp_name;
        }
        if let Ok(rp_origin) = std::env::var("RP_ORIGIN") {
            webauthn.rp_origin = rp_origin;
        }
        Self::apply_parsed_env_override("CHALLENGE_TIMEOUT_SECONDS", &mut webauthn.timeout_seconds);
        Self::apply_parsed_env_override(
            "CHALLENGE_SWEEP_SECONDS",
            &mut webauthn.challenge_sweep_seconds,
        );
        if let Ok(user_verification) = std::env::var("USER_VERIFICATION") {
            webauthn.user_verification = user_verification;
        }
        if let Ok(attestation) = std::env::var("ATTESTATION") {
            webauthn.attestation = attestation;
        }
    }

    fn apply_storage_env_overrides(storage: &mut StorageSettings) {
        Self::apply_parsed_env_override("CREDENTIAL_STORE", &mut storage.backend);
        if let Ok(path) = std::env::var("CREDENTIAL_STORE_PATH") {
            storage.path = path;
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Helper to apply an environment override that must parse; bad values are ignored
    fn apply_parsed_env_override<T: FromStr>(env_var: &str, target: &mut T) {
        if let Ok(value_str) = std::env::var(env_var) {
            match value_str.parse::<T>() {
                Ok(value) => *target = value,
                Err(_) => eprintln!("⚠️  Ignoring invalid {env_var} value: {value_str}"),
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Check the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the relying party settings are incoherent or the
    /// file backend has no path
    pub fn validate(&self) -> anyhow::Result<()> {
        self.webauthn.validate()?;
        if self.storage.backend == StorageBackend::File && self.storage.path.trim().is_empty() {
            anyhow::bail!("storage.path must be set for the file credential store");
        }
        Ok(())
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
