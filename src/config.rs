//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::templates::Capability;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub dir: PathBuf,
    pub allow_gaps: bool,
    pub database: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("schema/migrations"),
            allow_gaps: false,
            database: "scientific_knowledge".to_string(),
        }
    }
}

/// Destructive-schema override switches
#[derive(Debug, Clone, Default)]
pub struct OverrideConfig {
    pub allow_destructive_schema: bool,
    pub governance_env: Option<String>,
}

impl OverrideConfig {
    pub fn requested(&self) -> bool {
        self.allow_destructive_schema
    }

    /// Honored only in the dev environment
    pub fn allowed(&self) -> bool {
        self.allow_destructive_schema
            && self
                .governance_env
                .as_deref()
                .is_some_and(|env| env.eq_ignore_ascii_case("dev"))
    }
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub manifest_path: PathBuf,
    pub catalog_dir: PathBuf,
    pub forbidden_capabilities: BTreeSet<Capability>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("templates_manifest.json"),
            catalog_dir: PathBuf::from("templates"),
            forbidden_capabilities: Capability::default_forbidden(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrustConfig {
    pub bundle_dir: PathBuf,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("ci_artifacts"),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub migrations: MigrationConfig,
    pub overrides: OverrideConfig,
    pub templates: TemplateConfig,
    pub trust: TrustConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str) -> bool {
    var(name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Comma-separated capability names; unknown names are rejected
pub fn parse_capabilities(raw: &str) -> Result<BTreeSet<Capability>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            name.parse::<Capability>()
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))
        })
        .collect()
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: var("HOST")
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: match var("PORT") {
                Some(p) => p
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("PORT={}", p)))?,
                None => ServerConfig::default().port,
            },
        };

        let cors = CorsConfig {
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = MigrationConfig::default();
        let migrations = MigrationConfig {
            dir: var("MIGRATIONS_DIR").map(PathBuf::from).unwrap_or(defaults.dir),
            allow_gaps: env_bool("MIGRATIONS_ALLOW_GAPS"),
            database: var("GRAPH_DATABASE").unwrap_or(defaults.database),
        };

        let overrides = OverrideConfig {
            allow_destructive_schema: env_bool("ALLOW_DESTRUCTIVE_SCHEMA"),
            governance_env: var("GOVERNANCE_ENV"),
        };

        let defaults = TemplateConfig::default();
        let templates = TemplateConfig {
            manifest_path: var("TEMPLATE_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_path),
            catalog_dir: var("TEMPLATE_CATALOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_dir),
            forbidden_capabilities: match var("FORBIDDEN_CAPABILITIES") {
                Some(raw) => parse_capabilities(&raw)?,
                None => defaults.forbidden_capabilities,
            },
        };

        let trust = TrustConfig {
            bundle_dir: var("TRUST_BUNDLE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| TrustConfig::default().bundle_dir),
        };

        Ok(Self {
            server,
            cors,
            migrations,
            overrides,
            templates,
            trust,
        })
    }
}
