//! Configuration for the sprintboard server.
//!
//! Values are layered: built-in defaults, then `sprintboard.toml`, then
//! environment variables (a `.env` file is honoured), then CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3001
//! cors_origin = "http://localhost:3000"
//!
//! [database]
//! path = ".sprintboard/board.db"
//!
//! [auth]
//! jwt_secret = "change-me"
//! token_ttl_hours = 168
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "sprintboard.toml";

/// Secret shipped in the defaults. `validate` warns while it is still in use.
pub const DEFAULT_JWT_SECRET: &str = "sprintboard-dev-secret";

/// Longest token lifetime accepted, one hundred years.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 366 * 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".sprintboard/board.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
}

impl BoardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sprintboard.toml")
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file (if any) and apply environment overrides.
    pub fn resolve(path: &Path) -> Result<Self> {
        // Missing .env is the normal case.
        let _ = dotenvy::dotenv();
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reject values the server cannot run with at all. Merely doubtful
    /// values are left to `validate`.
    pub fn check_limits(&self) -> Result<()> {
        if self.auth.token_ttl_hours > MAX_TOKEN_TTL_HOURS {
            bail!(
                "auth.token_ttl_hours is {}; the maximum is {}",
                self.auth.token_ttl_hours,
                MAX_TOKEN_TTL_HOURS
            );
        }
        Ok(())
    }

    /// Apply overrides from an environment lookup, then `check_limits`. Takes
    /// the lookup as a closure so tests do not have to mutate the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SPRINTBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SPRINTBOARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid SPRINTBOARD_PORT '{}'", port))?;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(ttl) = lookup("JWT_TTL_HOURS") {
            self.auth.token_ttl_hours = ttl
                .parse()
                .with_context(|| format!("Invalid JWT_TTL_HOURS '{}'", ttl))?;
        }
        self.check_limits()
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize sprintboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Human-readable warnings about settings that will work but probably
    /// should not be used as-is.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            warnings.push("auth.jwt_secret is the built-in development secret".to_string());
        }
        if self.auth.jwt_secret.len() < 16 {
            warnings.push("auth.jwt_secret is shorter than 16 characters".to_string());
        }
        if self.auth.token_ttl_hours <= 0 {
            warnings.push(format!(
                "auth.token_ttl_hours is {}; issued tokens expire immediately",
                self.auth.token_ttl_hours
            ));
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        warnings
    }
}
