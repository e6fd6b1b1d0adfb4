//! Harness configuration.
//!
//! Values are resolved in three layers, later ones winning:
//! - built-in defaults pointing at a local development server
//! - an optional TOML file named by `MESSAGING_TEST_CONFIG`
//! - `MESSAGING_TEST_*` environment variables

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jid::BareJid;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

pub const CONFIG_FILE_ENV: &str = "MESSAGING_TEST_CONFIG";

const ENV_PREFIX: &str = "MESSAGING_TEST_";

/// How the client stream is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// STARTTLS with certificate verification.
    StartTls,
    /// Unencrypted TCP. Only for test servers.
    Tcp,
    /// STARTTLS, retried over plain TCP when TLS fails against a loopback host.
    #[default]
    Auto,
}

impl FromStr for Security {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" | "tls" => Ok(Security::StartTls),
            "tcp" | "plain" | "insecure" => Ok(Security::Tcp),
            "auto" => Ok(Security::Auto),
            _ => Err(ConfigError::InvalidValue {
                key: "security",
                value: s.to_string(),
            }),
        }
    }
}

/// Upper bound on how long a request waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDeadline {
    After(Duration),
    /// Wait for as long as it takes.
    Never,
}

impl RequestDeadline {
    /// `0` means no deadline.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            RequestDeadline::Never
        } else {
            RequestDeadline::After(Duration::from_millis(ms))
        }
    }
}

impl Default for RequestDeadline {
    fn default() -> Self {
        RequestDeadline::After(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Host of the server under test
    pub host: String,
    /// Client port of the server under test
    pub port: u16,
    /// Domain every test account is created under
    pub domain: String,
    /// Password shared by all test accounts
    #[serde(skip_serializing)]
    pub password: String,
    pub security: Security,
    /// Response deadline for IQ requests, `0` disables it
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Answer server-initiated IQs with an empty result
    pub acknowledge_pushes: bool,
    /// Resource to request at bind time; the server picks one when unset
    pub resource: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3010,
            domain: "indiebackend.com".into(),
            password: "Test".into(),
            security: Security::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: 30_000,
            acknowledge_pushes: false,
            resource: None,
        }
    }
}

impl HarnessConfig {
    /// Load from the optional config file, then apply environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: PathBuf::from(path),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        })?;
        info!(path = %path.display(), "loaded harness configuration");
        Ok(config)
    }

    /// Apply `MESSAGING_TEST_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = parse_number("port", &port)?;
        }
        if let Some(domain) = var("DOMAIN") {
            self.domain = domain;
        }
        if let Some(password) = var("PASSWORD") {
            self.password = password;
        }
        if let Some(security) = var("SECURITY") {
            self.security = security.parse()?;
        }
        if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number("request_timeout_ms", &ms)?;
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_number("connect_timeout_ms", &ms)?;
        }
        if let Some(flag) = var("ACK_PUSHES") {
            self.acknowledge_pushes = parse_bool_flag(&flag);
        }
        if let Some(resource) = var("RESOURCE") {
            self.resource = Some(resource).filter(|r| !r.is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "port",
                value: self.port.to_string(),
            });
        }
        if self.domain.parse::<BareJid>().is_err() {
            return Err(ConfigError::InvalidValue {
                key: "domain",
                value: self.domain.clone(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "connect_timeout_ms",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> RequestDeadline {
        RequestDeadline::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool_flag(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    !normalized.is_empty()
        && normalized != "0"
        && normalized != "false"
        && normalized != "no"
        && normalized != "off"
}
