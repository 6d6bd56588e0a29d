use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Location read when no config file is given explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/command-watcher.toml";

/// Top-level configuration. Each section enables one report channel.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub email: Option<EmailConfig>,
    pub icinga: Option<IcingaConfig>,
    pub beep: Option<BeepConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmailConfig {
    /// `host[:port]` or `[ipv6]:port`, e.g. `smtp.example.com:587`. The port
    /// defaults to 25. STARTTLS is required.
    pub smtp_server: String,
    pub smtp_login: String,
    pub smtp_password: String,
    pub to_addr: String,
    pub from_addr: String,
    /// Recipient for CRITICAL reports; falls back to `to_addr`.
    #[serde(default)]
    pub to_addr_critical: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IcingaConfig {
    pub api_endpoint_host: String,
    #[serde(default = "default_icinga_port")]
    pub api_endpoint_port: u16,
    #[serde(default)]
    pub http_basic_username: Option<String>,
    #[serde(default)]
    pub http_basic_password: Option<String>,
    /// PEM client certificate, used together with `client_private_key`.
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
    #[serde(default)]
    pub client_private_key: Option<PathBuf>,
    /// PEM CA certificate the API endpoint is verified against.
    #[serde(default)]
    pub ca_certificate: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BeepConfig {
    pub activated: bool,
}

fn default_icinga_port() -> u16 {
    5665
}

/// Errors from loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Read and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path` if given; otherwise the default location if it exists,
/// else an empty config (no channels).
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file, reporting disabled");
                Ok(Config::default())
            }
        }
    }
}
