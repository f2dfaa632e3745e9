use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub registry_client: RegistryClientSettings,
    #[serde(default)]
    pub default_repo: DefaultRepoSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9999
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// SQLite URL, e.g. "sqlite://data/repo-vault.db"
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://data/repo-vault.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Encryption provider configuration for registry secrets
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EncryptionSettings {
    /// Local AES-256-GCM encryption using a symmetric key
    #[serde(rename = "aes-gcm-256")]
    Local {
        /// Base64-encoded 32-byte encryption key
        /// Generate with: repo-vault generate-key (or openssl rand -base64 32)
        key: String,
    },
}

fn default_login_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_use_system_proxy() -> bool {
    true
}

/// Limits for live registry logins
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryClientSettings {
    /// Deadline for a whole login handshake in seconds (default: 10)
    #[serde(default = "default_login_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for establishing the TCP/TLS connection in seconds (default: 5)
    /// Failing to connect in time is reported as a network error, not a timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Honor HTTP_PROXY/HTTPS_PROXY/NO_PROXY for registry logins (default: true)
    #[serde(default = "default_use_system_proxy")]
    pub use_system_proxy: bool,
}

impl RegistryClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RegistryClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_login_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            use_system_proxy: default_use_system_proxy(),
        }
    }
}

fn default_repo_enabled() -> bool {
    true
}

fn default_repo_name() -> String {
    "Docker Hub".to_string()
}

fn default_repo_endpoint() -> String {
    "docker.io".to_string()
}

/// Built-in public registry seeded on first start
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultRepoSettings {
    /// Seed the protected default entry if none exists (default: true)
    #[serde(default = "default_repo_enabled")]
    pub enabled: bool,
    #[serde(default = "default_repo_name")]
    pub name: String,
    #[serde(default = "default_repo_endpoint")]
    pub endpoint: String,
}

impl Default for DefaultRepoSettings {
    fn default() -> Self {
        Self {
            enabled: default_repo_enabled(),
            name: default_repo_name(),
            endpoint: default_repo_endpoint(),
        }
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        lazy_static::lazy_static! {
            static ref ENV_VAR: regex::Regex =
                regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
        }

        ENV_VAR
            .replace_all(s, |caps: &regex::Captures| {
                let default_value = caps.get(2).map(|m| m.as_str());
                match env::var(&caps[1]) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let map = table
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                    .collect();
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Self::config_value_to_json).collect())
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file found (when not required)
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
        required: bool,
    ) -> Result<bool, ConfigError> {
        for ext in ["toml", "yaml", "yml"] {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        if required {
            Err(ConfigError::Message(format!(
                "Required config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir, name
            )))
        } else {
            tracing::debug!(
                "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir,
                name
            );
            Ok(false)
        }
    }

    /// Load settings from `REPO_VAULT_CONFIG_DIR` (default: "config")
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("REPO_VAULT_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("REPO_VAULT_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        Self::load(&config_dir, &run_mode)
    }

    /// Layer `default`, `{run_mode}` and `local` config files from `config_dir`,
    /// then `REPO_VAULT_*` environment variables (`__` separates sections)
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        Self::try_add_config_file(&mut builder, config_dir, "default", true)?;
        Self::try_add_config_file(&mut builder, config_dir, run_mode, false)?;
        Self::try_add_config_file(&mut builder, config_dir, "local", false)?;

        builder = builder.add_source(
            config::Environment::with_prefix("REPO_VAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let json_value = serde_json::Value::Object(
            root_value
                .iter()
                .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                .collect(),
        );

        // Deserialize and collect unknown fields instead of failing on them
        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        // DATABASE_URL takes precedence over config files and REPO_VAULT_DATABASE__URL
        if let Ok(database_url) = env::var("DATABASE_URL") {
            if !database_url.is_empty() {
                settings.database.url = database_url;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message(
                "Database URL not configured. Set DATABASE_URL or [database] url in config"
                    .to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "[database] max_connections must be at least 1".to_string(),
            ));
        }

        let EncryptionSettings::Local { key } = &self.encryption;
        if key.trim().is_empty() {
            return Err(ConfigError::Message(
                "Encryption key not configured. Set [encryption] key (generate with: repo-vault generate-key)"
                    .to_string(),
            ));
        }

        if self.registry_client.timeout_secs == 0 || self.registry_client.connect_timeout_secs == 0
        {
            return Err(ConfigError::Message(
                "[registry_client] timeouts must be greater than zero".to_string(),
            ));
        }

        if self.default_repo.enabled
            && (self.default_repo.name.trim().is_empty()
                || self.default_repo.endpoint.trim().is_empty())
        {
            return Err(ConfigError::Message(
                "[default_repo] name and endpoint must be set when enabled".to_string(),
            ));
        }

        Ok(())
    }
}
