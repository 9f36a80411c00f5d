//! Gateway configuration loaded from a TOML file with environment
//! overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xhaunt_store::DatabaseConfig;
use xhaunt_xmpp::ComponentConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub component: ComponentSection,
    #[serde(default)]
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[component]`: how to reach the XMPP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSection {
    #[serde(default)]
    pub jid: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_component_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSection {
    /// Omitted for an in-memory database.
    pub path: Option<PathBuf>,
    pub sync_url: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_component_port() -> u16 {
    5347
}

fn default_auth_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    pub fn component_config(&self) -> ComponentConfig {
        ComponentConfig {
            jid: self.component.jid.clone(),
            secret: self.component.secret.clone(),
            server: self.component.server.clone(),
            port: self.component.port,
        }
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            path: self.database.path.clone(),
            sync_url: self.database.sync_url.clone(),
            auth_token: self.database.auth_token.clone(),
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.timeout_secs)
    }
}

#[derive(Debug, Default)]
struct ConfigOverrides {
    secret: Option<String>,
    database: Option<String>,
    log_level: Option<String>,
}

/// Load configuration from `path`, merging environment variable overrides.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, config_overrides_from_env())
}

/// Parse configuration from a TOML string, merging environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        secret: std::env::var("XHAUNT_SECRET").ok(),
        database: std::env::var("XHAUNT_DATABASE").ok(),
        log_level: std::env::var("XHAUNT_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(secret) = overrides.secret {
        config.component.secret = secret;
    }
    if let Some(database) = overrides.database {
        config.database.path = Some(PathBuf::from(database));
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.component.jid.is_empty() {
        missing.push("component.jid".to_string());
    }
    if config.component.secret.is_empty() {
        missing.push("component.secret".to_string());
    }
    if config.auth.endpoint.is_empty() {
        missing.push("auth.endpoint".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    if config.component.jid.parse::<jid::BareJid>().is_err() {
        return Err(ConfigError::InvalidValue {
            field: "component.jid".to_string(),
            message: "not a valid JID".to_string(),
        });
    }

    if config.database.sync_url.is_some() && config.database.auth_token.is_none() {
        return Err(ConfigError::InvalidValue {
            field: "database.auth_token".to_string(),
            message: "required when sync_url is set".to_string(),
        });
    }

    if config.auth.timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "auth.timeout_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_without_env(toml_str: &str) -> Result<Config, ConfigError> {
        load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
    }

    fn valid_toml() -> &'static str {
        r#"
[component]
jid = "gw.example.org"
secret = "s3cr3t"
server = "xmpp.example.org"
port = 5348

[database]
path = "/var/lib/xhaunt/gateway.db"

[auth]
endpoint = "https://auth.example.org/login"
timeout_secs = 10

[logging]
level = "debug"
json = true
"#
    }

    fn minimal_toml() -> &'static str {
        r#"
[component]
jid = "gw.example.org"
secret = "s3cr3t"

[auth]
endpoint = "https://auth.example.org/login"
"#
    }

    #[test]
    fn parses_full_config() {
        let config = parse_without_env(valid_toml()).unwrap();
        assert_eq!(config.component.jid, "gw.example.org");
        assert_eq!(config.component.server, "xmpp.example.org");
        assert_eq!(config.component.port, 5348);
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/xhaunt/gateway.db"))
        );
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_without_env(minimal_toml()).unwrap();
        assert_eq!(config.component.server, "localhost");
        assert_eq!(config.component.port, 5347);
        assert!(config.database.path.is_none());
        assert_eq!(config.auth.timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn converts_to_component_and_database_configs() {
        let config = parse_without_env(valid_toml()).unwrap();

        let component = config.component_config();
        assert_eq!(component.jid, "gw.example.org");
        assert_eq!(component.secret, "s3cr3t");
        assert_eq!(component.port, 5348);

        let database = config.database_config();
        assert!(database.path.is_some());
        assert!(database.sync_url.is_none());
    }

    #[test]
    fn reports_all_missing_fields() {
        let toml = r#"
[component]
server = "xmpp.example.org"

[auth]
"#;
        match parse_without_env(toml).unwrap_err() {
            ConfigError::MissingRequiredFields { fields } => {
                assert_eq!(
                    fields,
                    vec!["component.jid", "component.secret", "auth.endpoint"]
                );
            }
            other => panic!("expected MissingRequiredFields, got: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_component_jid() {
        let toml = minimal_toml().replace("gw.example.org", "alice@");
        let err = parse_without_env(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "component.jid"));
    }

    #[test]
    fn rejects_sync_url_without_token() {
        let toml = format!(
            "{}\n[database]\npath = \"replica.db\"\nsync_url = \"libsql://db.example.org\"\n",
            minimal_toml()
        );
        let err = parse_without_env(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "database.auth_token"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let toml = minimal_toml().replace(
            "endpoint = \"https://auth.example.org/login\"",
            "endpoint = \"https://auth.example.org/login\"\ntimeout_secs = 0",
        );
        let err = parse_without_env(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "auth.timeout_secs"));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let toml = format!("{}\n[logging]\nlevel = \"verbose\"\n", minimal_toml());
        match parse_without_env(&toml).unwrap_err() {
            ConfigError::InvalidValue { field, message } => {
                assert_eq!(field, "logging.level");
                assert!(message.contains("trace"));
            }
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let toml = format!("{}\n[logging]\nlevel = \"{level}\"\n", minimal_toml());
            let config = parse_without_env(&toml).unwrap();
            assert_eq!(config.logging.level, *level);
        }
    }

    #[test]
    fn invalid_toml_reports_position() {
        let toml = "[component]\njid = \"gw.example.org\"\nsecret = \n";
        match parse_without_env(toml).unwrap_err() {
            ConfigError::InvalidToml { line, .. } => assert!(line >= 3),
            other => panic!("expected InvalidToml, got: {other}"),
        }
    }

    #[test]
    fn env_overrides_apply() {
        let overrides = ConfigOverrides {
            secret: Some("from-env".to_string()),
            database: Some("/tmp/override.db".to_string()),
            log_level: Some("warn".to_string()),
        };
        let config = load_config_from_str_with_overrides(minimal_toml(), overrides).unwrap();
        assert_eq!(config.component.secret, "from-env");
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn env_override_fills_missing_secret() {
        let toml = minimal_toml().replace("secret = \"s3cr3t\"\n", "");
        assert!(parse_without_env(&toml).is_err());

        let overrides = ConfigOverrides {
            secret: Some("from-env".to_string()),
            ..Default::default()
        };
        let config = load_config_from_str_with_overrides(&toml, overrides).unwrap();
        assert_eq!(config.component.secret, "from-env");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xhaunt.toml");
        std::fs::write(&path, minimal_toml()).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.component.jid, "gw.example.org");
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        match load_config_from(&path).unwrap_err() {
            ConfigError::FileNotFound { path: reported } => assert_eq!(reported, path),
            other => panic!("expected FileNotFound, got: {other}"),
        }
    }
}
