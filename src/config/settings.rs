//! TOML-based configuration for sqlsh.
//!
//! Supports a config file (sqlsh.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connections.production]
//! server = "db.example.com"
//! database = "sales"
//! user = "reporting"
//! password = "${PROD_DB_PASSWORD}"
//!
//! [connections.dev]
//! server = "localhost"
//! database = "dev"
//!
//! [service]
//! path = "/opt/sqltoolsservice/sqltoolsservice"
//! args = ["--log-dir", "/tmp/sqlsh"]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named connection profiles.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionProfile>,

    /// Tools-service configuration.
    #[serde(default)]
    pub service: ServiceSettings,
}

/// One named connection profile.
///
/// The option map is free-form and passed to the tools service untouched
/// as the `connection.options` object; string values support `${ENV_VAR}`
/// expansion.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ConnectionProfile {
    pub options: HashMap<String, Value>,
}

impl ConnectionProfile {
    /// Options with environment variables expanded in string values.
    pub fn resolved_options(&self) -> Result<HashMap<String, Value>, SettingsError> {
        let mut resolved = HashMap::with_capacity(self.options.len());
        for (key, value) in &self.options {
            let value = match value {
                Value::String(s) => Value::String(expand_env_vars(s)?),
                other => other.clone(),
            };
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}

/// Tools-service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Path to the tools-service binary.
    pub path: Option<String>,

    /// Extra command-line arguments for the service.
    pub args: Vec<String>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SQLSH_CONFIG`
    /// 2. `./sqlsh.toml`
    /// 3. `~/.config/sqlsh/sqlsh.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SQLSH_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("sqlsh.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlsh").join("sqlsh.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get a connection profile by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionProfile, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection (the "default" profile, or the first one).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionProfile)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// Configured tools-service binary path, with env vars expanded.
    pub fn service_path(&self) -> Option<PathBuf> {
        let path = self.service.path.as_ref()?;
        let expanded = expand_env_vars(path).ok()?;
        Some(PathBuf::from(expanded))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                // $VAR (ends at non-alphanumeric/underscore)
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    // Just a lone $, keep it
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_env_vars_braces() {
        env::set_var("SQLSH_TEST_VAR", "hello");
        assert_eq!(expand_env_vars("${SQLSH_TEST_VAR}").unwrap(), "hello");
        assert_eq!(
            expand_env_vars("prefix_${SQLSH_TEST_VAR}_suffix").unwrap(),
            "prefix_hello_suffix"
        );
        env::remove_var("SQLSH_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        env::set_var("SQLSH_TEST_VAR2", "world");
        assert_eq!(expand_env_vars("$SQLSH_TEST_VAR2").unwrap(), "world");
        assert_eq!(expand_env_vars("$SQLSH_TEST_VAR2!").unwrap(), "world!");
        env::remove_var("SQLSH_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("${NONEXISTENT_VAR_12345}");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[connections.production]
server = "db.example.com"
database = "sales"
encrypt = true

[connections.dev]
server = "localhost"
database = "dev"

[service]
path = "/opt/sqltoolsservice/sqltoolsservice"
args = ["--log-dir", "/tmp/sqlsh"]
"#;

        let settings: Settings = toml::from_str(toml).unwrap();

        assert_eq!(settings.connections.len(), 2);
        let prod = &settings.connections["production"];
        assert_eq!(prod.options["server"], json!("db.example.com"));
        assert_eq!(prod.options["encrypt"], json!(true));

        assert_eq!(
            settings.service.path.as_deref(),
            Some("/opt/sqltoolsservice/sqltoolsservice")
        );
        assert_eq!(settings.service.args, vec!["--log-dir", "/tmp/sqlsh"]);
    }

    #[test]
    fn test_resolved_options_expand_strings_only() {
        env::set_var("SQLSH_TEST_PW", "s3cret");
        let profile = ConnectionProfile {
            options: HashMap::from([
                ("password".to_string(), json!("${SQLSH_TEST_PW}")),
                ("port".to_string(), json!(1433)),
            ]),
        };
        let resolved = profile.resolved_options().unwrap();
        assert_eq!(resolved["password"], json!("s3cret"));
        assert_eq!(resolved["port"], json!(1433));
        env::remove_var("SQLSH_TEST_PW");
    }

    #[test]
    fn test_missing_connection() {
        let settings = Settings::default();
        assert!(matches!(
            settings.get_connection("nope"),
            Err(SettingsError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_default_connection_prefers_default_profile() {
        let toml = r#"
[connections.other]
server = "a"

[connections.default]
server = "b"
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        let (name, profile) = settings.default_connection().unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.options["server"], json!("b"));
    }
}
