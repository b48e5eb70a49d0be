use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Pre-issued token for non-interactive use. Normally the session store
    /// supplies the credential.
    pub token: Option<SecretString>,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub storage_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub api_timeout_secs: Option<u64>,
    pub session_storage_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000/api".to_string(),
                timeout_secs: 30,
                token: None,
            },
            session: SessionConfig { storage_path: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reqflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(api) = patch.api {
            if let Some(base_url) = api.base_url {
                self.api.base_url = base_url;
            }
            if let Some(timeout_secs) = api.timeout_secs {
                self.api.timeout_secs = timeout_secs;
            }
            if let Some(token) = api.token {
                self.api.token = Some(token.into());
            }
        }

        if let Some(session) = patch.session {
            if let Some(storage_path) = session.storage_path {
                self.session.storage_path = Some(storage_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REQFLOW_API_BASE_URL") {
            self.api.base_url = value;
        }
        if let Some(value) = read_env("REQFLOW_API_TIMEOUT_SECS") {
            self.api.timeout_secs = parse_u64("REQFLOW_API_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_API_TOKEN") {
            self.api.token = Some(value.into());
        }

        if let Some(value) = read_env("REQFLOW_SESSION_STORAGE_PATH") {
            self.session.storage_path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("REQFLOW_LOGGING_LEVEL").or_else(|| read_env("REQFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REQFLOW_LOGGING_FORMAT").or_else(|| read_env("REQFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.api_base_url {
            self.api.base_url = base_url;
        }
        if let Some(timeout_secs) = overrides.api_timeout_secs {
            self.api.timeout_secs = timeout_secs;
        }
        if let Some(storage_path) = overrides.session_storage_path {
            self.session.storage_path = Some(storage_path);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api(&self.api)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reqflow.toml"), PathBuf::from("config/reqflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` and `${VAR:-fallback}` in raw file text. An empty
/// variable counts as unset when a fallback is given.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let expression_and_tail = &rest[start + 2..];
        let end = expression_and_tail.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let expression = &expression_and_tail[..end];

        let (var, fallback) = match expression.split_once(":-") {
            Some((var, fallback)) => (var.trim(), Some(fallback)),
            None => (expression.trim(), None),
        };
        let value = env::var(var).ok().filter(|value| fallback.is_none() || !value.is_empty());
        match (value, fallback) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(fallback)) => output.push_str(fallback),
            (None, None) => {
                return Err(ConfigError::MissingEnvInterpolation { var: var.to_owned() })
            }
        }

        rest = &expression_and_tail[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_api(api: &ApiConfig) -> Result<(), ConfigError> {
    let base_url = api.base_url.trim();
    let host = base_url.strip_prefix("https://").or_else(|| base_url.strip_prefix("http://"));
    match host {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => {}
        _ => {
            return Err(ConfigError::Validation(
                "api.base_url must be an absolute http:// or https:// URL".to_string(),
            ));
        }
    }

    if api.timeout_secs == 0 || api.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "api.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if api.token.as_ref().is_some_and(|token| token.expose_secret().trim().is_empty()) {
        return Err(ConfigError::Validation("api.token must not be blank when set".to_string()));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.storage_path.as_ref().is_some_and(|path| path.as_os_str().is_empty()) {
        return Err(ConfigError::Validation(
            "session.storage_path must not be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    api: Option<ApiPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    storage_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        interpolate_env_vars, AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat,
    };

    const MANAGED_VARS: &[&str] = &[
        "REQFLOW_API_BASE_URL",
        "REQFLOW_API_TIMEOUT_SECS",
        "REQFLOW_API_TOKEN",
        "REQFLOW_SESSION_STORAGE_PATH",
        "REQFLOW_LOGGING_LEVEL",
        "REQFLOW_LOGGING_FORMAT",
        "REQFLOW_LOG_LEVEL",
        "REQFLOW_LOG_FORMAT",
        "TEST_REQFLOW_TOKEN",
        "TEST_REQFLOW_ABSENT",
    ];

    /// Runs `body` with exactly `vars` set among the managed variables.
    fn with_vars<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            MANAGED_VARS.iter().map(|key| (*key, env::var(key).ok())).collect();
        for key in MANAGED_VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let result = body();

        for (key, value) in saved {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
        result
    }

    fn write_file(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("reqflow.toml");
        fs::write(&path, contents).expect("write config file");
        path
    }

    fn load_file(path: PathBuf) -> Result<AppConfig, ConfigError> {
        AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
    }

    #[test]
    fn defaults_point_at_local_api() {
        let dir = TempDir::new().expect("tempdir");
        let config = with_vars(&[], || load_file(dir.path().join("absent.toml"))).expect("defaults");

        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert!(config.api.token.is_none());
        assert!(config.session.storage_path.is_none());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_values_interpolate_environment() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(
            dir.path(),
            r#"
[api]
base_url = "${TEST_REQFLOW_ABSENT:-https://budget.example.edu/api}"
token = "${TEST_REQFLOW_TOKEN}"
"#,
        );

        let config = with_vars(&[("TEST_REQFLOW_TOKEN", "tok-from-env")], || load_file(path))
            .expect("config loads");

        let token = config.api.token.as_ref().map(|token| token.expose_secret());
        assert_eq!(token, Some("tok-from-env"));
        assert_eq!(config.api.base_url, "https://budget.example.edu/api");
    }

    #[test]
    fn interpolation_errors_name_the_problem() {
        let missing = with_vars(&[], || interpolate_env_vars("token = \"${TEST_REQFLOW_ABSENT}\""));
        assert!(matches!(
            missing,
            Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "TEST_REQFLOW_ABSENT"
        ));

        let unterminated = with_vars(&[], || interpolate_env_vars("token = \"${TEST_REQFLOW"));
        assert!(matches!(unterminated, Err(ConfigError::UnterminatedInterpolation)));

        let plain = with_vars(&[], || interpolate_env_vars("cost = \"$5\""));
        assert_eq!(plain.expect("no expressions"), "cost = \"$5\"");
    }

    #[test]
    fn logging_env_aliases_are_supported() {
        let config = with_vars(&[("REQFLOW_LOG_LEVEL", "warn"), ("REQFLOW_LOG_FORMAT", "pretty")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect("config loads");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn precedence_is_defaults_file_env_overrides() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(
            dir.path(),
            r#"
[api]
base_url = "https://from-file.example/api"
timeout_secs = 10

[session]
storage_path = "/tmp/from-file"

[logging]
level = "warn"
"#,
        );

        let config = with_vars(
            &[("REQFLOW_API_TIMEOUT_SECS", "45"), ("REQFLOW_SESSION_STORAGE_PATH", "/tmp/from-env")],
            || {
                AppConfig::load(LoadOptions {
                    config_path: Some(path),
                    overrides: ConfigOverrides {
                        api_base_url: Some("https://from-override.example/api".to_string()),
                        log_level: Some("debug".to_string()),
                        ..ConfigOverrides::default()
                    },
                    ..LoadOptions::default()
                })
            },
        )
        .expect("config loads");

        assert_eq!(config.api.base_url, "https://from-override.example/api");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.api.timeout_secs, 45);
        assert_eq!(config.session.storage_path, Some(PathBuf::from("/tmp/from-env")));
    }

    #[test]
    fn invalid_numeric_env_is_rejected() {
        let result =
            with_vars(&[("REQFLOW_API_TIMEOUT_SECS", "soon")], || AppConfig::load(LoadOptions::default()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "REQFLOW_API_TIMEOUT_SECS"
        ));
    }

    #[test]
    fn validation_names_the_offending_key() {
        let (base_url, timeout, token) = with_vars(&[], || {
            let base_url = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    api_base_url: Some("localhost:8000".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            let timeout = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides { api_timeout_secs: Some(0), ..ConfigOverrides::default() },
                ..LoadOptions::default()
            });
            env::set_var("REQFLOW_API_TOKEN", "   ");
            let token = AppConfig::load(LoadOptions::default());
            (base_url, timeout, token)
        });

        let message = |result: Result<AppConfig, ConfigError>| match result {
            Err(ConfigError::Validation(message)) => message,
            other => panic!("expected validation failure, got {other:?}"),
        };
        assert!(message(base_url).contains("api.base_url"));
        assert!(message(timeout).contains("api.timeout_secs"));
        // Blank env values are ignored rather than rejected.
        assert!(token.is_ok());
    }

    #[test]
    fn required_file_must_exist() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("reqflow.toml");
        let result = with_vars(&[], || {
            AppConfig::load(LoadOptions {
                config_path: Some(missing.clone()),
                require_file: true,
                ..LoadOptions::default()
            })
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(ref path)) if path == &missing));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let config = with_vars(&[("REQFLOW_API_TOKEN", "tok-secret-value")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect("config loads");

        assert!(!format!("{config:?}").contains("tok-secret-value"));
    }
}
