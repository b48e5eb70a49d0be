use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use reqflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use super::{load_config, CommandResult, DEFAULT_SESSION_DIR};

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    flag: Option<&'static str>,
    value: String,
    overridden: bool,
}

fn field(
    key: &'static str,
    env_keys: &'static [&'static str],
    flag: Option<&'static str>,
    value: String,
    overridden: bool,
) -> Field {
    Field { key, env_keys, flag, value, overridden }
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("config", &error),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in fields(&config, options) {
        let source = field_source(&field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig, options: &LoadOptions) -> Vec<Field> {
    let overrides = &options.overrides;

    let token = match config.api.token.as_ref() {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };
    let storage_path = match config.session.storage_path.as_ref() {
        Some(path) => path.display().to_string(),
        None => format!("<unset> (using {DEFAULT_SESSION_DIR})"),
    };

    vec![
        field(
            "api.base_url",
            &["REQFLOW_API_BASE_URL"],
            Some("--api-base-url"),
            config.api.base_url.clone(),
            overrides.api_base_url.is_some(),
        ),
        field(
            "api.timeout_secs",
            &["REQFLOW_API_TIMEOUT_SECS"],
            None,
            config.api.timeout_secs.to_string(),
            overrides.api_timeout_secs.is_some(),
        ),
        field("api.token", &["REQFLOW_API_TOKEN"], None, token, false),
        field(
            "session.storage_path",
            &["REQFLOW_SESSION_STORAGE_PATH"],
            Some("--session-dir"),
            storage_path,
            overrides.session_storage_path.is_some(),
        ),
        field(
            "logging.level",
            &["REQFLOW_LOGGING_LEVEL", "REQFLOW_LOG_LEVEL"],
            None,
            config.logging.level.clone(),
            overrides.log_level.is_some(),
        ),
        field(
            "logging.format",
            &["REQFLOW_LOGGING_FORMAT", "REQFLOW_LOG_FORMAT"],
            None,
            format!("{:?}", config.logging.format),
            overrides.log_format.is_some(),
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("reqflow.toml"), PathBuf::from("config/reqflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if field.overridden {
        return match field.flag {
            Some(flag) => format!("flag ({flag})"),
            None => "flag".to_string(),
        };
    }

    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps only enough of a bearer token to tell two apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.char_indices().nth(4) {
        Some((cut, _)) if trimmed.chars().count() > 8 => format!("{}***", &trimmed[..cut]),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact_token;

    #[test]
    fn short_tokens_are_fully_hidden() {
        assert_eq!(redact_token("abc"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn long_tokens_keep_a_prefix() {
        assert_eq!(redact_token("9f8e7d6c5b4a"), "9f8e***");
    }
}
