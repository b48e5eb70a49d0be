pub mod check;
pub mod cheques;
pub mod config;
pub mod doctor;
pub mod route;
pub mod session;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use reqflow_core::config::{AppConfig, ConfigError, LoadOptions};
use reqflow_core::session::{FileSessionStorage, SessionStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Used when neither the config file nor the environment names a session directory.
pub const DEFAULT_SESSION_DIR: &str = ".reqflow/session";

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn config_failure(command: &str, error: &ConfigError) -> Self {
        Self::failure(command, "config_validation", error.to_string(), 2)
    }

    pub fn input_failure(command: &str, error: &anyhow::Error) -> Self {
        Self::failure(command, "invalid_input", format!("{error:#}"), 4)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub fn session_dir(config: &AppConfig) -> PathBuf {
    config.session.storage_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_DIR))
}

pub fn open_session(config: &AppConfig) -> SessionStore<FileSessionStorage> {
    SessionStore::new(FileSessionStorage::new(session_dir(config)))
}

pub fn load_config(options: &LoadOptions) -> Result<AppConfig, ConfigError> {
    AppConfig::load(options.clone())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading `{}`", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing `{}`", path.display()))
}
