//! HTTP boundary.
//!
//! Every failure the API or the network can produce is turned into an
//! [`ApiError`] here and nowhere else.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use reqflow_core::config::ApiConfig;
use reqflow_core::errors::ApiError;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred.";
const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Relative to the configured base URL, e.g. `requisitions/r-1/submit/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<SecretString>,
    pub correlation_id: String,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
            correlation_id: String::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: HttpMethod::Post, body: Some(body), ..Self::get(path) }
    }

    pub fn with_query(mut self, filters: &BTreeMap<String, String>) -> Self {
        self.query.extend(filters.iter().map(|(key, value)| (key.clone(), value.clone())));
        self
    }

    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[async_trait::async_trait]
pub trait ApiTransport: Send + Sync {
    /// Sends one request. A successful response with an empty body yields
    /// `Value::Null`.
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError>;
}

#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("api base url `{0}` is not an absolute http(s) URL")]
    InvalidBaseUrl(String),
    #[error("failed to initialize HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportBuildError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportBuildError::InvalidBaseUrl(base_url.to_owned()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.to_owned() })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, TransportBuildError> {
        Self::new(&config.base_url, config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let url = self.url(&request.path);
        debug!(
            event_name = "api.request",
            correlation_id = %request.correlation_id,
            method = %request.method,
            path = %request.path,
            "sending api request"
        );

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if !request.correlation_id.is_empty() {
            builder = builder.header(CORRELATION_HEADER, request.correlation_id.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_transport_error)?;

        let outcome = classify_response(status, &body);
        if let Err(error) = &outcome {
            debug!(
                event_name = "api.request_failed",
                correlation_id = %request.correlation_id,
                status,
                error = %error,
                "api request failed"
            );
        }
        outcome
    }
}

/// Failures before a status line arrives. Only a refused connection proves
/// the server never saw the request.
pub fn classify_transport_error(error: reqwest::Error) -> ApiError {
    let outcome_unknown = !(error.is_connect() || error.is_builder());
    let transport_message = error.to_string();
    ApiError::TransientNetwork {
        message: normalize_error_message(None, Some(&transport_message)),
        outcome_unknown,
    }
}

pub fn classify_response(status: u16, body: &str) -> Result<Value, ApiError> {
    let parsed = if body.trim().is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_str::<Value>(body).ok()
    };

    match status {
        200..=299 => match parsed {
            Some(value) => Ok(value),
            None => {
                warn!(event_name = "api.unreadable_success", status, "success response was not JSON");
                Ok(Value::Null)
            }
        },
        401 => Err(ApiError::AuthExpired),
        400..=499 => Err(ApiError::ValidationRejected {
            status,
            message: normalize_error_message(parsed.as_ref(), None),
            fields: field_errors(parsed.as_ref()),
        }),
        _ => Err(ApiError::ServerFault {
            status,
            message: normalize_error_message(parsed.as_ref(), Some(&format!("HTTP {status}"))),
        }),
    }
}

/// The single place an error body becomes a user-facing string: `error`,
/// then `message` or `detail`, then the transport message, then a generic
/// fallback.
pub fn normalize_error_message(body: Option<&Value>, transport_message: Option<&str>) -> String {
    let field = |key: &str| {
        body.and_then(|body| body.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_owned)
    };

    field("error")
        .or_else(|| field("message"))
        .or_else(|| field("detail"))
        .or_else(|| {
            transport_message
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_owned())
}

fn field_errors(body: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    let Some(Value::Object(map)) = body else {
        return BTreeMap::new();
    };

    map.iter()
        .filter(|(key, _)| !matches!(key.as_str(), "error" | "message" | "detail"))
        .filter_map(|(key, value)| {
            let messages: Vec<String> = match value {
                Value::Array(items) => {
                    items.iter().filter_map(Value::as_str).map(str::to_owned).collect()
                }
                Value::String(message) => vec![message.clone()],
                _ => Vec::new(),
            };
            (!messages.is_empty()).then(|| (key.clone(), messages))
        })
        .collect()
}
