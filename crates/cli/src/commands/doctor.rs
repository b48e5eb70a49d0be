use reqflow_client::endpoints::PROFILE;
use reqflow_client::transport::{ApiRequest, ApiTransport, HttpTransport};
use reqflow_core::config::{AppConfig, LoadOptions};
use reqflow_core::errors::ApiError;
use reqflow_core::session::{SessionEvent, SessionState};
use serde::Serialize;

use super::{load_config, open_session, session_dir};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: &LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match load_config(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            let (storage_check, stored) = check_session_storage(&config);
            checks.push(storage_check);
            checks.push(check_api_reachability(&config, stored));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["session_storage", "api_reachability"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Restoring never fails outright: unreadable storage is discarded and the
/// session comes back signed out, which the check reports.
fn check_session_storage(config: &AppConfig) -> (DoctorCheck, SessionState) {
    let store = open_session(config);
    let mut events = store.subscribe();
    let state = store.load();
    let dir = session_dir(config);

    let mut discarded = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StorageDiscarded { reason } = event {
            discarded = Some(reason);
        }
    }

    let check = match discarded {
        Some(reason) => DoctorCheck {
            name: "session_storage",
            status: CheckStatus::Fail,
            details: format!("stored session in `{}` was discarded: {reason}", dir.display()),
        },
        None => DoctorCheck {
            name: "session_storage",
            status: CheckStatus::Pass,
            details: format!("`{}` restored as {}", dir.display(), state.label()),
        },
    };
    (check, state)
}

fn check_api_reachability(config: &AppConfig, stored: SessionState) -> DoctorCheck {
    let transport = match HttpTransport::from_config(&config.api) {
        Ok(transport) => transport,
        Err(error) => {
            return DoctorCheck {
                name: "api_reachability",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "api_reachability",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let bearer = match stored {
        SessionState::Authenticated(session) => Some(session.token),
        _ => config.api.token.clone(),
    };
    let mut request = ApiRequest::get(PROFILE);
    if let Some(token) = bearer {
        request = request.with_bearer(token);
    }

    let base_url = transport.base_url().to_string();
    match runtime.block_on(transport.send(request)) {
        Ok(_) => DoctorCheck {
            name: "api_reachability",
            status: CheckStatus::Pass,
            details: format!("`{base_url}` answered the profile request"),
        },
        // Any client-side rejection still proves the API is up.
        Err(ApiError::AuthExpired | ApiError::ValidationRejected { .. }) => DoctorCheck {
            name: "api_reachability",
            status: CheckStatus::Pass,
            details: format!("`{base_url}` is reachable (credentials not accepted)"),
        },
        Err(error) => DoctorCheck {
            name: "api_reachability",
            status: CheckStatus::Fail,
            details: format!("`{base_url}`: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
