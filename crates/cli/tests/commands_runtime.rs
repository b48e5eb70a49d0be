use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use reqflow_cli::commands::check::{self, CheckArgs, EntityArg};
use reqflow_cli::commands::{cheques, config, doctor, route, session};
use reqflow_core::config::{ConfigOverrides, LoadOptions};
use serde_json::{json, Value};
use tempfile::TempDir;

#[test]
fn config_reports_env_sources_and_redacts_token() {
    with_env(
        &[
            ("REQFLOW_API_BASE_URL", "https://api.example.test"),
            ("REQFLOW_API_TOKEN", "9f8e7d6c5b4a3210"),
        ],
        || {
            let result = config::run(&LoadOptions::default());
            assert_eq!(result.exit_code, 0);
            assert!(result.output.contains(
                "- api.base_url = https://api.example.test (source: env (REQFLOW_API_BASE_URL))"
            ));
            assert!(result
                .output
                .contains("- api.token = 9f8e*** (source: env (REQFLOW_API_TOKEN))"));
            assert!(result.output.contains("- api.timeout_secs = 30 (source: default)"));
            assert!(!result.output.contains("9f8e7d6c5b4a3210"));
        },
    );
}

#[test]
fn config_flag_override_beats_env() {
    with_env(&[("REQFLOW_API_BASE_URL", "https://env.example.test")], || {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                api_base_url: Some("https://flag.example.test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        let result = config::run(&options);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains(
            "- api.base_url = https://flag.example.test (source: flag (--api-base-url))"
        ));
    });
}

#[test]
fn config_returns_validation_failure_for_bad_env() {
    with_env(&[("REQFLOW_API_TIMEOUT_SECS", "soon")], || {
        let result = config::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[("REQFLOW_API_BASE_URL", "ftp://files.example.test")], || {
        let report = parse_payload(&doctor::run(&LoadOptions::default(), true));
        assert_eq!(report["overall_status"], "fail");

        let checks = report["checks"].as_array().expect("checks array");
        let statuses: Vec<(&str, &str)> = checks
            .iter()
            .map(|check| {
                (check["name"].as_str().unwrap_or(""), check["status"].as_str().unwrap_or(""))
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("config_validation", "fail"),
                ("session_storage", "skipped"),
                ("api_reachability", "skipped"),
            ]
        );
    });
}

#[test]
fn doctor_human_output_lists_every_check() {
    with_env(&[("REQFLOW_API_TIMEOUT_SECS", "0")], || {
        let output = doctor::run(&LoadOptions::default(), false);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] session_storage:"));
        assert!(output.contains("- [skip] api_reachability:"));
    });
}

#[test]
fn session_without_stored_files_is_signed_out() {
    let dir = TempDir::new().expect("tempdir");
    with_session_dir(dir.path(), || {
        let result = session::run(&LoadOptions::default(), false);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["message"], "no stored session");
        assert_eq!(payload["data"]["state"], "unauthenticated");
        assert_eq!(payload["data"]["user"], Value::Null);
    });
}

#[test]
fn session_discards_unreadable_storage() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("auth_token.json"), "tok-123").expect("write token");
    fs::write(dir.path().join("auth_user.json"), "{not json").expect("write user");

    with_session_dir(dir.path(), || {
        let payload = parse_payload(&session::run(&LoadOptions::default(), false).output);
        assert_eq!(payload["data"]["state"], "unauthenticated");
        assert!(payload["data"]["discarded"].as_str().is_some_and(|reason| !reason.is_empty()));
    });

    assert!(!dir.path().join("auth_token.json").exists());
    assert!(!dir.path().join("auth_user.json").exists());
}

#[test]
fn session_restores_then_clears_stored_user() {
    let dir = TempDir::new().expect("tempdir");
    store_session(dir.path(), &user_json("u-1", &["account"], false, None));

    with_session_dir(dir.path(), || {
        let payload = parse_payload(&session::run(&LoadOptions::default(), false).output);
        assert_eq!(payload["data"]["state"], "authenticated");
        assert_eq!(payload["data"]["user"]["id"], "u-1");
        assert_eq!(payload["data"]["user"]["roles"], json!(["account"]));

        let cleared = session::run(&LoadOptions::default(), true);
        assert_eq!(cleared.exit_code, 0);
    });

    assert!(!dir.path().join("auth_token.json").exists());
}

#[test]
fn route_sends_signed_out_visitor_to_login() {
    let dir = TempDir::new().expect("tempdir");
    with_session_dir(dir.path(), || {
        let payload =
            parse_payload(&route::run(&LoadOptions::default(), "/batches", None).output);
        assert_eq!(payload["data"]["session"], "unauthenticated");
        assert_eq!(
            payload["data"]["decision"],
            json!({ "decision": "redirect", "to": "/login", "return_to": "/batches" })
        );
    });
}

#[test]
fn route_renders_and_denies_by_role() {
    let dir = TempDir::new().expect("tempdir");
    store_session(dir.path(), &user_json("u-1", &["account"], false, None));

    with_session_dir(dir.path(), || {
        let batch = parse_payload(&route::run(&LoadOptions::default(), "/batches/b-7", None).output);
        assert_eq!(
            batch["data"]["decision"],
            json!({ "decision": "render", "view": "batch_detail", "id": "b-7" })
        );

        let approvals =
            parse_payload(&route::run(&LoadOptions::default(), "/approvals", None).output);
        assert_eq!(approvals["data"]["decision"]["decision"], "redirect");
        assert_ne!(approvals["data"]["decision"]["to"], "/approvals");
    });
}

#[test]
fn cheques_groups_selection_by_payee() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_json(
        dir.path(),
        "ready.json",
        &json!([
            requisition_json("r-1", "approved", None, "10.00", vendor("v-1")),
            requisition_json("r-2", "account_confirmed", None, "0.15", vendor("v-1")),
            requisition_json("r-3", "approved", None, "5.00", employee("e-1")),
        ]),
    );

    let result = cheques::run(&path, &[]);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["message"], "3 requisition(s) grouped into 2 cheque(s)");
    let groups = payload["data"]["groups"].as_array().expect("groups");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["total"], "10.15");
    assert_eq!(groups[0]["requisition_count"], 2);
    assert_eq!(groups[0]["requisition_ids"], json!(["r-1", "r-2"]));
    assert_eq!(groups[1]["total"], "5.00");
}

#[test]
fn cheques_rejects_unknown_selection() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_json(
        dir.path(),
        "ready.json",
        &json!({ "count": 1, "results": [requisition_json("r-1", "approved", None, "10.00", vendor("v-1"))] }),
    );

    let result = cheques::run(&path, &["r-1".to_string(), "r-404".to_string()]);
    assert_eq!(result.exit_code, 3);
    assert_eq!(parse_payload(&result.output)["error_class"], "policy_violation");
}

#[test]
fn check_enforces_approval_threshold_inclusively() {
    let dir = TempDir::new().expect("tempdir");
    let approver = write_json(
        dir.path(),
        "approver.json",
        &user_json("u-7", &["manager"], true, Some("500.00")),
    );
    let at_limit = write_json(
        dir.path(),
        "at-limit.json",
        &requisition_json("r-1", "pending_approval", Some("u-7"), "500.00", vendor("v-1")),
    );
    let over = write_json(
        dir.path(),
        "over.json",
        &requisition_json("r-2", "pending_approval", Some("u-7"), "500.01", vendor("v-1")),
    );

    let allowed = check::run(
        &LoadOptions::default(),
        &check_args(EntityArg::Requisition, at_limit, Some(r#"{"action":"approve"}"#), &approver),
    );
    assert_eq!(allowed.exit_code, 0, "{}", allowed.output);
    let payload = parse_payload(&allowed.output);
    assert_eq!(payload["data"]["label"], "approve");
    assert_eq!(payload["data"]["from"], "pending_approval");

    let refused = check::run(
        &LoadOptions::default(),
        &check_args(EntityArg::Requisition, over, Some(r#"{"action":"approve"}"#), &approver),
    );
    assert_eq!(refused.exit_code, 3);
    assert_eq!(parse_payload(&refused.output)["error_class"], "policy_violation");
}

#[test]
fn check_without_action_lists_available_actions() {
    let dir = TempDir::new().expect("tempdir");
    let approver =
        write_json(dir.path(), "approver.json", &user_json("u-7", &["manager"], true, None));
    let pending = write_json(
        dir.path(),
        "pending.json",
        &requisition_json("r-1", "pending_approval", Some("u-7"), "80.00", vendor("v-1")),
    );

    let result = check::run(
        &LoadOptions::default(),
        &check_args(EntityArg::Requisition, pending, None, &approver),
    );
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["data"]["status"], "pending_approval");
    let available = payload["data"]["available"].as_array().expect("available");
    assert!(available.contains(&json!("approve")));
    assert!(available.contains(&json!("reject")));
    assert!(!available.contains(&json!("submit")));
}

#[test]
fn check_needs_an_actor() {
    let dir = TempDir::new().expect("tempdir");
    let entity = write_json(
        dir.path(),
        "draft.json",
        &requisition_json("r-1", "draft", Some("creator"), "10.00", vendor("v-1")),
    );

    with_session_dir(&dir.path().join("empty-session"), || {
        let result = check::run(
            &LoadOptions::default(),
            &CheckArgs { kind: EntityArg::Requisition, entity, action: None, user: None },
        );
        assert_eq!(result.exit_code, 4);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

fn check_args(kind: EntityArg, entity: PathBuf, action: Option<&str>, user: &Path) -> CheckArgs {
    CheckArgs {
        kind,
        entity,
        action: action.map(str::to_owned),
        user: Some(user.to_path_buf()),
    }
}

fn vendor(id: &str) -> Value {
    json!({ "payee_type": "vendor", "payee_id": id, "vendor_name": "Acme Office" })
}

fn employee(id: &str) -> Value {
    json!({ "payee_type": "employee", "payee_id": id, "first_name": "Sam", "last_name": "Ortiz" })
}

fn requisition_json(
    id: &str,
    status: &str,
    assignee: Option<&str>,
    total: &str,
    payee: Value,
) -> Value {
    json!({
        "id": id,
        "number": format!("REQ-{id}"),
        "current_status": status,
        "current_assignee": assignee,
        "created_by": "creator",
        "payee": payee,
        "total_with_tax": total,
        "payment_type": "cheque",
        "status_history": [{ "status": status, "is_current": true }],
    })
}

fn user_json(id: &str, roles: &[&str], can_approve: bool, approval_limit: Option<&str>) -> Value {
    json!({
        "id": id,
        "display_name": format!("User {id}"),
        "roles": roles.iter().map(|role| json!({ "role": role })).collect::<Vec<_>>(),
        "can_approve": can_approve,
        "max_approval_threshold": approval_limit,
    })
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, value.to_string()).expect("write fixture");
    path
}

fn store_session(dir: &Path, user: &Value) {
    fs::write(dir.join("auth_token.json"), "tok-123").expect("write token");
    fs::write(dir.join("auth_user.json"), user.to_string()).expect("write user");
}

fn with_session_dir(dir: &Path, test_fn: impl FnOnce()) {
    let dir = dir.display().to_string();
    with_env(&[("REQFLOW_SESSION_STORAGE_PATH", dir.as_str())], test_fn);
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|p| p.into_inner());

    let keys = [
        "REQFLOW_API_BASE_URL",
        "REQFLOW_API_TIMEOUT_SECS",
        "REQFLOW_API_TOKEN",
        "REQFLOW_SESSION_STORAGE_PATH",
        "REQFLOW_LOGGING_LEVEL",
        "REQFLOW_LOGGING_FORMAT",
        "REQFLOW_LOG_LEVEL",
        "REQFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
