use reqflow_core::config::LoadOptions;
use reqflow_core::routes::{guard, RouteDecision};
use serde_json::json;

use super::{load_config, open_session, CommandResult};

pub fn run(options: &LoadOptions, location: &str, return_to: Option<&str>) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("route", &error),
    };

    let state = open_session(&config).load();
    let decision = guard(&state, location, return_to);

    let message = match &decision {
        RouteDecision::Loading => "session still resolving".to_string(),
        RouteDecision::Render(route) => match &route.id {
            Some(id) => format!("render {:?} for `{id}`", route.view),
            None => format!("render {:?}", route.view),
        },
        RouteDecision::Redirect { to, return_to: Some(back) } => {
            format!("redirect to {to} (return to {back})")
        }
        RouteDecision::Redirect { to, return_to: None } => format!("redirect to {to}"),
    };

    CommandResult::success_with(
        "route",
        message,
        Some(json!({
            "location": location,
            "session": state.label(),
            "decision": decision,
        })),
    )
}
