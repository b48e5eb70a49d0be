use reqflow_core::config::LoadOptions;
use reqflow_core::session::{SessionEvent, SessionState};
use serde_json::json;

use super::{load_config, open_session, session_dir, CommandResult};

pub fn run(options: &LoadOptions, clear: bool) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("session", &error),
    };

    let store = open_session(&config);
    let mut events = store.subscribe();
    let state = store.load();
    let storage = session_dir(&config).display().to_string();

    let discarded = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|event| match event {
            SessionEvent::StorageDiscarded { reason } => Some(reason),
            _ => None,
        })
        .last();

    if clear {
        store.logout();
        return CommandResult::success("session", format!("cleared stored session in `{storage}`"));
    }

    let message = match (&state, &discarded) {
        (_, Some(reason)) => format!("stored session discarded: {reason}"),
        (SessionState::Authenticated(session), None) => {
            format!("signed in as {} ({})", session.user.display_name, session.user.id)
        }
        _ => "no stored session".to_string(),
    };

    let user = state.user().map(|user| {
        json!({
            "id": user.id,
            "display_name": user.display_name,
            "roles": user.roles.iter().map(|assignment| assignment.role).collect::<Vec<_>>(),
            "can_approve": user.can_approve,
            "signaturee_authority": user.signaturee_authority,
        })
    });

    CommandResult::success_with(
        "session",
        message,
        Some(json!({
            "state": state.label(),
            "storage": storage,
            "user": user,
            "discarded": discarded,
        })),
    )
}
