use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::ValueEnum;
use reqflow_client::TracingAuditSink;
use reqflow_core::audit::AuditContext;
use reqflow_core::config::LoadOptions;
use reqflow_core::domain::batch::Batch;
use reqflow_core::domain::cheque::Cheque;
use reqflow_core::domain::requisition::Requisition;
use reqflow_core::domain::user::User;
use reqflow_core::flows::{batch, requisition, ChequeAction, ChequeFlow};
use reqflow_core::flows::{BatchFlow, FlowEngine, LifecycleDefinition, RequisitionFlow};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::{load_config, open_session, read_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EntityArg {
    Requisition,
    Batch,
    Cheque,
}

#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub kind: EntityArg,
    pub entity: PathBuf,
    pub action: Option<String>,
    pub user: Option<PathBuf>,
}

/// Exit code 3 means the action was evaluated and refused.
pub fn run(options: &LoadOptions, args: &CheckArgs) -> CommandResult {
    match evaluate(options, args) {
        Ok(result) => result,
        Err(error) => CommandResult::input_failure("check", &error),
    }
}

fn evaluate(options: &LoadOptions, args: &CheckArgs) -> anyhow::Result<CommandResult> {
    let actor = resolve_actor(options, args.user.as_deref())?;
    let action = args.action.as_deref();

    match args.kind {
        EntityArg::Requisition => {
            check_with(RequisitionFlow, &actor, &args.entity, action, requisition_actions)
        }
        EntityArg::Batch => check_with(BatchFlow, &actor, &args.entity, action, batch_actions),
        EntityArg::Cheque => check_with(ChequeFlow, &actor, &args.entity, action, cheque_actions),
    }
}

fn requisition_actions(user: &User, entity: &Requisition) -> Vec<&'static str> {
    requisition::available_actions(user, entity).into_iter().map(|kind| kind.label()).collect()
}

fn batch_actions(user: &User, entity: &Batch) -> Vec<&'static str> {
    batch::available_actions(user, entity).into_iter().map(|kind| kind.label()).collect()
}

/// Cheques have no action table; evaluate each action against the flow instead.
fn cheque_actions(user: &User, entity: &Cheque) -> Vec<&'static str> {
    let candidates = [
        ChequeAction::MarkPending,
        ChequeAction::MarkPrinted,
        ChequeAction::MarkSigned,
        ChequeAction::MarkDistributed,
        ChequeAction::MarkCashed,
        ChequeAction::Void { reason: "listing".to_owned() },
    ];
    candidates
        .iter()
        .filter(|action| ChequeFlow.evaluate(user, entity, action).is_ok())
        .map(ChequeAction::label)
        .collect()
}

fn resolve_actor(options: &LoadOptions, user_path: Option<&Path>) -> anyhow::Result<User> {
    if let Some(path) = user_path {
        return read_json(path);
    }

    let config = load_config(options).context("loading config to find the stored session")?;
    match open_session(&config).load().user() {
        Some(user) => Ok(user.clone()),
        None => bail!("no stored session; pass --user with a user JSON file"),
    }
}

fn check_with<F>(
    flow: F,
    actor: &User,
    entity_path: &Path,
    action: Option<&str>,
    available: fn(&User, &F::Entity) -> Vec<&'static str>,
) -> anyhow::Result<CommandResult>
where
    F: LifecycleDefinition,
    F::Entity: DeserializeOwned,
    F::Status: Serialize,
    F::Action: DeserializeOwned,
{
    let entity: F::Entity = read_json(entity_path)?;
    let status = flow.status(&entity);

    let Some(raw_action) = action else {
        let actions = available(actor, &entity);
        return Ok(CommandResult::success_with(
            "check",
            format!("{} action(s) available to {} in status {status}", actions.len(), actor.id),
            Some(json!({ "status": status, "available": actions })),
        ));
    };

    let action: F::Action = serde_json::from_str(raw_action).context("parsing --action")?;
    let engine = FlowEngine::new(flow);
    let context = AuditContext::new(None, "cli-check", actor.id.to_string());

    match engine.evaluate_with_audit(actor, &entity, &action, &TracingAuditSink, &context) {
        Ok(plan) => Ok(CommandResult::success_with(
            "check",
            format!("{} is allowed: {} -> {}", plan.label, plan.from, plan.to),
            Some(serde_json::to_value(&plan).context("serializing transition plan")?),
        )),
        Err(violation) => {
            Ok(CommandResult::failure("check", "policy_violation", violation.to_string(), 3))
        }
    }
}
