use std::path::Path;

use reqflow_client::endpoints::ListEnvelope;
use reqflow_core::domain::requisition::{Requisition, RequisitionId};
use reqflow_core::flows::cheque::group_by_payee;
use reqflow_core::flows::ChequeCandidate;
use serde_json::json;

use super::{read_json, CommandResult};

/// Previews cheque groups for a selection. An empty selection means every
/// requisition in the file.
pub fn run(requisitions_path: &Path, select: &[String]) -> CommandResult {
    let requisitions = match read_json::<ListEnvelope<Requisition>>(requisitions_path) {
        Ok(envelope) => envelope.into_vec(),
        Err(error) => return CommandResult::input_failure("cheques", &error),
    };

    let candidates: Vec<ChequeCandidate> = requisitions.iter().map(ChequeCandidate::from).collect();
    let selected: Vec<RequisitionId> = if select.is_empty() {
        requisitions.iter().map(|requisition| requisition.id.clone()).collect()
    } else {
        select.iter().map(|id| RequisitionId(id.trim().to_owned())).collect()
    };

    match group_by_payee(&candidates, &selected) {
        Ok(groups) => {
            let cheque_count = groups.len();
            let requisition_count: usize = groups.iter().map(|group| group.requisition_count).sum();
            CommandResult::success_with(
                "cheques",
                format!("{requisition_count} requisition(s) grouped into {cheque_count} cheque(s)"),
                Some(json!({ "groups": groups })),
            )
        }
        Err(violation) => CommandResult::failure("cheques", "policy_violation", violation.to_string(), 3),
    }
}
