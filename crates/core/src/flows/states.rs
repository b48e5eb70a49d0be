use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::batch::BatchStatus;
use crate::domain::cheque::ChequeStatus;
use crate::domain::requisition::RequisitionStatus;
use crate::domain::EntityRef;

/// Party expected to act once an entity reaches a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Responsibility {
    Creator,
    Submitter,
    Reviewer,
    Approver,
    AccountTeam,
    Signaturee,
    Nobody,
}

impl Responsibility {
    pub fn for_requisition_status(status: RequisitionStatus) -> Self {
        use RequisitionStatus::*;

        match status {
            Draft | ReturnedForRevision | ChangesRequested => Self::Creator,
            ForwardedForSubmission => Self::Submitter,
            Submitted | PendingReview => Self::Reviewer,
            PendingApproval => Self::Approver,
            Approved | AccountConfirmation | AccountConfirmed | PaymentConfirmation => {
                Self::AccountTeam
            }
            SignatureeConfirmation => Self::Signaturee,
            Completed | Rejected | Cancelled => Self::Nobody,
        }
    }

    pub fn for_batch_status(status: BatchStatus) -> Self {
        match status {
            BatchStatus::PendingSignatures | BatchStatus::PartiallyApproved => Self::Signaturee,
            BatchStatus::Completed | BatchStatus::Cancelled => Self::Nobody,
            BatchStatus::Draft
            | BatchStatus::FullyApproved
            | BatchStatus::PaymentProcessing
            | BatchStatus::PaymentConfirmed => Self::AccountTeam,
        }
    }

    pub fn for_cheque_status(status: ChequeStatus) -> Self {
        if status.is_terminal() {
            Self::Nobody
        } else {
            Self::AccountTeam
        }
    }
}

/// A transition that passed every local gate, shaped for the API.
///
/// The server's response, not `to`, decides the entity's next state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionPlan<S, A> {
    pub entity: EntityRef,
    pub action: A,
    pub label: &'static str,
    pub from: S,
    pub to: S,
    pub next_responsible: Responsibility,
    pub payload: Value,
}
