use chrono::{DateTime, Utc};
use reqflow_core::domain::batch::{BatchId, SignatureStatus};
use reqflow_core::domain::user::User;
use reqflow_core::flows::{
    BatchAction, BatchFlow, ChequeAction, ChequeFlow, LifecycleDefinition, RequisitionAction,
    RequisitionFlow,
};
use serde::{Deserialize, Serialize};

pub const LOGIN: &str = "auth/login/";
pub const LOGOUT: &str = "auth/logout/";
pub const PROFILE: &str = "auth/profile/";
pub const REQUISITIONS: &str = "requisitions/";
pub const BATCHES: &str = "batches/";
pub const CHEQUE_PREVIEW_GROUPS: &str = "cheques/preview-groups/";
pub const CHEQUE_GENERATE: &str = "cheques/generate/";
pub const CHEQUE_DRAFTS: &str = "cheques/drafts/";
pub const SIGNATURES_PENDING: &str = "signatures/my-pending/";
pub const SIGNATURES_HISTORY: &str = "signatures/my-history/";
pub const SIGNATURES_BULK_APPROVE: &str = "signatures/bulk-approve/";

/// Where a lifecycle's entities and per-transition action endpoints live.
pub trait EndpointMap: LifecycleDefinition {
    fn detail_path(id: &str) -> String;
    fn action_path(id: &str, action: &Self::Action) -> String;
}

impl EndpointMap for RequisitionFlow {
    fn detail_path(id: &str) -> String {
        format!("{REQUISITIONS}{id}/")
    }

    fn action_path(id: &str, action: &RequisitionAction) -> String {
        let segment = match action {
            RequisitionAction::Submit { .. } => "submit",
            RequisitionAction::ForwardForSubmission { .. } => "forward",
            // Both review outcomes share one endpoint; the payload carries the decision.
            RequisitionAction::ForwardToApproval { .. }
            | RequisitionAction::ReturnForRevision { .. } => "review",
            RequisitionAction::Approve { .. } => "approve",
            RequisitionAction::Reject { .. } => "reject",
            RequisitionAction::RequestChanges { .. } => "request-changes",
            RequisitionAction::ConfirmAccount { .. } => "confirm-account",
            RequisitionAction::Sign { .. } => "sign",
            RequisitionAction::RejectSignature { .. } => "reject-signature",
            RequisitionAction::ConfirmPayment { .. } => "confirm-payment",
            RequisitionAction::Recall { .. } => "cancel",
        };
        format!("{REQUISITIONS}{id}/{segment}/")
    }
}

impl EndpointMap for BatchFlow {
    fn detail_path(id: &str) -> String {
        format!("{BATCHES}{id}/")
    }

    fn action_path(id: &str, action: &BatchAction) -> String {
        let segment = match action {
            BatchAction::SendForSignatures => "send-for-signatures",
            BatchAction::ApproveSignature { .. } => "approve",
            BatchAction::RejectSignature { .. } => "reject",
            BatchAction::AddRequisitions { .. } => "add-requisitions",
            BatchAction::RemoveRequisition { .. } => "remove-requisition",
            BatchAction::Cancel { .. } => "cancel",
            BatchAction::StartPaymentProcessing => "start-processing",
            BatchAction::ConfirmPayment => "confirm-payment",
            BatchAction::Complete => "complete",
        };
        format!("{BATCHES}{id}/{segment}/")
    }
}

impl EndpointMap for ChequeFlow {
    fn detail_path(id: &str) -> String {
        format!("cheques/{id}/")
    }

    fn action_path(id: &str, action: &ChequeAction) -> String {
        let segment = match action {
            ChequeAction::MarkPending => "mark-pending",
            ChequeAction::MarkPrinted => "mark-printed",
            ChequeAction::MarkSigned => "mark-signed",
            ChequeAction::MarkDistributed => "mark-distributed",
            ChequeAction::MarkCashed => "mark-cashed",
            ChequeAction::Void { .. } => "void",
        };
        format!("cheques/{id}/{segment}/")
    }
}

/// List endpoints answer either with a bare array or a paginated envelope.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> ListEnvelope<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Plain(items) | Self::Paged { results: items } => items,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access", alias = "key")]
    pub token: String,
    pub user: User,
}

/// One entry of the signed-in signaturee's approval history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub batch_id: BatchId,
    #[serde(default)]
    pub batch_number: Option<String>,
    pub status: SignatureStatus,
    #[serde(default)]
    pub acted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: Option<String>,
}
