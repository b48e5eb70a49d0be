use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchType;
use crate::domain::payee::Payee;
use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionId(pub String);

impl fmt::Display for RequisitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Draft,
    Submitted,
    PendingReview,
    PendingApproval,
    ReturnedForRevision,
    ForwardedForSubmission,
    AccountConfirmation,
    AccountConfirmed,
    SignatureeConfirmation,
    PaymentConfirmation,
    Approved,
    Completed,
    Rejected,
    ChangesRequested,
    Cancelled,
}

impl RequisitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::PendingReview => "pending_review",
            Self::PendingApproval => "pending_approval",
            Self::ReturnedForRevision => "returned_for_revision",
            Self::ForwardedForSubmission => "forwarded_for_submission",
            Self::AccountConfirmation => "account_confirmation",
            Self::AccountConfirmed => "account_confirmed",
            Self::SignatureeConfirmation => "signaturee_confirmation",
            Self::PaymentConfirmation => "payment_confirmation",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::ForwardedForSubmission | Self::ReturnedForRevision)
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Cheque,
    Eft,
    Wire,
    OfficeCreditCard,
}

impl PaymentType {
    /// Instrument a requisition is batched under; card purchases never are.
    pub fn batch_type(self) -> Option<BatchType> {
        match self {
            Self::Cheque => Some(BatchType::Cheque),
            Self::Eft => Some(BatchType::Eft),
            Self::Wire => Some(BatchType::Wire),
            Self::OfficeCreditCard => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: RequisitionStatus,
    #[serde(default)]
    pub completed_by: Option<UserId>,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    pub is_current: bool,
    #[serde(default)]
    pub action_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: RequisitionId,
    pub number: String,
    pub current_status: RequisitionStatus,
    #[serde(default)]
    pub current_assignee: Option<UserId>,
    pub created_by: UserId,
    pub payee: Payee,
    pub total_with_tax: Money,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
}

impl Requisition {
    pub fn current_history_entry(&self) -> Option<&StatusHistoryEntry> {
        self.status_history.iter().find(|entry| entry.is_current)
    }

    /// True once anyone other than the creator has completed a step.
    pub fn acted_on_by_others(&self) -> bool {
        self.status_history.iter().any(|entry| {
            entry.completed_by.as_ref().is_some_and(|completed_by| completed_by != &self.created_by)
        })
    }

    /// An empty history is accepted (list endpoints omit it); otherwise exactly
    /// one entry is current and it matches `current_status`.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.status_history.is_empty() {
            return Ok(());
        }

        let current: Vec<&StatusHistoryEntry> =
            self.status_history.iter().filter(|entry| entry.is_current).collect();
        match current.as_slice() {
            [entry] if entry.status == self.current_status => Ok(()),
            [entry] => Err(DomainError::InvariantViolation(format!(
                "requisition {} is `{}` but its current history entry is `{}`",
                self.id, self.current_status, entry.status
            ))),
            entries => Err(DomainError::InvariantViolation(format!(
                "requisition {} has {} current history entries",
                self.id,
                entries.len()
            ))),
        }
    }
}
