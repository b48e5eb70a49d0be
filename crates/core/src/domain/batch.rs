use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cheque::ChequeId;
use crate::domain::requisition::RequisitionId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Cheque,
    Eft,
    Wire,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Draft,
    PendingSignatures,
    PartiallyApproved,
    FullyApproved,
    PaymentProcessing,
    PaymentConfirmed,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSignatures => "pending_signatures",
            Self::PartiallyApproved => "partially_approved",
            Self::FullyApproved => "fully_approved",
            Self::PaymentProcessing => "payment_processing",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn awaiting_signatures(self) -> bool {
        matches!(self, Self::PendingSignatures | Self::PartiallyApproved)
    }

    pub fn accepts_additions(self) -> bool {
        matches!(self, Self::Draft)
    }

    pub fn accepts_removals(self) -> bool {
        matches!(self, Self::Draft | Self::PendingSignatures)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Notified,
    Approved,
    Skipped,
}

impl SignatureStatus {
    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::Notified)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSignaturee {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    pub priority: u32,
    pub status: SignatureStatus,
    #[serde(default)]
    pub acted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequisition {
    pub requisition_id: RequisitionId,
    pub is_active: bool,
    #[serde(default)]
    pub assigned_cheque: Option<ChequeId>,
    #[serde(default)]
    pub added_by: Option<UserId>,
    #[serde(default)]
    pub removed_by: Option<UserId>,
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub removal_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub number: String,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub created_by: UserId,
    #[serde(default)]
    pub signaturees: Vec<BatchSignaturee>,
    #[serde(default)]
    pub batch_requisitions: Vec<BatchRequisition>,
    pub required_signatures: u32,
    #[serde(default)]
    pub approved_signatures: u32,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl Batch {
    pub fn active_requisitions(&self) -> impl Iterator<Item = &BatchRequisition> + '_ {
        self.batch_requisitions.iter().filter(|member| member.is_active)
    }

    pub fn requisition_count(&self) -> usize {
        self.active_requisitions().count()
    }

    pub fn contains_active(&self, requisition_id: &RequisitionId) -> bool {
        self.active_requisitions().any(|member| &member.requisition_id == requisition_id)
    }

    pub fn signaturee(&self, user_id: &UserId) -> Option<&BatchSignaturee> {
        self.signaturees.iter().find(|signaturee| &signaturee.user_id == user_id)
    }

    /// Approvals recorded on the signaturee list itself.
    pub fn counted_approvals(&self) -> u32 {
        let approved = self
            .signaturees
            .iter()
            .filter(|signaturee| signaturee.status == SignatureStatus::Approved)
            .count();
        u32::try_from(approved).unwrap_or(u32::MAX)
    }

    pub fn signaturees_in_priority_order(&self) -> Vec<&BatchSignaturee> {
        let mut ordered: Vec<&BatchSignaturee> = self.signaturees.iter().collect();
        ordered.sort_by(|left, right| {
            left.priority.cmp(&right.priority).then_with(|| left.user_id.cmp(&right.user_id))
        });
        ordered
    }

    /// Lowest-priority signaturee still outstanding. Display only: approvals
    /// out of this order are not blocked client-side.
    pub fn next_expected_signaturee(&self) -> Option<&BatchSignaturee> {
        self.signaturees_in_priority_order()
            .into_iter()
            .find(|signaturee| signaturee.status.is_outstanding())
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let counted = self.counted_approvals();
        if self.approved_signatures != counted {
            return Err(DomainError::InvariantViolation(format!(
                "batch {} reports {} approved signatures but {} signaturees approved",
                self.id, self.approved_signatures, counted
            )));
        }

        if self.status == BatchStatus::FullyApproved
            && self.approved_signatures < self.required_signatures
        {
            return Err(DomainError::InvariantViolation(format!(
                "batch {} is fully approved with {}/{} signatures",
                self.id, self.approved_signatures, self.required_signatures
            )));
        }

        Ok(())
    }
}
