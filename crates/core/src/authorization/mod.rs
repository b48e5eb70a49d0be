//! Authorization gate.
//!
//! Every role, permission, threshold and assignee check used by the
//! lifecycle machines and the route guard lives here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::batch::Batch;
use crate::domain::requisition::Requisition;
use crate::domain::user::{Role, Threshold, User, UserId};
use crate::errors::{PolicyViolation, ThresholdKind};
use crate::money::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SubmitRequisitions,
    ReviewRequisitions,
    ApproveRequisitions,
    ConfirmAccounts,
    ManageBatches,
    SignBatches,
    ManageCheques,
    ManageUsers,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitRequisitions => "submit_requisitions",
            Self::ReviewRequisitions => "review_requisitions",
            Self::ApproveRequisitions => "approve_requisitions",
            Self::ConfirmAccounts => "confirm_accounts",
            Self::ManageBatches => "manage_batches",
            Self::SignBatches => "sign_batches",
            Self::ManageCheques => "manage_cheques",
            Self::ManageUsers => "manage_users",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user flags that sit outside the role model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Approve,
    SignatureeAuthority,
}

impl Role {
    pub fn permissions(self) -> &'static [Permission] {
        use Permission::*;

        match self {
            Self::Staff => &[SubmitRequisitions],
            Self::Reviewer => &[SubmitRequisitions, ReviewRequisitions],
            Self::Manager => &[SubmitRequisitions, ReviewRequisitions, ApproveRequisitions],
            Self::Account => &[SubmitRequisitions, ConfirmAccounts, ManageBatches, ManageCheques],
            Self::Signaturee => &[SignBatches],
            Self::Administrator => &[
                SubmitRequisitions,
                ReviewRequisitions,
                ApproveRequisitions,
                ConfirmAccounts,
                ManageBatches,
                SignBatches,
                ManageCheques,
                ManageUsers,
            ],
            Self::Unrecognized => &[],
        }
    }
}

/// Outcome of a threshold comparison. `Unlimited` is kept distinct from a
/// passing limit so callers can tell "no ceiling" apart from "under the ceiling".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdCheck {
    Unlimited,
    WithinLimit { limit: Money },
    Exceeded { limit: Money },
}

impl ThresholdCheck {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Exceeded { .. })
    }
}

impl Threshold {
    pub fn check(self, amount: Money) -> ThresholdCheck {
        match self {
            Self::Unlimited => ThresholdCheck::Unlimited,
            Self::Limit(limit) if amount <= limit => ThresholdCheck::WithinLimit { limit },
            Self::Limit(limit) => ThresholdCheck::Exceeded { limit },
        }
    }
}

pub trait Assignable {
    fn current_assignee(&self) -> Option<&UserId>;
}

pub trait Authored {
    fn created_by(&self) -> &UserId;
}

impl Assignable for Requisition {
    fn current_assignee(&self) -> Option<&UserId> {
        self.current_assignee.as_ref()
    }
}

impl Authored for Requisition {
    fn created_by(&self) -> &UserId {
        &self.created_by
    }
}

impl Authored for Batch {
    fn created_by(&self) -> &UserId {
        &self.created_by
    }
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|assignment| assignment.role == role)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.roles.iter().any(|assignment| assignment.role.permissions().contains(&permission))
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::Approve => self.can_approve,
            Capability::SignatureeAuthority => self.signaturee_authority,
        }
    }

    pub fn submission_check(&self, amount: Money) -> ThresholdCheck {
        self.max_submission_threshold.check(amount)
    }

    pub fn approval_check(&self, amount: Money) -> ThresholdCheck {
        self.max_approval_threshold.check(amount)
    }

    pub fn can_submit_amount(&self, amount: Money) -> bool {
        self.submission_check(amount).is_allowed()
    }

    pub fn can_approve_amount(&self, amount: Money) -> bool {
        self.approval_check(amount).is_allowed()
    }
}

pub fn is_assignee<E>(entity: &E, user: &User) -> bool
where
    E: Assignable + ?Sized,
{
    entity.current_assignee().is_some_and(|assignee| assignee == &user.id)
}

pub fn is_creator<E>(entity: &E, user: &User) -> bool
where
    E: Authored + ?Sized,
{
    entity.created_by() == &user.id
}

pub(crate) fn require_assignee<E>(
    entity: &E,
    user: &User,
    action: &'static str,
) -> Result<(), PolicyViolation>
where
    E: Assignable + ?Sized,
{
    if is_assignee(entity, user) {
        Ok(())
    } else {
        Err(PolicyViolation::NotAssignee { action })
    }
}

pub(crate) fn require_creator<E>(
    entity: &E,
    user: &User,
    action: &'static str,
) -> Result<(), PolicyViolation>
where
    E: Authored + ?Sized,
{
    if is_creator(entity, user) {
        Ok(())
    } else {
        Err(PolicyViolation::NotCreator { action })
    }
}

pub(crate) fn require_role(
    user: &User,
    role: Role,
    action: &'static str,
) -> Result<(), PolicyViolation> {
    if user.has_role(role) {
        Ok(())
    } else {
        Err(PolicyViolation::MissingRole { action, role })
    }
}

pub(crate) fn require_permission(
    user: &User,
    permission: Permission,
    action: &'static str,
) -> Result<(), PolicyViolation> {
    if user.has_permission(permission) {
        Ok(())
    } else {
        Err(PolicyViolation::MissingPermission { action, permission })
    }
}

pub(crate) fn require_capability(
    user: &User,
    capability: Capability,
    action: &'static str,
) -> Result<(), PolicyViolation> {
    if user.has_capability(capability) {
        Ok(())
    } else {
        Err(PolicyViolation::MissingCapability { action, capability })
    }
}

pub(crate) fn require_within(
    check: ThresholdCheck,
    kind: ThresholdKind,
    amount: Money,
) -> Result<(), PolicyViolation> {
    match check {
        ThresholdCheck::Exceeded { limit } => {
            Err(PolicyViolation::ThresholdExceeded { kind, amount, limit })
        }
        ThresholdCheck::Unlimited | ThresholdCheck::WithinLimit { .. } => Ok(()),
    }
}
