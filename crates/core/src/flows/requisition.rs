use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::{
    is_assignee, is_creator, require_assignee, require_capability, require_creator,
    require_permission, require_role, require_within, Capability, Permission,
};
use crate::domain::requisition::{Requisition, RequisitionStatus, StatusHistoryEntry};
use crate::domain::user::{Role, User, UserId};
use crate::domain::{EntityKind, EntityRef};
use crate::errors::{PolicyViolation, ThresholdKind};
use crate::flows::engine::LifecycleDefinition;
use crate::flows::states::{Responsibility, TransitionPlan};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequisitionAction {
    Submit {
        #[serde(default)]
        comment: Option<String>,
    },
    ForwardForSubmission {
        to: UserId,
        #[serde(default)]
        comment: Option<String>,
    },
    ForwardToApproval {
        #[serde(default)]
        comment: Option<String>,
    },
    ReturnForRevision {
        reason: String,
    },
    Approve {
        #[serde(default)]
        comment: Option<String>,
    },
    Reject {
        reason: String,
    },
    RequestChanges {
        reason: String,
    },
    ConfirmAccount {
        #[serde(default)]
        comment: Option<String>,
    },
    Sign {
        #[serde(default)]
        comment: Option<String>,
    },
    RejectSignature {
        reason: String,
    },
    ConfirmPayment {
        #[serde(default)]
        comment: Option<String>,
    },
    Recall {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionActionKind {
    Submit,
    ForwardForSubmission,
    ForwardToApproval,
    ReturnForRevision,
    Approve,
    Reject,
    RequestChanges,
    ConfirmAccount,
    Sign,
    RejectSignature,
    ConfirmPayment,
    Recall,
}

impl RequisitionActionKind {
    pub const ALL: [Self; 12] = [
        Self::Submit,
        Self::ForwardForSubmission,
        Self::ForwardToApproval,
        Self::ReturnForRevision,
        Self::Approve,
        Self::Reject,
        Self::RequestChanges,
        Self::ConfirmAccount,
        Self::Sign,
        Self::RejectSignature,
        Self::ConfirmPayment,
        Self::Recall,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::ForwardForSubmission => "forward for submission",
            Self::ForwardToApproval => "forward to approval",
            Self::ReturnForRevision => "return for revision",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request changes",
            Self::ConfirmAccount => "confirm the account",
            Self::Sign => "sign",
            Self::RejectSignature => "reject the signature",
            Self::ConfirmPayment => "confirm payment",
            Self::Recall => "recall",
        }
    }

    pub fn target(self) -> RequisitionStatus {
        match self {
            Self::Submit => RequisitionStatus::Submitted,
            Self::ForwardForSubmission => RequisitionStatus::ForwardedForSubmission,
            Self::ForwardToApproval => RequisitionStatus::PendingApproval,
            Self::ReturnForRevision => RequisitionStatus::ReturnedForRevision,
            Self::Approve => RequisitionStatus::Approved,
            Self::Reject | Self::RejectSignature => RequisitionStatus::Rejected,
            Self::RequestChanges => RequisitionStatus::ChangesRequested,
            Self::ConfirmAccount => RequisitionStatus::AccountConfirmed,
            Self::Sign => RequisitionStatus::PaymentConfirmation,
            Self::ConfirmPayment => RequisitionStatus::Completed,
            Self::Recall => RequisitionStatus::Cancelled,
        }
    }
}

impl RequisitionAction {
    pub fn kind(&self) -> RequisitionActionKind {
        match self {
            Self::Submit { .. } => RequisitionActionKind::Submit,
            Self::ForwardForSubmission { .. } => RequisitionActionKind::ForwardForSubmission,
            Self::ForwardToApproval { .. } => RequisitionActionKind::ForwardToApproval,
            Self::ReturnForRevision { .. } => RequisitionActionKind::ReturnForRevision,
            Self::Approve { .. } => RequisitionActionKind::Approve,
            Self::Reject { .. } => RequisitionActionKind::Reject,
            Self::RequestChanges { .. } => RequisitionActionKind::RequestChanges,
            Self::ConfirmAccount { .. } => RequisitionActionKind::ConfirmAccount,
            Self::Sign { .. } => RequisitionActionKind::Sign,
            Self::RejectSignature { .. } => RequisitionActionKind::RejectSignature,
            Self::ConfirmPayment { .. } => RequisitionActionKind::ConfirmPayment,
            Self::Recall { .. } => RequisitionActionKind::Recall,
        }
    }
}

/// Status and actor gates for one action kind. Payload checks happen in
/// [`RequisitionFlow::evaluate`].
pub fn authorize(
    actor: &User,
    requisition: &Requisition,
    kind: RequisitionActionKind,
) -> Result<(), PolicyViolation> {
    use RequisitionActionKind as Kind;
    use RequisitionStatus as Status;

    let status = requisition.current_status;
    let action = kind.label();
    let wrong_status = || PolicyViolation::WrongStatus {
        entity: EntityKind::Requisition,
        action,
        status: status.as_str(),
    };

    match kind {
        Kind::Submit => {
            match status {
                Status::Draft | Status::ReturnedForRevision | Status::ChangesRequested => {
                    require_creator(requisition, actor, action)?
                }
                Status::ForwardedForSubmission => require_assignee(requisition, actor, action)?,
                _ => return Err(wrong_status()),
            }
            let amount = requisition.total_with_tax;
            require_within(actor.submission_check(amount), ThresholdKind::Submission, amount)
        }
        Kind::ForwardForSubmission => {
            if status != Status::Draft {
                return Err(wrong_status());
            }
            require_creator(requisition, actor, action)
        }
        Kind::ForwardToApproval | Kind::ReturnForRevision => {
            if status != Status::PendingReview {
                return Err(wrong_status());
            }
            require_assignee(requisition, actor, action)?;
            require_permission(actor, Permission::ReviewRequisitions, action)
        }
        Kind::Approve | Kind::Reject | Kind::RequestChanges => {
            if status != Status::PendingApproval {
                return Err(wrong_status());
            }
            require_assignee(requisition, actor, action)?;
            require_capability(actor, Capability::Approve, action)?;
            let amount = requisition.total_with_tax;
            require_within(actor.approval_check(amount), ThresholdKind::Approval, amount)
        }
        Kind::ConfirmAccount => {
            if status != Status::AccountConfirmation {
                return Err(wrong_status());
            }
            require_assignee(requisition, actor, action)?;
            require_role(actor, Role::Account, action)
        }
        Kind::Sign | Kind::RejectSignature => {
            if status != Status::SignatureeConfirmation {
                return Err(wrong_status());
            }
            require_assignee(requisition, actor, action)?;
            require_capability(actor, Capability::SignatureeAuthority, action)
        }
        Kind::ConfirmPayment => {
            if status != Status::PaymentConfirmation {
                return Err(wrong_status());
            }
            require_assignee(requisition, actor, action)?;
            require_role(actor, Role::Account, action)
        }
        Kind::Recall => {
            if status.is_terminal() {
                return Err(wrong_status());
            }
            require_creator(requisition, actor, action)?;
            if requisition.acted_on_by_others() {
                return Err(PolicyViolation::DownstreamActivity);
            }
            Ok(())
        }
    }
}

/// Every action whose gate currently passes for `user`.
pub fn available_actions(user: &User, requisition: &Requisition) -> Vec<RequisitionActionKind> {
    RequisitionActionKind::ALL
        .into_iter()
        .filter(|kind| authorize(user, requisition, *kind).is_ok())
        .collect()
}

pub fn can_edit(user: &User, requisition: &Requisition) -> bool {
    requisition.current_status.is_editable()
        && (is_creator(requisition, user) || is_assignee(requisition, user))
}

pub(crate) fn require_reason(reason: &str, action: &'static str) -> Result<String, PolicyViolation> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        Err(PolicyViolation::MissingReason { action })
    } else {
        Ok(trimmed.to_owned())
    }
}

pub(crate) fn insert_comment(payload: &mut Map<String, Value>, comment: Option<&String>) {
    if let Some(comment) = comment.map(|comment| comment.trim()).filter(|comment| !comment.is_empty())
    {
        payload.insert("comment".to_owned(), Value::String(comment.to_owned()));
    }
}

fn payload_for(
    actor: &User,
    action: &RequisitionAction,
) -> Result<Map<String, Value>, PolicyViolation> {
    let label = action.kind().label();
    let mut payload = Map::new();
    match action {
        RequisitionAction::Submit { comment }
        | RequisitionAction::Approve { comment }
        | RequisitionAction::ConfirmAccount { comment }
        | RequisitionAction::Sign { comment }
        | RequisitionAction::ConfirmPayment { comment } => {
            insert_comment(&mut payload, comment.as_ref());
        }
        RequisitionAction::ForwardForSubmission { to, comment } => {
            if to == &actor.id {
                return Err(PolicyViolation::ForwardToSelf);
            }
            payload.insert("forward_to".to_owned(), Value::String(to.0.clone()));
            insert_comment(&mut payload, comment.as_ref());
        }
        RequisitionAction::ForwardToApproval { comment } => {
            payload.insert("decision".to_owned(), Value::from("forward_to_approval"));
            insert_comment(&mut payload, comment.as_ref());
        }
        RequisitionAction::ReturnForRevision { reason } => {
            payload.insert("decision".to_owned(), Value::from("return_for_revision"));
            payload.insert("reason".to_owned(), Value::String(require_reason(reason, label)?));
        }
        RequisitionAction::Reject { reason }
        | RequisitionAction::RequestChanges { reason }
        | RequisitionAction::RejectSignature { reason } => {
            payload.insert("reason".to_owned(), Value::String(require_reason(reason, label)?));
        }
        RequisitionAction::Recall { reason } => {
            if let Some(reason) = reason.as_deref().map(str::trim).filter(|reason| !reason.is_empty())
            {
                payload.insert("reason".to_owned(), Value::String(reason.to_owned()));
            }
        }
    }
    Ok(payload)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequisitionFlow;

impl LifecycleDefinition for RequisitionFlow {
    type Entity = Requisition;
    type Status = RequisitionStatus;
    type Action = RequisitionAction;

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Requisition
    }

    fn entity_ref(&self, entity: &Requisition) -> EntityRef {
        EntityRef::Requisition(entity.id.clone())
    }

    fn status(&self, entity: &Requisition) -> RequisitionStatus {
        entity.current_status
    }

    fn evaluate(
        &self,
        actor: &User,
        entity: &Requisition,
        action: &RequisitionAction,
    ) -> Result<TransitionPlan<RequisitionStatus, RequisitionAction>, PolicyViolation> {
        let kind = action.kind();
        authorize(actor, entity, kind)?;
        let payload = payload_for(actor, action)?;
        let to = kind.target();

        Ok(TransitionPlan {
            entity: self.entity_ref(entity),
            action: action.clone(),
            label: kind.label(),
            from: entity.current_status,
            to,
            next_responsible: Responsibility::for_requisition_status(to),
            payload: Value::Object(payload),
        })
    }

    fn project(
        &self,
        entity: &Requisition,
        actor: &User,
        plan: &TransitionPlan<RequisitionStatus, RequisitionAction>,
        at: DateTime<Utc>,
    ) -> Requisition {
        let mut projected = entity.clone();
        for entry in projected.status_history.iter_mut().filter(|entry| entry.is_current) {
            entry.is_current = false;
            entry.completed_by = Some(actor.id.clone());
            entry.completed_date = Some(at);
            entry.action_status = Some("completed".to_owned());
        }
        projected.status_history.push(StatusHistoryEntry {
            status: plan.to,
            completed_by: None,
            completed_date: None,
            is_current: true,
            action_status: Some("pending".to_owned()),
        });
        projected.current_status = plan.to;
        // Routing is decided server-side.
        projected.current_assignee = None;
        projected
    }
}
