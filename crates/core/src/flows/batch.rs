use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::{require_capability, require_role, Capability};
use crate::domain::batch::{
    Batch, BatchRequisition, BatchStatus, BatchType, SignatureStatus,
};
use crate::domain::requisition::{Requisition, RequisitionId, RequisitionStatus};
use crate::domain::user::{Role, User};
use crate::domain::{EntityKind, EntityRef};
use crate::errors::PolicyViolation;
use crate::flows::engine::LifecycleDefinition;
use crate::flows::requisition::{insert_comment, require_reason};
use crate::flows::states::{Responsibility, TransitionPlan};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BatchAction {
    SendForSignatures,
    ApproveSignature {
        #[serde(default)]
        comment: Option<String>,
    },
    RejectSignature {
        reason: String,
    },
    AddRequisitions {
        requisition_ids: Vec<RequisitionId>,
    },
    RemoveRequisition {
        requisition_id: RequisitionId,
        reason: String,
    },
    Cancel {
        reason: String,
    },
    StartPaymentProcessing,
    ConfirmPayment,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchActionKind {
    SendForSignatures,
    ApproveSignature,
    RejectSignature,
    AddRequisitions,
    RemoveRequisition,
    Cancel,
    StartPaymentProcessing,
    ConfirmPayment,
    Complete,
}

impl BatchActionKind {
    pub const ALL: [Self; 9] = [
        Self::SendForSignatures,
        Self::ApproveSignature,
        Self::RejectSignature,
        Self::AddRequisitions,
        Self::RemoveRequisition,
        Self::Cancel,
        Self::StartPaymentProcessing,
        Self::ConfirmPayment,
        Self::Complete,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::SendForSignatures => "send for signatures",
            Self::ApproveSignature => "approve the batch",
            Self::RejectSignature => "reject the batch",
            Self::AddRequisitions => "add requisitions",
            Self::RemoveRequisition => "remove a requisition",
            Self::Cancel => "cancel",
            Self::StartPaymentProcessing => "start payment processing",
            Self::ConfirmPayment => "confirm payment",
            Self::Complete => "complete",
        }
    }
}

impl BatchAction {
    pub fn kind(&self) -> BatchActionKind {
        match self {
            Self::SendForSignatures => BatchActionKind::SendForSignatures,
            Self::ApproveSignature { .. } => BatchActionKind::ApproveSignature,
            Self::RejectSignature { .. } => BatchActionKind::RejectSignature,
            Self::AddRequisitions { .. } => BatchActionKind::AddRequisitions,
            Self::RemoveRequisition { .. } => BatchActionKind::RemoveRequisition,
            Self::Cancel { .. } => BatchActionKind::Cancel,
            Self::StartPaymentProcessing => BatchActionKind::StartPaymentProcessing,
            Self::ConfirmPayment => BatchActionKind::ConfirmPayment,
            Self::Complete => BatchActionKind::Complete,
        }
    }
}

pub fn authorize(actor: &User, batch: &Batch, kind: BatchActionKind) -> Result<(), PolicyViolation> {
    use BatchActionKind as Kind;

    let status = batch.status;
    let action = kind.label();
    let require_status = |allowed: bool| {
        if allowed {
            Ok(())
        } else {
            Err(PolicyViolation::WrongStatus {
                entity: EntityKind::Batch,
                action,
                status: status.as_str(),
            })
        }
    };

    match kind {
        Kind::SendForSignatures => {
            require_status(status == BatchStatus::Draft)?;
            require_role(actor, Role::Account, action)?;
            if batch.requisition_count() == 0 {
                return Err(PolicyViolation::EmptyBatch);
            }
            let available = batch.signaturees.len();
            let required = batch.required_signatures;
            if required == 0 || usize::try_from(required).map_or(true, |required| required > available)
            {
                return Err(PolicyViolation::SignatureQuorumUnreachable { required, available });
            }
            Ok(())
        }
        Kind::ApproveSignature | Kind::RejectSignature => {
            require_status(status.awaiting_signatures())?;
            require_capability(actor, Capability::SignatureeAuthority, action)?;
            match batch.signaturee(&actor.id) {
                None => Err(PolicyViolation::NotSignaturee),
                Some(signaturee) if !signaturee.status.is_outstanding() => {
                    Err(PolicyViolation::SignatureAlreadyRecorded)
                }
                Some(_) => Ok(()),
            }
        }
        Kind::AddRequisitions => {
            require_status(status.accepts_additions())?;
            require_role(actor, Role::Account, action)
        }
        Kind::RemoveRequisition => {
            require_status(status.accepts_removals())?;
            require_role(actor, Role::Account, action)
        }
        Kind::Cancel => {
            require_status(!status.is_terminal())?;
            require_role(actor, Role::Account, action)
        }
        Kind::StartPaymentProcessing => {
            require_status(status == BatchStatus::FullyApproved)?;
            require_role(actor, Role::Account, action)
        }
        Kind::ConfirmPayment => {
            require_status(status == BatchStatus::PaymentProcessing)?;
            require_role(actor, Role::Account, action)
        }
        Kind::Complete => {
            require_status(status == BatchStatus::PaymentConfirmed)?;
            require_role(actor, Role::Account, action)
        }
    }
}

pub fn available_actions(user: &User, batch: &Batch) -> Vec<BatchActionKind> {
    BatchActionKind::ALL.into_iter().filter(|kind| authorize(user, batch, *kind).is_ok()).collect()
}

fn target(batch: &Batch, kind: BatchActionKind) -> BatchStatus {
    match kind {
        BatchActionKind::SendForSignatures => BatchStatus::PendingSignatures,
        BatchActionKind::ApproveSignature => {
            if batch.counted_approvals().saturating_add(1) >= batch.required_signatures {
                BatchStatus::FullyApproved
            } else {
                BatchStatus::PartiallyApproved
            }
        }
        BatchActionKind::RejectSignature => BatchStatus::Draft,
        BatchActionKind::AddRequisitions | BatchActionKind::RemoveRequisition => batch.status,
        BatchActionKind::Cancel => BatchStatus::Cancelled,
        BatchActionKind::StartPaymentProcessing => BatchStatus::PaymentProcessing,
        BatchActionKind::ConfirmPayment => BatchStatus::PaymentConfirmed,
        BatchActionKind::Complete => BatchStatus::Completed,
    }
}

fn payload_for(batch: &Batch, action: &BatchAction) -> Result<Map<String, Value>, PolicyViolation> {
    let label = action.kind().label();
    let mut payload = Map::new();
    match action {
        BatchAction::SendForSignatures
        | BatchAction::StartPaymentProcessing
        | BatchAction::ConfirmPayment
        | BatchAction::Complete => {}
        BatchAction::ApproveSignature { comment } => insert_comment(&mut payload, comment.as_ref()),
        BatchAction::RejectSignature { reason } | BatchAction::Cancel { reason } => {
            payload.insert("reason".to_owned(), Value::String(require_reason(reason, label)?));
        }
        BatchAction::AddRequisitions { requisition_ids } => {
            if requisition_ids.is_empty() {
                return Err(PolicyViolation::NothingSelected);
            }
            let mut seen = BTreeSet::new();
            let mut ids = Vec::with_capacity(requisition_ids.len());
            for id in requisition_ids {
                if batch.contains_active(id) {
                    return Err(PolicyViolation::AlreadyInBatch(id.clone()));
                }
                if seen.insert(id) {
                    ids.push(Value::String(id.0.clone()));
                }
            }
            payload.insert("requisition_ids".to_owned(), Value::Array(ids));
        }
        BatchAction::RemoveRequisition { requisition_id, reason } => {
            if !batch.contains_active(requisition_id) {
                return Err(PolicyViolation::NotInBatch(requisition_id.clone()));
            }
            payload.insert("requisition_id".to_owned(), Value::String(requisition_id.0.clone()));
            payload.insert("reason".to_owned(), Value::String(require_reason(reason, label)?));
        }
    }
    Ok(payload)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchFlow;

impl LifecycleDefinition for BatchFlow {
    type Entity = Batch;
    type Status = BatchStatus;
    type Action = BatchAction;

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Batch
    }

    fn entity_ref(&self, entity: &Batch) -> EntityRef {
        EntityRef::Batch(entity.id.clone())
    }

    fn status(&self, entity: &Batch) -> BatchStatus {
        entity.status
    }

    fn evaluate(
        &self,
        actor: &User,
        entity: &Batch,
        action: &BatchAction,
    ) -> Result<TransitionPlan<BatchStatus, BatchAction>, PolicyViolation> {
        let kind = action.kind();
        authorize(actor, entity, kind)?;
        let payload = payload_for(entity, action)?;
        let to = target(entity, kind);

        Ok(TransitionPlan {
            entity: self.entity_ref(entity),
            action: action.clone(),
            label: kind.label(),
            from: entity.status,
            to,
            next_responsible: Responsibility::for_batch_status(to),
            payload: Value::Object(payload),
        })
    }

    fn project(
        &self,
        entity: &Batch,
        actor: &User,
        plan: &TransitionPlan<BatchStatus, BatchAction>,
        at: DateTime<Utc>,
    ) -> Batch {
        let mut projected = entity.clone();
        match &plan.action {
            BatchAction::SendForSignatures => {
                for signaturee in &mut projected.signaturees {
                    if signaturee.status == SignatureStatus::Pending {
                        signaturee.status = SignatureStatus::Notified;
                    }
                }
            }
            BatchAction::ApproveSignature { .. } => {
                if let Some(signaturee) =
                    projected.signaturees.iter_mut().find(|signaturee| signaturee.user_id == actor.id)
                {
                    signaturee.status = SignatureStatus::Approved;
                    signaturee.acted_at = Some(at);
                }
                projected.approved_signatures = projected.counted_approvals();
            }
            BatchAction::RejectSignature { reason } => {
                for signaturee in &mut projected.signaturees {
                    signaturee.status = SignatureStatus::Pending;
                    signaturee.acted_at = None;
                }
                projected.approved_signatures = 0;
                projected.rejection_reason = Some(reason.trim().to_owned());
            }
            BatchAction::AddRequisitions { requisition_ids } => {
                for id in requisition_ids {
                    if !projected.contains_active(id) {
                        projected.batch_requisitions.push(BatchRequisition {
                            requisition_id: id.clone(),
                            is_active: true,
                            assigned_cheque: None,
                            added_by: Some(actor.id.clone()),
                            removed_by: None,
                            removed_at: None,
                            removal_reason: None,
                        });
                    }
                }
            }
            BatchAction::RemoveRequisition { requisition_id, reason } => {
                for member in projected
                    .batch_requisitions
                    .iter_mut()
                    .filter(|member| member.is_active && &member.requisition_id == requisition_id)
                {
                    deactivate(member, actor, reason, at);
                }
            }
            BatchAction::Cancel { reason } => {
                for member in projected.batch_requisitions.iter_mut().filter(|member| member.is_active)
                {
                    deactivate(member, actor, reason, at);
                }
                projected.cancellation_reason = Some(reason.trim().to_owned());
            }
            BatchAction::StartPaymentProcessing
            | BatchAction::ConfirmPayment
            | BatchAction::Complete => {}
        }
        projected.status = plan.to;
        projected
    }
}

fn deactivate(member: &mut BatchRequisition, actor: &User, reason: &str, at: DateTime<Utc>) {
    member.is_active = false;
    member.removed_by = Some(actor.id.clone());
    member.removed_at = Some(at);
    member.removal_reason = Some(reason.trim().to_owned());
}

/// Plans one approval per selected batch. Any failing batch fails the whole
/// selection so the bulk request is never sent partially valid.
pub fn evaluate_bulk_approval(
    actor: &User,
    batches: &[Batch],
    comment: Option<&str>,
) -> Result<Vec<TransitionPlan<BatchStatus, BatchAction>>, PolicyViolation> {
    if batches.is_empty() {
        return Err(PolicyViolation::NothingSelected);
    }

    let action = BatchAction::ApproveSignature { comment: comment.map(str::to_owned) };
    batches
        .iter()
        .map(|batch| {
            BatchFlow.evaluate(actor, batch, &action).map_err(|violation| {
                PolicyViolation::BulkItem { batch: batch.id.clone(), violation: Box::new(violation) }
            })
        })
        .collect()
}

/// Requisitions that can be added to a new batch: approved or
/// account-confirmed, paid by a batchable instrument, and not active in any
/// live batch.
pub fn ready_pool<'a>(
    requisitions: &'a [Requisition],
    batches: &[Batch],
    batch_type: Option<BatchType>,
) -> Vec<&'a Requisition> {
    let batched: BTreeSet<&RequisitionId> = batches
        .iter()
        .filter(|batch| batch.status != BatchStatus::Cancelled)
        .flat_map(|batch| batch.active_requisitions().map(|member| &member.requisition_id))
        .collect();

    requisitions
        .iter()
        .filter(|requisition| {
            matches!(
                requisition.current_status,
                RequisitionStatus::Approved | RequisitionStatus::AccountConfirmed
            )
        })
        .filter(|requisition| match requisition.payment_type.batch_type() {
            Some(instrument) => batch_type.map_or(true, |wanted| wanted == instrument),
            None => false,
        })
        .filter(|requisition| !batched.contains(&requisition.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{
        available_actions, evaluate_bulk_approval, ready_pool, BatchAction, BatchActionKind,
        BatchFlow,
    };
    use crate::domain::batch::{
        Batch, BatchId, BatchRequisition, BatchSignaturee, BatchStatus, BatchType,
        SignatureStatus,
    };
    use crate::domain::payee::Payee;
    use crate::domain::requisition::{PaymentType, Requisition, RequisitionId, RequisitionStatus};
    use crate::domain::user::{Role, RoleAssignment, Threshold, User, UserId};
    use crate::errors::PolicyViolation;
    use crate::flows::engine::LifecycleDefinition;
    use crate::money::Money;

    fn user(id: &str, role: Role, signaturee_authority: bool) -> User {
        User {
            id: UserId(id.to_owned()),
            display_name: id.to_owned(),
            roles: vec![RoleAssignment { role, organization: None }],
            can_approve: false,
            signaturee_authority,
            max_submission_threshold: Threshold::Unlimited,
            max_approval_threshold: Threshold::Unlimited,
            department: None,
            program: None,
        }
    }

    fn member(id: &str) -> BatchRequisition {
        BatchRequisition {
            requisition_id: RequisitionId(id.to_owned()),
            is_active: true,
            assigned_cheque: None,
            added_by: Some(UserId("acct".to_owned())),
            removed_by: None,
            removed_at: None,
            removal_reason: None,
        }
    }

    fn signaturee(id: &str, priority: u32) -> BatchSignaturee {
        BatchSignaturee {
            user_id: UserId(id.to_owned()),
            display_name: None,
            priority,
            status: SignatureStatus::Pending,
            acted_at: None,
        }
    }

    fn batch(status: BatchStatus, members: &[&str]) -> Batch {
        Batch {
            id: BatchId("b-1".to_owned()),
            number: "BATCH-2026-001".to_owned(),
            batch_type: BatchType::Cheque,
            status,
            created_by: UserId("acct".to_owned()),
            signaturees: vec![signaturee("x", 1), signaturee("y", 2)],
            batch_requisitions: members.iter().map(|id| member(id)).collect(),
            required_signatures: 2,
            approved_signatures: 0,
            rejection_reason: None,
            cancellation_reason: None,
        }
    }

    fn approved_requisition(id: &str) -> Requisition {
        Requisition {
            id: RequisitionId(id.to_owned()),
            number: format!("REQ-{id}"),
            current_status: RequisitionStatus::Approved,
            current_assignee: None,
            created_by: UserId("staff".to_owned()),
            payee: Payee::Vendor { payee_id: "v-1".to_owned(), vendor_name: "Acme".to_owned() },
            total_with_tax: Money::parse("10.00").expect("money"),
            payment_type: PaymentType::Cheque,
            status_history: Vec::new(),
        }
    }

    fn apply(batch: &Batch, actor: &User, action: BatchAction) -> Batch {
        let plan = BatchFlow.evaluate(actor, batch, &action).expect("legal transition");
        BatchFlow.project(batch, actor, &plan, Utc::now())
    }

    #[test]
    fn quorum_of_two_walks_partial_then_full() {
        let acct = user("acct", Role::Account, false);
        let x = user("x", Role::Signaturee, true);
        let y = user("y", Role::Signaturee, true);

        let sent = apply(&batch(BatchStatus::Draft, &["r-1"]), &acct, BatchAction::SendForSignatures);
        assert_eq!(sent.status, BatchStatus::PendingSignatures);
        assert!(sent.signaturees.iter().all(|s| s.status == SignatureStatus::Notified));

        let first = apply(&sent, &x, BatchAction::ApproveSignature { comment: None });
        assert_eq!(first.approved_signatures, 1);
        assert_eq!(first.status, BatchStatus::PartiallyApproved);
        assert_eq!(first.check_invariants(), Ok(()));

        let second = apply(&first, &y, BatchAction::ApproveSignature { comment: None });
        assert_eq!(second.approved_signatures, 2);
        assert_eq!(second.status, BatchStatus::FullyApproved);
        assert_eq!(second.check_invariants(), Ok(()));
    }

    #[test]
    fn full_approval_follows_recorded_signatures_not_the_counter() {
        let acct = user("acct", Role::Account, false);
        let x = user("x", Role::Signaturee, true);
        let mut sent =
            apply(&batch(BatchStatus::Draft, &["r-1"]), &acct, BatchAction::SendForSignatures);
        // Server counter ahead of the per-signaturee records.
        sent.approved_signatures = 1;

        let plan = BatchFlow
            .evaluate(&x, &sent, &BatchAction::ApproveSignature { comment: None })
            .expect("x may sign");
        assert_eq!(plan.to, BatchStatus::PartiallyApproved);

        let projected = BatchFlow.project(&sent, &x, &plan, Utc::now());
        assert_eq!(projected.status, plan.to);
        assert_eq!(projected.approved_signatures, 1);
        assert_eq!(projected.check_invariants(), Ok(()));
    }

    #[test]
    fn signaturee_cannot_approve_twice() {
        let acct = user("acct", Role::Account, false);
        let x = user("x", Role::Signaturee, true);
        let sent = apply(&batch(BatchStatus::Draft, &["r-1"]), &acct, BatchAction::SendForSignatures);
        let first = apply(&sent, &x, BatchAction::ApproveSignature { comment: None });

        assert_eq!(
            BatchFlow.evaluate(&x, &first, &BatchAction::ApproveSignature { comment: None }),
            Err(PolicyViolation::SignatureAlreadyRecorded)
        );
        let outsider = user("z", Role::Signaturee, true);
        assert_eq!(
            BatchFlow.evaluate(&outsider, &first, &BatchAction::ApproveSignature { comment: None }),
            Err(PolicyViolation::NotSignaturee)
        );
    }

    #[test]
    fn out_of_priority_approval_is_allowed() {
        let acct = user("acct", Role::Account, false);
        let y = user("y", Role::Signaturee, true);
        let sent = apply(&batch(BatchStatus::Draft, &["r-1"]), &acct, BatchAction::SendForSignatures);

        let approved = apply(&sent, &y, BatchAction::ApproveSignature { comment: None });
        assert_eq!(approved.status, BatchStatus::PartiallyApproved);
        assert_eq!(
            approved.next_expected_signaturee().map(|s| s.user_id.0.as_str()),
            Some("x")
        );
    }

    #[test]
    fn send_requires_members_and_reachable_quorum() {
        let acct = user("acct", Role::Account, false);

        assert_eq!(
            BatchFlow.evaluate(&acct, &batch(BatchStatus::Draft, &[]), &BatchAction::SendForSignatures),
            Err(PolicyViolation::EmptyBatch)
        );

        let mut too_many = batch(BatchStatus::Draft, &["r-1"]);
        too_many.required_signatures = 3;
        assert_eq!(
            BatchFlow.evaluate(&acct, &too_many, &BatchAction::SendForSignatures),
            Err(PolicyViolation::SignatureQuorumUnreachable { required: 3, available: 2 })
        );

        let staff = user("staff", Role::Staff, false);
        assert!(matches!(
            BatchFlow.evaluate(&staff, &batch(BatchStatus::Draft, &["r-1"]), &BatchAction::SendForSignatures),
            Err(PolicyViolation::MissingRole { role: Role::Account, .. })
        ));
    }

    #[test]
    fn rejection_returns_to_draft_and_resets_signatures() {
        let acct = user("acct", Role::Account, false);
        let x = user("x", Role::Signaturee, true);
        let y = user("y", Role::Signaturee, true);
        let sent = apply(&batch(BatchStatus::Draft, &["r-1"]), &acct, BatchAction::SendForSignatures);
        let partial = apply(&sent, &x, BatchAction::ApproveSignature { comment: None });

        assert_eq!(
            BatchFlow.evaluate(&y, &partial, &BatchAction::RejectSignature { reason: String::new() }),
            Err(PolicyViolation::MissingReason { action: "reject the batch" })
        );

        let rejected =
            apply(&partial, &y, BatchAction::RejectSignature { reason: "wrong payee".to_owned() });
        assert_eq!(rejected.status, BatchStatus::Draft);
        assert_eq!(rejected.approved_signatures, 0);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("wrong payee"));
        assert_eq!(rejected.check_invariants(), Ok(()));
    }

    #[test]
    fn cancel_releases_members_to_the_ready_pool() {
        let acct = user("acct", Role::Account, false);
        let live = batch(BatchStatus::PendingSignatures, &["r-1", "r-2", "r-3"]);
        let requisitions: Vec<Requisition> =
            ["r-1", "r-2", "r-3"].iter().map(|id| approved_requisition(id)).collect();

        assert!(ready_pool(&requisitions, std::slice::from_ref(&live), None).is_empty());

        let cancelled = apply(&live, &acct, BatchAction::Cancel { reason: "duplicate run".to_owned() });
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.requisition_count(), 0);
        assert!(cancelled
            .batch_requisitions
            .iter()
            .all(|m| m.removal_reason.as_deref() == Some("duplicate run")));

        let pool = ready_pool(&requisitions, &[cancelled.clone()], Some(BatchType::Cheque));
        assert_eq!(pool.len(), 3);
        assert!(available_actions(&acct, &cancelled).is_empty());
    }

    #[test]
    fn membership_changes_respect_status() {
        let acct = user("acct", Role::Account, false);
        let draft = batch(BatchStatus::Draft, &["r-1"]);

        assert_eq!(
            BatchFlow.evaluate(
                &acct,
                &draft,
                &BatchAction::AddRequisitions { requisition_ids: vec![RequisitionId("r-1".to_owned())] }
            ),
            Err(PolicyViolation::AlreadyInBatch(RequisitionId("r-1".to_owned())))
        );

        let plan = BatchFlow
            .evaluate(
                &acct,
                &draft,
                &BatchAction::AddRequisitions {
                    requisition_ids: vec![
                        RequisitionId("r-2".to_owned()),
                        RequisitionId("r-2".to_owned()),
                    ],
                },
            )
            .expect("add");
        assert_eq!(plan.payload, json!({ "requisition_ids": ["r-2"] }));

        let pending = batch(BatchStatus::PendingSignatures, &["r-1"]);
        assert!(matches!(
            BatchFlow.evaluate(
                &acct,
                &pending,
                &BatchAction::AddRequisitions { requisition_ids: vec![RequisitionId("r-9".to_owned())] }
            ),
            Err(PolicyViolation::WrongStatus { .. })
        ));

        let removed = apply(
            &pending,
            &acct,
            BatchAction::RemoveRequisition {
                requisition_id: RequisitionId("r-1".to_owned()),
                reason: "paid twice".to_owned(),
            },
        );
        assert_eq!(removed.status, BatchStatus::PendingSignatures);
        assert_eq!(removed.batch_requisitions[0].removed_by, Some(UserId("acct".to_owned())));
        assert!(removed.batch_requisitions[0].removed_at.is_some());
    }

    #[test]
    fn payment_steps_follow_full_approval() {
        let acct = user("acct", Role::Account, false);
        let mut approved = batch(BatchStatus::FullyApproved, &["r-1"]);
        approved.approved_signatures = 2;

        assert_eq!(
            available_actions(&acct, &approved),
            vec![BatchActionKind::Cancel, BatchActionKind::StartPaymentProcessing]
        );
        let processing = apply(&approved, &acct, BatchAction::StartPaymentProcessing);
        let confirmed = apply(&processing, &acct, BatchAction::ConfirmPayment);
        let completed = apply(&confirmed, &acct, BatchAction::Complete);
        assert_eq!(completed.status, BatchStatus::Completed);
    }

    #[test]
    fn bulk_approval_validates_every_batch() {
        let x = user("x", Role::Signaturee, true);
        assert_eq!(evaluate_bulk_approval(&x, &[], None), Err(PolicyViolation::NothingSelected));

        let pending = batch(BatchStatus::PendingSignatures, &["r-1"]);
        let mut draft = batch(BatchStatus::Draft, &["r-2"]);
        draft.id = BatchId("b-2".to_owned());

        let plans = evaluate_bulk_approval(&x, std::slice::from_ref(&pending), None).expect("valid");
        assert_eq!(plans.len(), 1);

        let error = evaluate_bulk_approval(&x, &[pending, draft], None).expect_err("draft fails");
        assert!(matches!(
            error,
            PolicyViolation::BulkItem { ref batch, .. } if batch == &BatchId("b-2".to_owned())
        ));
    }

    #[test]
    fn ready_pool_skips_card_purchases_and_other_statuses() {
        let mut card = approved_requisition("r-card");
        card.payment_type = PaymentType::OfficeCreditCard;
        let mut pending = approved_requisition("r-pending");
        pending.current_status = RequisitionStatus::PendingApproval;
        let mut confirmed = approved_requisition("r-confirmed");
        confirmed.current_status = RequisitionStatus::AccountConfirmed;
        let mut eft = approved_requisition("r-eft");
        eft.payment_type = PaymentType::Eft;

        let requisitions = vec![card, pending, confirmed, eft];
        let cheques: Vec<&str> = ready_pool(&requisitions, &[], Some(BatchType::Cheque))
            .into_iter()
            .map(|requisition| requisition.id.0.as_str())
            .collect();
        assert_eq!(cheques, vec!["r-confirmed"]);
        assert_eq!(ready_pool(&requisitions, &[], None).len(), 2);
    }
}
