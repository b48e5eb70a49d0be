use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::{require_permission, Permission};
use crate::domain::batch::{Batch, BatchStatus, BatchType};
use crate::domain::cheque::{Cheque, ChequeStatus};
use crate::domain::payee::{Payee, PayeeKey};
use crate::domain::requisition::{Requisition, RequisitionId};
use crate::domain::user::User;
use crate::domain::{EntityKind, EntityRef};
use crate::errors::PolicyViolation;
use crate::flows::engine::LifecycleDefinition;
use crate::flows::requisition::require_reason;
use crate::flows::states::{Responsibility, TransitionPlan};
use crate::money::Money;

/// The slice of a requisition cheque grouping needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChequeCandidate {
    pub requisition_id: RequisitionId,
    pub payee: Payee,
    pub amount: Money,
}

impl From<&Requisition> for ChequeCandidate {
    fn from(requisition: &Requisition) -> Self {
        Self {
            requisition_id: requisition.id.clone(),
            payee: requisition.payee.clone(),
            amount: requisition.total_with_tax,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChequeGroup {
    pub payee_key: PayeeKey,
    pub payee: Payee,
    pub requisition_ids: Vec<RequisitionId>,
    pub total: Money,
    pub requisition_count: usize,
}

/// Cheque not yet created server-side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChequeDraft {
    pub cheque_number: String,
    pub payee_key: PayeeKey,
    pub requisition_ids: Vec<RequisitionId>,
    pub total: Money,
}

/// Partitions the selected candidates by payee, in order of first appearance.
pub fn group_by_payee(
    candidates: &[ChequeCandidate],
    selected: &[RequisitionId],
) -> Result<Vec<ChequeGroup>, PolicyViolation> {
    if selected.is_empty() {
        return Err(PolicyViolation::NothingSelected);
    }

    let by_id: BTreeMap<&RequisitionId, &ChequeCandidate> =
        candidates.iter().map(|candidate| (&candidate.requisition_id, candidate)).collect();

    let mut groups: Vec<(PayeeKey, Vec<&ChequeCandidate>)> = Vec::new();
    let mut seen = BTreeSet::new();
    for id in selected {
        if !seen.insert(id) {
            continue;
        }
        let candidate = by_id
            .get(id)
            .copied()
            .ok_or_else(|| PolicyViolation::UnknownRequisition(id.clone()))?;
        let key = candidate.payee.key();
        match groups.iter_mut().find(|(existing, _)| existing == &key) {
            Some((_, members)) => members.push(candidate),
            None => groups.push((key, vec![candidate])),
        }
    }

    groups
        .into_iter()
        .map(|(payee_key, members)| {
            let total = Money::try_sum(members.iter().map(|candidate| candidate.amount))
                .map_err(|_| PolicyViolation::AmountOverflow)?;
            Ok(ChequeGroup {
                payee_key,
                payee: members[0].payee.clone(),
                requisition_ids: members
                    .iter()
                    .map(|candidate| candidate.requisition_id.clone())
                    .collect(),
                total,
                requisition_count: members.len(),
            })
        })
        .collect()
}

pub fn authorize_generation(actor: &User, batch: &Batch) -> Result<(), PolicyViolation> {
    let action = "generate cheques";
    if batch.batch_type != BatchType::Cheque {
        return Err(PolicyViolation::NotAChequeBatch);
    }
    if batch.status.is_terminal()
        || matches!(batch.status, BatchStatus::PaymentProcessing | BatchStatus::PaymentConfirmed)
    {
        return Err(PolicyViolation::WrongStatus {
            entity: EntityKind::Batch,
            action,
            status: batch.status.as_str(),
        });
    }
    require_permission(actor, Permission::ManageCheques, action)
}

/// One draft per group that has a non-blank cheque number.
pub fn draft_cheques(
    actor: &User,
    batch: &Batch,
    groups: &[ChequeGroup],
    numbers: &BTreeMap<PayeeKey, String>,
) -> Result<Vec<ChequeDraft>, PolicyViolation> {
    authorize_generation(actor, batch)?;
    for group in groups {
        if let Some(id) = group.requisition_ids.iter().find(|id| !batch.contains_active(id)) {
            return Err(PolicyViolation::NotInBatch(id.clone()));
        }
    }

    let drafts: Vec<ChequeDraft> = groups
        .iter()
        .filter_map(|group| {
            let number = numbers.get(&group.payee_key)?.trim();
            (!number.is_empty()).then(|| ChequeDraft {
                cheque_number: number.to_owned(),
                payee_key: group.payee_key.clone(),
                requisition_ids: group.requisition_ids.clone(),
                total: group.total,
            })
        })
        .collect();

    if drafts.is_empty() {
        return Err(PolicyViolation::NothingSelected);
    }
    Ok(drafts)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChequeAction {
    MarkPending,
    MarkPrinted,
    MarkSigned,
    MarkDistributed,
    MarkCashed,
    Void { reason: String },
}

impl ChequeAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MarkPending => "mark pending",
            Self::MarkPrinted => "mark printed",
            Self::MarkSigned => "mark signed",
            Self::MarkDistributed => "mark distributed",
            Self::MarkCashed => "mark cashed",
            Self::Void { .. } => "void",
        }
    }

    fn transition(&self) -> (Option<ChequeStatus>, ChequeStatus) {
        match self {
            Self::MarkPending => (Some(ChequeStatus::Draft), ChequeStatus::Pending),
            Self::MarkPrinted => (Some(ChequeStatus::Pending), ChequeStatus::Printed),
            Self::MarkSigned => (Some(ChequeStatus::Printed), ChequeStatus::Signed),
            Self::MarkDistributed => (Some(ChequeStatus::Signed), ChequeStatus::Distributed),
            Self::MarkCashed => (Some(ChequeStatus::Distributed), ChequeStatus::Cashed),
            Self::Void { .. } => (None, ChequeStatus::Void),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChequeFlow;

impl LifecycleDefinition for ChequeFlow {
    type Entity = Cheque;
    type Status = ChequeStatus;
    type Action = ChequeAction;

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Cheque
    }

    fn entity_ref(&self, entity: &Cheque) -> EntityRef {
        EntityRef::Cheque(entity.id.clone())
    }

    fn status(&self, entity: &Cheque) -> ChequeStatus {
        entity.status
    }

    fn evaluate(
        &self,
        actor: &User,
        entity: &Cheque,
        action: &ChequeAction,
    ) -> Result<TransitionPlan<ChequeStatus, ChequeAction>, PolicyViolation> {
        let label = action.label();
        let (from, to) = action.transition();
        let legal = match from {
            Some(from) => entity.status == from,
            None => !entity.status.is_terminal(),
        };
        if !legal {
            return Err(PolicyViolation::WrongStatus {
                entity: EntityKind::Cheque,
                action: label,
                status: entity.status.as_str(),
            });
        }
        require_permission(actor, Permission::ManageCheques, label)?;

        let mut payload = Map::new();
        if let ChequeAction::Void { reason } = action {
            payload.insert("reason".to_owned(), Value::String(require_reason(reason, label)?));
        }

        Ok(TransitionPlan {
            entity: self.entity_ref(entity),
            action: action.clone(),
            label,
            from: entity.status,
            to,
            next_responsible: Responsibility::for_cheque_status(to),
            payload: Value::Object(payload),
        })
    }

    fn project(
        &self,
        entity: &Cheque,
        _actor: &User,
        plan: &TransitionPlan<ChequeStatus, ChequeAction>,
        _at: DateTime<Utc>,
    ) -> Cheque {
        let mut projected = entity.clone();
        projected.status = plan.to;
        if let ChequeAction::Void { reason } = &plan.action {
            projected.void_reason = Some(reason.trim().to_owned());
        }
        projected
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::{draft_cheques, group_by_payee, ChequeAction, ChequeCandidate, ChequeFlow};
    use crate::domain::batch::{Batch, BatchId, BatchRequisition, BatchStatus, BatchType};
    use crate::domain::cheque::{Cheque, ChequeId, ChequeStatus};
    use crate::domain::payee::Payee;
    use crate::domain::requisition::RequisitionId;
    use crate::domain::user::{Role, RoleAssignment, Threshold, User, UserId};
    use crate::errors::PolicyViolation;
    use crate::flows::engine::LifecycleDefinition;
    use crate::money::Money;

    fn vendor(id: &str, name: &str) -> Payee {
        Payee::Vendor { payee_id: id.to_owned(), vendor_name: name.to_owned() }
    }

    fn candidate(id: &str, payee: Payee, amount: &str) -> ChequeCandidate {
        ChequeCandidate {
            requisition_id: RequisitionId(id.to_owned()),
            payee,
            amount: Money::parse(amount).expect("money"),
        }
    }

    fn ids(raw: &[&str]) -> Vec<RequisitionId> {
        raw.iter().map(|id| RequisitionId((*id).to_owned())).collect()
    }

    fn account() -> User {
        User {
            id: UserId("acct".to_owned()),
            display_name: "Accounts".to_owned(),
            roles: vec![RoleAssignment { role: Role::Account, organization: None }],
            can_approve: false,
            signaturee_authority: false,
            max_submission_threshold: Threshold::Unlimited,
            max_approval_threshold: Threshold::Unlimited,
            department: None,
            program: None,
        }
    }

    fn cheque_batch(batch_type: BatchType, members: &[&str]) -> Batch {
        Batch {
            id: BatchId("b-1".to_owned()),
            number: "BATCH-1".to_owned(),
            batch_type,
            status: BatchStatus::FullyApproved,
            created_by: UserId("acct".to_owned()),
            signaturees: Vec::new(),
            batch_requisitions: members
                .iter()
                .map(|id| BatchRequisition {
                    requisition_id: RequisitionId((*id).to_owned()),
                    is_active: true,
                    assigned_cheque: None,
                    added_by: None,
                    removed_by: None,
                    removed_at: None,
                    removal_reason: None,
                })
                .collect(),
            required_signatures: 1,
            approved_signatures: 0,
            rejection_reason: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn group_total_is_exact() {
        let acme = vendor("42", "Acme");
        let candidates = vec![
            candidate("r-1", acme.clone(), "10.10"),
            candidate("r-2", acme.clone(), "0.05"),
            candidate("r-3", acme, "0.00"),
        ];

        let groups = group_by_payee(&candidates, &ids(&["r-1", "r-2", "r-3"])).expect("groups");

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total.to_string(), "10.15");
        assert_eq!(groups[0].requisition_count, 3);
        assert_eq!(groups[0].payee_key.to_string(), "vendor:42");
    }

    #[test]
    fn groups_split_by_payee_type_and_id_in_selection_order() {
        let employee = Payee::Employee {
            payee_id: "42".to_owned(),
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
        };
        let candidates = vec![
            candidate("r-1", vendor("42", "Acme"), "1.00"),
            candidate("r-2", employee, "2.00"),
            candidate("r-3", vendor("7", "Globex"), "3.00"),
            candidate("r-4", vendor("42", "Acme"), "4.00"),
        ];

        let groups =
            group_by_payee(&candidates, &ids(&["r-2", "r-1", "r-3", "r-4", "r-1"])).expect("groups");
        let keys: Vec<String> = groups.iter().map(|group| group.payee_key.to_string()).collect();

        assert_eq!(keys, vec!["employee:42", "vendor:42", "vendor:7"]);
        assert_eq!(groups[1].total.to_string(), "5.00");
        assert_eq!(groups[1].requisition_count, 2);
    }

    #[test]
    fn unknown_selection_is_rejected() {
        let candidates = vec![candidate("r-1", vendor("1", "A"), "1.00")];
        assert_eq!(
            group_by_payee(&candidates, &ids(&["r-404"])),
            Err(PolicyViolation::UnknownRequisition(RequisitionId("r-404".to_owned())))
        );
        assert_eq!(group_by_payee(&candidates, &[]), Err(PolicyViolation::NothingSelected));
    }

    #[test]
    fn drafts_only_for_numbered_groups_in_cheque_batches() {
        let candidates = vec![
            candidate("r-1", vendor("1", "A"), "1.00"),
            candidate("r-2", vendor("2", "B"), "2.00"),
        ];
        let groups = group_by_payee(&candidates, &ids(&["r-1", "r-2"])).expect("groups");
        let mut numbers = BTreeMap::new();
        numbers.insert(groups[0].payee_key.clone(), " 000123 ".to_owned());
        numbers.insert(groups[1].payee_key.clone(), "   ".to_owned());

        let batch = cheque_batch(BatchType::Cheque, &["r-1", "r-2"]);
        let drafts = draft_cheques(&account(), &batch, &groups, &numbers).expect("drafts");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].cheque_number, "000123");

        let eft = cheque_batch(BatchType::Eft, &["r-1", "r-2"]);
        assert_eq!(
            draft_cheques(&account(), &eft, &groups, &numbers),
            Err(PolicyViolation::NotAChequeBatch)
        );

        let partial = cheque_batch(BatchType::Cheque, &["r-1"]);
        assert_eq!(
            draft_cheques(&account(), &partial, &groups, &numbers),
            Err(PolicyViolation::NotInBatch(RequisitionId("r-2".to_owned())))
        );
    }

    #[test]
    fn cheque_lifecycle_is_linear_and_voidable() {
        let cheque = Cheque {
            id: ChequeId("c-1".to_owned()),
            number: "000123".to_owned(),
            status: ChequeStatus::Draft,
            payee: vendor("1", "A"),
            total_amount: Money::parse("1.00").expect("money"),
            requisition_ids: ids(&["r-1"]),
            batch_id: Some(BatchId("b-1".to_owned())),
            void_reason: None,
        };
        let actor = account();

        assert!(matches!(
            ChequeFlow.evaluate(&actor, &cheque, &ChequeAction::MarkPrinted),
            Err(PolicyViolation::WrongStatus { .. })
        ));

        let plan = ChequeFlow.evaluate(&actor, &cheque, &ChequeAction::MarkPending).expect("pending");
        let pending = ChequeFlow.project(&cheque, &actor, &plan, Utc::now());
        assert_eq!(pending.status, ChequeStatus::Pending);

        let void = ChequeAction::Void { reason: "misprint".to_owned() };
        let plan = ChequeFlow.evaluate(&actor, &pending, &void).expect("void");
        let voided = ChequeFlow.project(&pending, &actor, &plan, Utc::now());
        assert_eq!(voided.status, ChequeStatus::Void);
        assert_eq!(voided.void_reason.as_deref(), Some("misprint"));

        assert!(ChequeFlow.evaluate(&actor, &voided, &void).is_err());
        assert_eq!(
            ChequeFlow.evaluate(&actor, &pending, &ChequeAction::Void { reason: String::new() }),
            Err(PolicyViolation::MissingReason { action: "void" })
        );
    }
}
