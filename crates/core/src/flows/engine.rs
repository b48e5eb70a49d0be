use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::user::User;
use crate::domain::{EntityKind, EntityRef};
use crate::errors::PolicyViolation;
use crate::flows::batch::BatchFlow;
use crate::flows::cheque::ChequeFlow;
use crate::flows::requisition::RequisitionFlow;
use crate::flows::states::TransitionPlan;

/// One client-side lifecycle: which actions exist, who may take them, and
/// what the entity is expected to look like while the request is in flight.
pub trait LifecycleDefinition {
    type Entity: Clone;
    type Status: Copy + PartialEq + fmt::Display;
    type Action: Clone + fmt::Debug + Serialize;

    fn entity_kind(&self) -> EntityKind;
    fn entity_ref(&self, entity: &Self::Entity) -> EntityRef;
    fn status(&self, entity: &Self::Entity) -> Self::Status;

    fn evaluate(
        &self,
        actor: &User,
        entity: &Self::Entity,
        action: &Self::Action,
    ) -> Result<TransitionPlan<Self::Status, Self::Action>, PolicyViolation>;

    /// Expected entity after `plan`, for the pending mutation state only.
    fn project(
        &self,
        entity: &Self::Entity,
        actor: &User,
        plan: &TransitionPlan<Self::Status, Self::Action>,
        at: DateTime<Utc>,
    ) -> Self::Entity;
}

pub type Plan<F> =
    TransitionPlan<<F as LifecycleDefinition>::Status, <F as LifecycleDefinition>::Action>;

#[derive(Clone, Debug, Default)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: LifecycleDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn definition(&self) -> &F {
        &self.flow
    }

    pub fn evaluate(
        &self,
        actor: &User,
        entity: &F::Entity,
        action: &F::Action,
    ) -> Result<Plan<F>, PolicyViolation> {
        self.flow.evaluate(actor, entity, action)
    }

    pub fn project(&self, entity: &F::Entity, actor: &User, plan: &Plan<F>) -> F::Entity {
        self.flow.project(entity, actor, plan, Utc::now())
    }

    pub fn evaluate_with_audit<S>(
        &self,
        actor: &User,
        entity: &F::Entity,
        action: &F::Action,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Plan<F>, PolicyViolation>
    where
        S: AuditSink + ?Sized,
    {
        let kind = self.flow.entity_kind();
        let category = category_for(kind);
        let context = AuditContext { entity: Some(self.flow.entity_ref(entity)), ..audit.clone() };
        let result = self.evaluate(actor, entity, action);
        match &result {
            Ok(plan) => {
                sink.emit(
                    AuditEvent::from_context(
                        &context,
                        format!("{kind}.transition_planned"),
                        category,
                        AuditOutcome::Success,
                    )
                    .with_metadata("action", plan.label)
                    .with_metadata("from", plan.from.to_string())
                    .with_metadata("to", plan.to.to_string()),
                );
            }
            Err(violation) => {
                sink.emit(
                    AuditEvent::from_context(
                        &context,
                        format!("{kind}.transition_rejected"),
                        category,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("action", format!("{action:?}"))
                    .with_metadata("status", self.flow.status(entity).to_string())
                    .with_metadata("error", violation.to_string()),
                );
            }
        }
        result
    }
}

fn category_for(kind: EntityKind) -> AuditCategory {
    match kind {
        EntityKind::Requisition => AuditCategory::Requisition,
        EntityKind::Batch => AuditCategory::Batch,
        EntityKind::Cheque => AuditCategory::Cheque,
    }
}

pub type RequisitionEngine = FlowEngine<RequisitionFlow>;
pub type BatchEngine = FlowEngine<BatchFlow>;
pub type ChequeEngine = FlowEngine<ChequeFlow>;
