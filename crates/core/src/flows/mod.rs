pub mod batch;
pub mod cheque;
pub mod engine;
pub mod requisition;
pub mod states;

pub use batch::{BatchAction, BatchActionKind, BatchFlow};
pub use cheque::{ChequeAction, ChequeCandidate, ChequeDraft, ChequeFlow, ChequeGroup};
pub use engine::{
    BatchEngine, ChequeEngine, FlowEngine, LifecycleDefinition, Plan, RequisitionEngine,
};
pub use requisition::{RequisitionAction, RequisitionActionKind, RequisitionFlow};
pub use states::{Responsibility, TransitionPlan};
