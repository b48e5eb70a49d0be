pub mod audit;
pub mod authorization;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod money;
pub mod routes;
pub mod session;

pub use authorization::{Capability, Permission, ThresholdCheck};
pub use domain::batch::{Batch, BatchId, BatchStatus, BatchType};
pub use domain::cheque::{Cheque, ChequeId, ChequeStatus};
pub use domain::payee::{Payee, PayeeKey, PayeeType};
pub use domain::requisition::{PaymentType, Requisition, RequisitionId, RequisitionStatus};
pub use domain::user::{Role, Threshold, User, UserId};
pub use domain::{EntityKind, EntityRef};
pub use errors::{ActionError, ApiError, DomainError, ErrorKind, PolicyViolation};
pub use flows::{
    BatchAction, BatchFlow, ChequeAction, ChequeFlow, FlowEngine, LifecycleDefinition,
    RequisitionAction, RequisitionFlow, TransitionPlan,
};
pub use money::{Money, MoneyError};
pub use routes::{guard, Access, RouteDecision, View};
pub use session::{SessionEvent, SessionState, SessionStorage, SessionStore};
