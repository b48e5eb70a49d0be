use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authorization::{Capability, Permission};
use crate::domain::batch::BatchId;
use crate::domain::requisition::RequisitionId;
use crate::domain::user::Role;
use crate::domain::{EntityKind, EntityRef};
use crate::money::{Money, MoneyError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Submission,
    Approval,
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submission => f.write_str("submission"),
            Self::Approval => f.write_str("approval"),
        }
    }
}

/// A transition the client can already prove illegal. Never reaches the
/// network; the message tells the user what to change.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("cannot {action} a {entity} that is `{status}`")]
    WrongStatus { entity: EntityKind, action: &'static str, status: &'static str },
    #[error("only the current assignee can {action}")]
    NotAssignee { action: &'static str },
    #[error("only the creator can {action}")]
    NotCreator { action: &'static str },
    #[error("the `{role}` role is required to {action}")]
    MissingRole { action: &'static str, role: Role },
    #[error("the `{permission}` permission is required to {action}")]
    MissingPermission { action: &'static str, permission: Permission },
    #[error("{} is required to {action}", capability_label(.capability))]
    MissingCapability { action: &'static str, capability: Capability },
    #[error("{amount} exceeds your {kind} limit of {limit}")]
    ThresholdExceeded { kind: ThresholdKind, amount: Money, limit: Money },
    #[error("a reason is required to {action}")]
    MissingReason { action: &'static str },
    #[error("another user has already acted on this requisition, so it can no longer be recalled")]
    DownstreamActivity,
    #[error("a requisition cannot be forwarded to its own author")]
    ForwardToSelf,
    #[error("the batch has no active requisitions")]
    EmptyBatch,
    #[error("the batch needs between 1 and {available} required signatures, not {required}")]
    SignatureQuorumUnreachable { required: u32, available: usize },
    #[error("you are not a signaturee on this batch")]
    NotSignaturee,
    #[error("your signature on this batch is already recorded")]
    SignatureAlreadyRecorded,
    #[error("requisition {0} is already in the batch")]
    AlreadyInBatch(RequisitionId),
    #[error("requisition {0} is not an active member of the batch")]
    NotInBatch(RequisitionId),
    #[error("select at least one item first")]
    NothingSelected,
    #[error("requisition {0} is not part of the selection")]
    UnknownRequisition(RequisitionId),
    #[error("cheques can only be generated for cheque batches")]
    NotAChequeBatch,
    #[error("amounts in this selection are too large to total")]
    AmountOverflow,
    #[error("batch {batch}: {violation}")]
    BulkItem { batch: BatchId, violation: Box<PolicyViolation> },
}

fn capability_label(capability: &Capability) -> &'static str {
    match capability {
        Capability::Approve => "approval authority",
        Capability::SignatureeAuthority => "signaturee authority",
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Failure classification produced once, at the HTTP boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("the session is no longer valid")]
    AuthExpired,
    #[error("{message}")]
    ValidationRejected { status: u16, message: String, fields: BTreeMap<String, Vec<String>> },
    #[error("{message}")]
    TransientNetwork { message: String, outcome_unknown: bool },
    #[error("{message}")]
    ServerFault { status: u16, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LocalPolicyViolation,
    AuthExpired,
    ValidationRejected,
    TransientNetworkFailure,
    ServerFault,
}

/// What an action call site receives. Raw transport errors never escape.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error("an earlier action on {entity} is still in progress")]
    OperationInProgress { entity: EntityRef },
    #[error("sign in to continue")]
    NotAuthenticated,
    #[error("your session has expired, sign in again")]
    AuthExpired,
    #[error("{message}")]
    ValidationRejected { message: String, fields: BTreeMap<String, Vec<String>> },
    #[error("{message}")]
    TransientNetwork { message: String, outcome_unknown: bool },
    #[error("{message}")]
    ServerFault { message: String },
}

impl From<ApiError> for ActionError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::AuthExpired => Self::AuthExpired,
            ApiError::ValidationRejected { message, fields, .. } => {
                Self::ValidationRejected { message, fields }
            }
            ApiError::TransientNetwork { message, outcome_unknown } => {
                Self::TransientNetwork { message, outcome_unknown }
            }
            ApiError::ServerFault { message, .. } => Self::ServerFault { message },
        }
    }
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Policy(_) | Self::OperationInProgress { .. } | Self::NotAuthenticated => {
                ErrorKind::LocalPolicyViolation
            }
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetworkFailure,
            Self::ServerFault { .. } => ErrorKind::ServerFault,
        }
    }

    /// Whether the user may retry the same action by hand.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientNetwork { outcome_unknown, .. } => !outcome_unknown,
            Self::OperationInProgress { .. } => true,
            Self::Policy(_)
            | Self::NotAuthenticated
            | Self::AuthExpired
            | Self::ValidationRejected { .. }
            | Self::ServerFault { .. } => false,
        }
    }

    /// The server may or may not have applied the change; reload before acting again.
    pub fn requires_refresh(&self) -> bool {
        matches!(self, Self::TransientNetwork { outcome_unknown: true, .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::TransientNetwork { outcome_unknown: true, .. } => {
                "The request timed out and may or may not have been applied. Refresh before trying again."
                    .to_owned()
            }
            Self::TransientNetwork { .. } => {
                "The server could not be reached. Check your connection and try again.".to_owned()
            }
            Self::ServerFault { .. } => {
                "The server could not complete the request. Please try again later.".to_owned()
            }
            other => other.to_string(),
        }
    }
}
