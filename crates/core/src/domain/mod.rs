use std::fmt;

use serde::{Deserialize, Serialize};

pub mod batch;
pub mod cheque;
pub mod payee;
pub mod requisition;
pub mod user;

use batch::BatchId;
use cheque::ChequeId;
use requisition::RequisitionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Requisition,
    Batch,
    Cheque,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Requisition => "requisition",
            Self::Batch => "batch",
            Self::Cheque => "cheque",
        };
        f.write_str(label)
    }
}

/// Identity of a single cached entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Requisition(RequisitionId),
    Batch(BatchId),
    Cheque(ChequeId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Requisition(_) => EntityKind::Requisition,
            Self::Batch(_) => EntityKind::Batch,
            Self::Cheque(_) => EntityKind::Cheque,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Requisition(id) => &id.0,
            Self::Batch(id) => &id.0,
            Self::Cheque(id) => &id.0,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}
