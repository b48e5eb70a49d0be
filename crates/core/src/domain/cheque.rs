use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchId;
use crate::domain::payee::Payee;
use crate::domain::requisition::RequisitionId;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChequeId(pub String);

impl fmt::Display for ChequeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChequeStatus {
    Draft,
    Pending,
    Printed,
    Signed,
    Distributed,
    Cashed,
    Void,
}

impl ChequeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Printed => "printed",
            Self::Signed => "signed",
            Self::Distributed => "distributed",
            Self::Cashed => "cashed",
            Self::Void => "void",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cashed | Self::Void)
    }
}

impl fmt::Display for ChequeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cheque {
    pub id: ChequeId,
    pub number: String,
    pub status: ChequeStatus,
    pub payee: Payee,
    pub total_amount: Money,
    #[serde(default)]
    pub requisition_ids: Vec<RequisitionId>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub void_reason: Option<String>,
}
