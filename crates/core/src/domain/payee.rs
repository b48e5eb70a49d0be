use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeType {
    Vendor,
    Employee,
    Student,
    Other,
}

impl PayeeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::Employee => "employee",
            Self::Student => "student",
            Self::Other => "other",
        }
    }
}

/// Who gets paid. Each payee type carries its own name fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "payee_type", rename_all = "snake_case")]
pub enum Payee {
    Vendor {
        payee_id: String,
        vendor_name: String,
    },
    Employee {
        payee_id: String,
        first_name: String,
        last_name: String,
    },
    Student {
        payee_id: String,
        first_name: String,
        last_name: String,
        #[serde(default)]
        student_number: Option<String>,
    },
    Other {
        payee_id: String,
        name: String,
    },
}

impl Payee {
    pub fn payee_type(&self) -> PayeeType {
        match self {
            Self::Vendor { .. } => PayeeType::Vendor,
            Self::Employee { .. } => PayeeType::Employee,
            Self::Student { .. } => PayeeType::Student,
            Self::Other { .. } => PayeeType::Other,
        }
    }

    pub fn payee_id(&self) -> &str {
        match self {
            Self::Vendor { payee_id, .. }
            | Self::Employee { payee_id, .. }
            | Self::Student { payee_id, .. }
            | Self::Other { payee_id, .. } => payee_id,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Vendor { vendor_name, .. } => vendor_name.clone(),
            Self::Employee { first_name, last_name, .. }
            | Self::Student { first_name, last_name, .. } => {
                format!("{first_name} {last_name}").trim().to_owned()
            }
            Self::Other { name, .. } => name.clone(),
        }
    }

    pub fn key(&self) -> PayeeKey {
        PayeeKey { payee_type: self.payee_type(), payee_id: self.payee_id().to_owned() }
    }
}

/// Grouping key used when requisitions are collapsed into cheques.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayeeKey {
    pub payee_type: PayeeType,
    pub payee_id: String,
}

impl fmt::Display for PayeeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.payee_type.as_str(), self.payee_id)
    }
}

impl std::str::FromStr for PayeeKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) =
            value.split_once(':').ok_or_else(|| format!("payee key `{value}` must be type:id"))?;
        let payee_type = match kind.trim().to_ascii_lowercase().as_str() {
            "vendor" => PayeeType::Vendor,
            "employee" => PayeeType::Employee,
            "student" => PayeeType::Student,
            "other" => PayeeType::Other,
            other => return Err(format!("unknown payee type `{other}`")),
        };
        let payee_id = id.trim();
        if payee_id.is_empty() {
            return Err(format!("payee key `{value}` has an empty id"));
        }
        Ok(Self { payee_type, payee_id: payee_id.to_owned() })
    }
}
