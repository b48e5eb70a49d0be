use std::fmt;

use serde::{Deserialize, Serialize};

use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of roles the API can hand out. Roles this build does not know
/// about deserialize as `Unrecognized` and grant nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Reviewer,
    Manager,
    Account,
    Signaturee,
    Administrator,
    #[serde(other)]
    Unrecognized,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Reviewer => "reviewer",
            Self::Manager => "manager",
            Self::Account => "account",
            Self::Signaturee => "signaturee",
            Self::Administrator => "administrator",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    #[serde(default)]
    pub organization: Option<String>,
}

/// Per-user amount ceiling. `null` on the wire means no ceiling at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Money>", into = "Option<Money>")]
pub enum Threshold {
    #[default]
    Unlimited,
    Limit(Money),
}

impl From<Option<Money>> for Threshold {
    fn from(value: Option<Money>) -> Self {
        value.map_or(Self::Unlimited, Self::Limit)
    }
}

impl From<Threshold> for Option<Money> {
    fn from(value: Threshold) -> Self {
        match value {
            Threshold::Unlimited => None,
            Threshold::Limit(limit) => Some(limit),
        }
    }
}

/// Read-only snapshot of the signed-in user, refreshed on login and on
/// profile changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<RoleAssignment>,
    #[serde(default)]
    pub can_approve: bool,
    #[serde(default)]
    pub signaturee_authority: bool,
    #[serde(default)]
    pub max_submission_threshold: Threshold,
    #[serde(default)]
    pub max_approval_threshold: Threshold,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
}

impl User {
    pub fn primary_role(&self) -> Option<Role> {
        self.roles.first().map(|assignment| assignment.role)
    }

    pub fn organizations_for(&self, role: Role) -> impl Iterator<Item = &str> + '_ {
        self.roles
            .iter()
            .filter(move |assignment| assignment.role == role)
            .filter_map(|assignment| assignment.organization.as_deref())
    }
}
