use serde::{Deserialize, Serialize};

use crate::authorization::Capability;
use crate::domain::user::{Role, User};
use crate::session::SessionState;

pub const LOGIN_PATH: &str = "/login";
pub const LANDING_PATH: &str = "/dashboard";
/// Where role failures land. Always reachable by any signed-in user.
pub const FALLBACK_PATH: &str = "/requisitions/mine";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    PublicOnly,
    Authenticated,
    Approver,
    AccountRole,
    Signaturee,
}

impl Access {
    pub fn permits(self, user: &User) -> bool {
        match self {
            Self::PublicOnly | Self::Authenticated => true,
            Self::Approver => user.has_capability(Capability::Approve),
            Self::AccountRole => user.has_role(Role::Account),
            Self::Signaturee => user.has_capability(Capability::SignatureeAuthority),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Login,
    Dashboard,
    MyRequisitions,
    NewRequisition,
    RequisitionDetail,
    PendingApprovals,
    AccountConfirmations,
    ReadyPool,
    Batches,
    BatchDetail,
    DraftCheques,
    PendingSignatures,
    SignatureHistory,
    Profile,
}

/// Declarative view table. Literal segments are listed before the `:id`
/// pattern that would otherwise shadow them.
const VIEWS: &[(View, &str, Access)] = &[
    (View::Login, "/login", Access::PublicOnly),
    (View::Dashboard, "/dashboard", Access::Authenticated),
    (View::MyRequisitions, "/requisitions/mine", Access::Authenticated),
    (View::NewRequisition, "/requisitions/new", Access::Authenticated),
    (View::RequisitionDetail, "/requisitions/:id", Access::Authenticated),
    (View::PendingApprovals, "/approvals", Access::Approver),
    (View::AccountConfirmations, "/account/confirmations", Access::AccountRole),
    (View::ReadyPool, "/batches/ready", Access::AccountRole),
    (View::Batches, "/batches", Access::AccountRole),
    (View::BatchDetail, "/batches/:id", Access::AccountRole),
    (View::DraftCheques, "/cheques/drafts", Access::AccountRole),
    (View::PendingSignatures, "/signatures/pending", Access::Signaturee),
    (View::SignatureHistory, "/signatures/history", Access::Signaturee),
    (View::Profile, "/profile", Access::Authenticated),
];

impl View {
    pub fn all() -> impl Iterator<Item = Self> {
        VIEWS.iter().map(|(view, _, _)| *view)
    }

    fn entry(self) -> (&'static str, Access) {
        VIEWS
            .iter()
            .find(|(view, _, _)| *view == self)
            .map(|(_, pattern, access)| (*pattern, *access))
            .unwrap_or(("/", Access::Authenticated))
    }

    pub fn pattern(self) -> &'static str {
        self.entry().0
    }

    pub fn access(self) -> Access {
        self.entry().1
    }

    /// Matches a location (query and fragment ignored) against the table.
    pub fn resolve(location: &str) -> Option<RouteMatch> {
        let path = location.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();

        VIEWS.iter().find_map(|(view, pattern, _)| {
            let expected: Vec<&str> =
                pattern.split('/').filter(|segment| !segment.is_empty()).collect();
            if expected.len() != segments.len() {
                return None;
            }
            let mut id = None;
            for (want, got) in expected.iter().zip(&segments) {
                if *want == ":id" {
                    id = Some((*got).to_owned());
                } else if want != got {
                    return None;
                }
            }
            Some(RouteMatch { view: *view, id })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub view: View,
    pub id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    /// Session still resolving; render nothing view-specific.
    Loading,
    Render(RouteMatch),
    Redirect { to: String, return_to: Option<String> },
}

impl RouteDecision {
    fn redirect(to: &str, return_to: Option<String>) -> Self {
        Self::Redirect { to: to.to_owned(), return_to }
    }
}

pub fn guard(state: &SessionState, location: &str, return_to: Option<&str>) -> RouteDecision {
    let matched = View::resolve(location);

    let user = match state {
        SessionState::Initializing => return RouteDecision::Loading,
        SessionState::Unauthenticated => {
            return match matched {
                Some(route) if route.view.access() == Access::PublicOnly => {
                    RouteDecision::Render(route)
                }
                // Unknown paths get the same treatment so they reveal nothing.
                _ => RouteDecision::redirect(LOGIN_PATH, Some(location.to_owned())),
            };
        }
        SessionState::Authenticated(session) => &session.user,
    };

    match matched {
        Some(route) if route.view.access() == Access::PublicOnly => {
            let destination = return_to
                .filter(|candidate| is_safe_destination(candidate, user))
                .unwrap_or(LANDING_PATH);
            RouteDecision::redirect(destination, None)
        }
        Some(route) if route.view.access().permits(user) => RouteDecision::Render(route),
        Some(_) | None => RouteDecision::redirect(FALLBACK_PATH, None),
    }
}

/// A post-login destination must be an in-app path naming a known view the
/// user can open.
fn is_safe_destination(candidate: &str, user: &User) -> bool {
    if !candidate.starts_with('/') || candidate.starts_with("//") || candidate.contains('\\') {
        return false;
    }
    View::resolve(candidate).is_some_and(|route| {
        let access = route.view.access();
        access != Access::PublicOnly && access.permits(user)
    })
}
