//! Async API boundary for the requisition and batch lifecycles.

pub mod audit;
pub mod cache;
pub mod dispatcher;
pub mod endpoints;
pub mod scope;
pub mod transport;

pub use audit::TracingAuditSink;
pub use cache::{Cacheable, CachedEntity, EntityCache, ListKey, ListResource};
pub use dispatcher::{
    ActionDispatcher, BulkApprovalOutcome, BulkItemOutcome, BulkItemStatus, MutationState,
    MutationTracker,
};
pub use endpoints::EndpointMap;
pub use scope::{ScopeToken, ViewScope};
pub use transport::{ApiRequest, ApiTransport, HttpMethod, HttpTransport, TransportBuildError};
