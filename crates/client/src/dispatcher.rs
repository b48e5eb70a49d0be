//! Turns a locally legal transition into exactly one API call and reconciles
//! the entity cache with whatever the server answers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use reqflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use reqflow_core::domain::batch::{Batch, BatchId, BatchType};
use reqflow_core::domain::cheque::{Cheque, ChequeId};
use reqflow_core::domain::payee::PayeeKey;
use reqflow_core::domain::requisition::{Requisition, RequisitionId};
use reqflow_core::domain::user::User;
use reqflow_core::domain::EntityRef;
use reqflow_core::errors::{ActionError, ApiError, PolicyViolation};
use reqflow_core::flows::batch::{self as batch_flow, evaluate_bulk_approval};
use reqflow_core::flows::cheque::{authorize_generation, draft_cheques, group_by_payee};
use reqflow_core::flows::{
    BatchAction, BatchFlow, ChequeAction, ChequeCandidate, ChequeFlow, ChequeGroup, FlowEngine,
    RequisitionAction, RequisitionFlow,
};
use reqflow_core::session::{Session, SessionStorage, SessionStore};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{Cacheable, CachedEntity, EntityCache, ListKey, ListResource};
use crate::endpoints::{self, EndpointMap, ListEnvelope, LoginResponse, SignatureRecord};
use crate::transport::{normalize_error_message, ApiRequest, ApiTransport};

const GENERATE_CHEQUES: &str = "generate cheques";

#[derive(Clone, Debug, PartialEq)]
pub enum MutationState {
    /// Request outstanding; `projected` is what the entity should look like
    /// if the server agrees. It never enters the cache.
    Pending { label: &'static str, projected: CachedEntity },
    Confirmed { label: &'static str },
    Failed { label: &'static str, error: ActionError },
}

impl MutationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending { label, .. } | Self::Confirmed { label } | Self::Failed { label, .. } => {
                label
            }
        }
    }
}

/// Latest mutation per entity. At most one may be pending for a given entity.
#[derive(Debug, Default)]
pub struct MutationTracker {
    states: Mutex<HashMap<EntityRef, MutationState>>,
}

impl MutationTracker {
    fn lock(&self) -> MutexGuard<'_, HashMap<EntityRef, MutationState>> {
        match self.states.lock() {
            Ok(states) => states,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims every entity or none of them.
    fn begin(&self, claims: Vec<(EntityRef, &'static str, CachedEntity)>) -> Result<(), ActionError> {
        let mut states = self.lock();
        if let Some((entity, _, _)) = claims
            .iter()
            .find(|(entity, _, _)| states.get(entity).is_some_and(MutationState::is_pending))
        {
            return Err(ActionError::OperationInProgress { entity: entity.clone() });
        }
        for (entity, label, projected) in claims {
            states.insert(entity, MutationState::Pending { label, projected });
        }
        Ok(())
    }

    fn settle(&self, entity: &EntityRef, label: &'static str, error: Option<ActionError>) {
        let state = match error {
            None => MutationState::Confirmed { label },
            Some(error) => MutationState::Failed { label, error },
        };
        self.lock().insert(entity.clone(), state);
    }

    pub fn state(&self, entity: &EntityRef) -> Option<MutationState> {
        self.lock().get(entity).cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|state| state.is_pending()).count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BulkItemStatus {
    Approved,
    Rejected { message: String },
    /// The server enumerated outcomes but left this batch out.
    Unreported,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkItemOutcome {
    pub batch_id: BatchId,
    pub status: BulkItemStatus,
    pub batch: Option<Batch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BulkApprovalOutcome {
    /// Whether the response listed per-batch results. Without them the
    /// request succeeded or failed as a whole.
    pub itemized: bool,
    pub items: Vec<BulkItemOutcome>,
}

impl BulkApprovalOutcome {
    pub fn all_approved(&self) -> bool {
        self.items.iter().all(|item| item.status == BulkItemStatus::Approved)
    }

    pub fn approved(&self) -> impl Iterator<Item = &BatchId> + '_ {
        self.items
            .iter()
            .filter(|item| item.status == BulkItemStatus::Approved)
            .map(|item| &item.batch_id)
    }
}

/// Reads a bulk-approve response without assuming partial success.
pub fn interpret_bulk_response(requested: &[BatchId], body: &Value) -> BulkApprovalOutcome {
    let attached: HashMap<BatchId, Batch> = body
        .get("batches")
        .cloned()
        .and_then(|batches| serde_json::from_value::<Vec<Batch>>(batches).ok())
        .unwrap_or_default()
        .into_iter()
        .map(|batch| (batch.id.clone(), batch))
        .collect();

    let Some(results) = body.get("results").and_then(Value::as_array) else {
        let items = requested
            .iter()
            .map(|batch_id| BulkItemOutcome {
                batch_id: batch_id.clone(),
                status: BulkItemStatus::Approved,
                batch: attached.get(batch_id).cloned(),
            })
            .collect();
        return BulkApprovalOutcome { itemized: false, items };
    };

    let mut reported: HashMap<BatchId, (BulkItemStatus, Option<Batch>)> = HashMap::new();
    for entry in results {
        let Some(batch_id) = entry
            .get("batch_id")
            .or_else(|| entry.get("id"))
            .and_then(Value::as_str)
            .map(|id| BatchId(id.to_owned()))
        else {
            continue;
        };
        let succeeded = entry
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| entry.get("error").is_none());
        let status = if succeeded {
            BulkItemStatus::Approved
        } else {
            BulkItemStatus::Rejected { message: normalize_error_message(Some(entry), None) }
        };
        let batch = entry
            .get("batch")
            .cloned()
            .and_then(|batch| serde_json::from_value::<Batch>(batch).ok())
            .or_else(|| attached.get(&batch_id).cloned());
        reported.insert(batch_id, (status, batch));
    }

    let items = requested
        .iter()
        .map(|batch_id| {
            let (status, batch) = reported
                .remove(batch_id)
                .unwrap_or((BulkItemStatus::Unreported, None));
            BulkItemOutcome { batch_id: batch_id.clone(), status, batch }
        })
        .collect();
    BulkApprovalOutcome { itemized: true, items }
}

/// Bookkeeping for one outstanding request.
struct InFlight {
    label: &'static str,
    generation: u64,
    correlation_id: String,
    actor: String,
}

pub struct ActionDispatcher<T, S> {
    transport: Arc<T>,
    session: Arc<SessionStore<S>>,
    cache: Arc<EntityCache>,
    mutations: Arc<MutationTracker>,
    audit: Arc<dyn AuditSink>,
}

impl<T, S> Clone for ActionDispatcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            session: Arc::clone(&self.session),
            cache: Arc::clone(&self.cache),
            mutations: Arc::clone(&self.mutations),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<T, S> ActionDispatcher<T, S>
where
    T: ApiTransport + 'static,
    S: SessionStorage + 'static,
{
    pub fn new(transport: Arc<T>, session: Arc<SessionStore<S>>) -> Self {
        Self {
            transport,
            session,
            cache: Arc::new(EntityCache::new()),
            mutations: Arc::new(MutationTracker::default()),
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn session(&self) -> &SessionStore<S> {
        &self.session
    }

    pub fn mutation_state(&self, entity: &EntityRef) -> Option<MutationState> {
        self.mutations.state(entity)
    }

    pub fn in_flight(&self) -> usize {
        self.mutations.in_flight()
    }

    // Session

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ActionError> {
        let request = ApiRequest::post(
            endpoints::LOGIN,
            json!({ "username": username, "password": password }),
        )
        .with_correlation_id(Uuid::new_v4().to_string());

        let body = self.transport.send(request).await.map_err(|error| match error {
            // A 401 here means bad credentials, not an expired session.
            ApiError::AuthExpired => ActionError::ValidationRejected {
                message: "Invalid username or password.".to_owned(),
                fields: BTreeMap::new(),
            },
            other => ActionError::from(other),
        })?;
        let LoginResponse { token, user } = decode(body, "sign-in response")?;

        self.cache.clear().await;
        let session = self
            .session
            .login(SecretString::from(token), user)
            .map_err(|error| ActionError::ServerFault {
                message: format!("could not store the session: {error}"),
            })?;
        self.audit.emit(
            AuditEvent::new(
                None,
                "",
                "session.signed_in",
                AuditCategory::Session,
                session.user.id.to_string(),
                AuditOutcome::Success,
            )
            .with_metadata("generation", session.generation.to_string()),
        );
        Ok(session)
    }

    /// Best-effort server logout; local teardown always happens.
    pub async fn logout(&self) {
        if let Some(session) = self.session.current() {
            let request = ApiRequest::post(endpoints::LOGOUT, json!({}))
                .with_bearer(session.token.clone())
                .with_correlation_id(Uuid::new_v4().to_string());
            if let Err(error) = self.transport.send(request).await {
                warn!(event_name = "session.logout_request_failed", error = %error, "server logout failed");
            }
            self.audit.emit(AuditEvent::new(
                None,
                "",
                "session.signed_out",
                AuditCategory::Session,
                session.user.id.to_string(),
                AuditOutcome::Success,
            ));
        }
        self.session.logout();
        self.cache.clear().await;
    }

    pub async fn refresh_profile(&self) -> Result<User, ActionError> {
        let (body, generation) = self.authorized(ApiRequest::get(endpoints::PROFILE)).await?;
        let user: User = decode(body, "profile")?;
        if !self.still_signed_in(generation) {
            return Err(ActionError::NotAuthenticated);
        }
        self.session.refresh_user(user.clone()).map_err(|error| ActionError::ServerFault {
            message: format!("could not store the profile: {error}"),
        })?;
        Ok(user)
    }

    // Reads

    pub async fn fetch_requisition(&self, id: &RequisitionId) -> Result<Requisition, ActionError> {
        self.fetch::<RequisitionFlow>(&id.0).await
    }

    pub async fn fetch_batch(&self, id: &BatchId) -> Result<Batch, ActionError> {
        self.fetch::<BatchFlow>(&id.0).await
    }

    pub async fn fetch_cheque(&self, id: &ChequeId) -> Result<Cheque, ActionError> {
        self.fetch::<ChequeFlow>(&id.0).await
    }

    pub async fn list_requisitions(
        &self,
        filters: BTreeMap<String, String>,
    ) -> Result<Vec<Requisition>, ActionError> {
        self.list(ListResource::Requisitions, endpoints::REQUISITIONS, filters).await
    }

    pub async fn list_batches(
        &self,
        filters: BTreeMap<String, String>,
    ) -> Result<Vec<Batch>, ActionError> {
        self.list(ListResource::Batches, endpoints::BATCHES, filters).await
    }

    pub async fn list_cheque_drafts(&self, batch: Option<&BatchId>) -> Result<Vec<Cheque>, ActionError> {
        let filters = batch
            .map(|id| BTreeMap::from([("batch".to_owned(), id.0.clone())]))
            .unwrap_or_default();
        self.list(ListResource::ChequeDrafts, endpoints::CHEQUE_DRAFTS, filters).await
    }

    pub async fn my_pending_signatures(&self) -> Result<Vec<Batch>, ActionError> {
        self.list(ListResource::PendingSignatures, endpoints::SIGNATURES_PENDING, BTreeMap::new())
            .await
    }

    pub async fn my_signature_history(&self) -> Result<Vec<SignatureRecord>, ActionError> {
        let (body, _) = self.authorized(ApiRequest::get(endpoints::SIGNATURES_HISTORY)).await?;
        Ok(decode::<ListEnvelope<SignatureRecord>>(body, "signature history")?.into_vec())
    }

    /// Requisitions that can go into a new batch. Both lists load concurrently.
    pub async fn ready_pool(&self, batch_type: Option<BatchType>) -> Result<Vec<Requisition>, ActionError> {
        let (requisitions, batches) = tokio::try_join!(
            self.list_requisitions(BTreeMap::new()),
            self.list_batches(BTreeMap::new()),
        )?;
        Ok(batch_flow::ready_pool(&requisitions, &batches, batch_type).into_iter().cloned().collect())
    }

    // Transitions

    pub async fn transition_requisition(
        &self,
        requisition: &Requisition,
        action: RequisitionAction,
    ) -> Result<Requisition, ActionError> {
        self.transition(RequisitionFlow, requisition, action).await
    }

    pub async fn transition_batch(
        &self,
        batch: &Batch,
        action: BatchAction,
    ) -> Result<Batch, ActionError> {
        self.transition(BatchFlow, batch, action).await
    }

    pub async fn transition_cheque(
        &self,
        cheque: &Cheque,
        action: ChequeAction,
    ) -> Result<Cheque, ActionError> {
        self.transition(ChequeFlow, cheque, action).await
    }

    /// Approves several batches in one request.
    pub async fn bulk_approve_signatures(
        &self,
        batches: &[Batch],
        comment: Option<&str>,
    ) -> Result<BulkApprovalOutcome, ActionError> {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        let correlation_id = Uuid::new_v4().to_string();
        let actor = session.user.id.to_string();

        let mut seen = HashSet::new();
        let batches: Vec<Batch> =
            batches.iter().filter(|batch| seen.insert(batch.id.clone())).cloned().collect();
        let plans = match evaluate_bulk_approval(&session.user, &batches, comment) {
            Ok(plans) => plans,
            Err(violation) => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id.as_str(),
                        "batch.bulk_approval_rejected",
                        AuditCategory::Batch,
                        actor.as_str(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", violation.to_string()),
                );
                return Err(violation.into());
            }
        };

        let engine = FlowEngine::new(BatchFlow);
        let claims = batches
            .iter()
            .zip(&plans)
            .map(|(batch, plan)| {
                (plan.entity.clone(), plan.label, engine.project(batch, &session.user, plan).into_cached())
            })
            .collect();
        self.mutations.begin(claims)?;

        let batch_ids: Vec<BatchId> = batches.iter().map(|batch| batch.id.clone()).collect();
        let mut body = json!({ "batch_ids": batch_ids });
        if let Some(comment) = comment.map(str::trim).filter(|comment| !comment.is_empty()) {
            body["comment"] = json!(comment);
        }
        let request = ApiRequest::post(endpoints::SIGNATURES_BULK_APPROVE, body)
            .with_bearer(session.token.clone())
            .with_correlation_id(correlation_id.clone());
        let flight = InFlight {
            label: plans.first().map(|plan| plan.label).unwrap_or("approve the batch"),
            generation: session.generation,
            correlation_id,
            actor,
        };

        info!(
            event_name = "dispatch.bulk_sent",
            correlation_id = %flight.correlation_id,
            batches = batch_ids.len(),
            "bulk approval sent"
        );
        let claimed: Vec<EntityRef> = batch_ids.iter().cloned().map(EntityRef::Batch).collect();
        let label = flight.label;
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let outcome = dispatcher.transport.send(request).await;
            dispatcher.reconcile_bulk(flight, batch_ids, outcome).await
        });
        task.await.unwrap_or_else(|error| Err(self.task_lost(&claimed, label, error)))
    }

    // Cheques

    /// Groups selected batch members by payee. Pure; nothing is sent.
    pub fn preview_cheque_groups(
        &self,
        batch: &Batch,
        requisitions: &[Requisition],
        selected: &[RequisitionId],
    ) -> Result<Vec<ChequeGroup>, ActionError> {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        authorize_generation(&session.user, batch)?;
        if let Some(outside) = selected.iter().find(|id| !batch.contains_active(id)) {
            return Err(PolicyViolation::NotInBatch(outside.clone()).into());
        }
        let candidates: Vec<ChequeCandidate> =
            requisitions.iter().map(ChequeCandidate::from).collect();
        Ok(group_by_payee(&candidates, selected)?)
    }

    /// Server-side grouping for the same selection.
    pub async fn fetch_cheque_preview(
        &self,
        batch: &Batch,
        selected: &[RequisitionId],
    ) -> Result<Vec<ChequeGroup>, ActionError> {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        authorize_generation(&session.user, batch)?;
        if selected.is_empty() {
            return Err(PolicyViolation::NothingSelected.into());
        }
        let request = ApiRequest::post(
            endpoints::CHEQUE_PREVIEW_GROUPS,
            json!({ "batch_id": batch.id, "requisition_ids": selected }),
        );
        let (body, _) = self.authorized(request).await?;
        Ok(decode::<ListEnvelope<ChequeGroup>>(body, "cheque preview")?.into_vec())
    }

    /// Creates one cheque per group that has a cheque number.
    pub async fn generate_cheques(
        &self,
        batch: &Batch,
        groups: &[ChequeGroup],
        numbers: &BTreeMap<PayeeKey, String>,
    ) -> Result<Vec<Cheque>, ActionError> {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        let drafts = draft_cheques(&session.user, batch, groups, numbers)?;
        let entity = batch.cache_ref();
        self.mutations.begin(vec![(entity.clone(), GENERATE_CHEQUES, batch.clone().into_cached())])?;

        let correlation_id = Uuid::new_v4().to_string();
        let cheques: Vec<Value> = drafts
            .iter()
            .map(|draft| {
                json!({
                    "cheque_number": draft.cheque_number,
                    "payee_type": draft.payee_key.payee_type,
                    "payee_id": draft.payee_key.payee_id,
                    "requisition_ids": draft.requisition_ids,
                    "total_amount": draft.total,
                })
            })
            .collect();
        let request = ApiRequest::post(
            endpoints::CHEQUE_GENERATE,
            json!({ "batch_id": batch.id, "cheques": cheques }),
        )
        .with_bearer(session.token.clone())
        .with_correlation_id(correlation_id.clone());
        let flight = InFlight {
            label: GENERATE_CHEQUES,
            generation: session.generation,
            correlation_id,
            actor: session.user.id.to_string(),
        };
        let mut stale = vec![entity.clone()];
        stale.extend(batch.dependents());

        let claimed = [entity.clone()];
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let body = match dispatcher.transport.send(request).await {
                Ok(body) => body,
                Err(error) => return Err(dispatcher.fail(&[entity], &flight, error).await),
            };
            // Server-side effect is unknown until the batch and drafts reload.
            for stale in &stale {
                dispatcher.cache.invalidate(stale).await;
            }
            dispatcher.cache.invalidate_lists(ListResource::ChequeDrafts).await;
            dispatcher.cache.invalidate_lists(ListResource::Batches).await;
            let cheques = match decode::<ListEnvelope<Cheque>>(body, "cheque list") {
                Ok(envelope) => envelope.into_vec(),
                Err(error) => return Err(dispatcher.record_failure(&[entity], &flight, error)),
            };
            if dispatcher.still_signed_in(flight.generation) {
                for cheque in &cheques {
                    dispatcher.cache.store(cheque.clone()).await;
                }
            }
            dispatcher.confirm(&entity, &flight);
            Ok(cheques)
        });
        task.await.unwrap_or_else(|error| Err(self.task_lost(&claimed, GENERATE_CHEQUES, error)))
    }

    // Internals

    async fn transition<F>(
        &self,
        flow: F,
        entity: &F::Entity,
        action: F::Action,
    ) -> Result<F::Entity, ActionError>
    where
        F: EndpointMap + Send + Sync + 'static,
        F::Entity: Cacheable + DeserializeOwned,
    {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        let correlation_id = Uuid::new_v4().to_string();
        let engine = FlowEngine::new(flow);
        let context = AuditContext::new(None, correlation_id.clone(), session.user.id.to_string());
        let plan = engine.evaluate_with_audit(
            &session.user,
            entity,
            &action,
            &*self.audit,
            &context,
        )?;

        let projected = engine.project(entity, &session.user, &plan);
        self.mutations.begin(vec![(plan.entity.clone(), plan.label, projected.into_cached())])?;

        let request = ApiRequest::post(F::action_path(plan.entity.id(), &plan.action), plan.payload.clone())
            .with_bearer(session.token.clone())
            .with_correlation_id(correlation_id.clone());
        let target = plan.entity.clone();
        let stale = entity.dependents();
        let flight = InFlight {
            label: plan.label,
            generation: session.generation,
            correlation_id,
            actor: session.user.id.to_string(),
        };

        info!(
            event_name = "dispatch.sent",
            correlation_id = %flight.correlation_id,
            entity = %target,
            action = plan.label,
            "transition sent"
        );
        // Detached so the cache still reconciles if the caller stops waiting.
        let claimed = [target.clone()];
        let label = flight.label;
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            let outcome = dispatcher.transport.send(request).await;
            dispatcher.reconcile::<F>(target, stale, flight, outcome).await
        });
        task.await.unwrap_or_else(|error| Err(self.task_lost(&claimed, label, error)))
    }

    async fn reconcile<F>(
        &self,
        target: EntityRef,
        stale: Vec<EntityRef>,
        flight: InFlight,
        outcome: Result<Value, ApiError>,
    ) -> Result<F::Entity, ActionError>
    where
        F: EndpointMap,
        F::Entity: Cacheable + DeserializeOwned,
    {
        let body = match outcome {
            Ok(body) => body,
            Err(error) => return Err(self.fail(&[target], &flight, error).await),
        };

        let returned = serde_json::from_value::<F::Entity>(body)
            .ok()
            .filter(|entity| entity.cache_ref() == target);
        let server = match returned {
            Some(server) => server,
            None => {
                // Applied, but the body did not describe the entity; reload it.
                warn!(
                    event_name = "dispatch.unreadable_confirmation",
                    correlation_id = %flight.correlation_id,
                    entity = %target,
                    "reloading entity after unreadable confirmation"
                );
                self.cache.invalidate(&target).await;
                for stale in &stale {
                    self.cache.invalidate(stale).await;
                }
                self.confirm(&target, &flight);
                return self.fetch::<F>(target.id()).await.map_err(|error| match error {
                    ActionError::AuthExpired | ActionError::NotAuthenticated => error,
                    other => ActionError::TransientNetwork {
                        message: other.to_string(),
                        outcome_unknown: true,
                    },
                });
            }
        };

        for stale in stale.iter().chain(&server.dependents()) {
            self.cache.invalidate(stale).await;
        }
        for list in F::Entity::related_lists() {
            self.cache.invalidate_lists(*list).await;
        }
        if self.still_signed_in(flight.generation) {
            self.cache.store(server.clone()).await;
        }
        self.confirm(&target, &flight);
        Ok(server)
    }

    async fn reconcile_bulk(
        &self,
        flight: InFlight,
        batch_ids: Vec<BatchId>,
        outcome: Result<Value, ApiError>,
    ) -> Result<BulkApprovalOutcome, ActionError> {
        let targets: Vec<EntityRef> = batch_ids.iter().cloned().map(EntityRef::Batch).collect();
        let body = match outcome {
            Ok(body) => body,
            Err(error) => return Err(self.fail(&targets, &flight, error).await),
        };

        let outcome = interpret_bulk_response(&batch_ids, &body);
        let signed_in = self.still_signed_in(flight.generation);
        for item in &outcome.items {
            let entity = EntityRef::Batch(item.batch_id.clone());
            match &item.batch {
                Some(batch) if signed_in => self.cache.store(batch.clone()).await,
                _ => self.cache.invalidate(&entity).await,
            }
            let error = match &item.status {
                BulkItemStatus::Approved => None,
                BulkItemStatus::Rejected { message } => Some(ActionError::ValidationRejected {
                    message: message.clone(),
                    fields: BTreeMap::new(),
                }),
                BulkItemStatus::Unreported => Some(ActionError::TransientNetwork {
                    message: "The server did not report an outcome for this batch.".to_owned(),
                    outcome_unknown: true,
                }),
            };
            self.mutations.settle(&entity, flight.label, error);
        }
        for list in Batch::related_lists() {
            self.cache.invalidate_lists(*list).await;
        }

        self.audit.emit(
            AuditEvent::new(
                None,
                flight.correlation_id.as_str(),
                "dispatch.bulk_confirmed",
                AuditCategory::Dispatch,
                flight.actor.as_str(),
                AuditOutcome::Success,
            )
            .with_metadata("itemized", outcome.itemized.to_string())
            .with_metadata("approved", outcome.approved().count().to_string())
            .with_metadata("requested", outcome.items.len().to_string()),
        );
        Ok(outcome)
    }

    async fn fetch<F>(&self, id: &str) -> Result<F::Entity, ActionError>
    where
        F: EndpointMap,
        F::Entity: Cacheable + DeserializeOwned,
    {
        let (body, generation) = self.authorized(ApiRequest::get(F::detail_path(id))).await?;
        let entity: F::Entity = decode(body, "record")?;
        if self.still_signed_in(generation) {
            self.cache.store(entity.clone()).await;
        }
        Ok(entity)
    }

    async fn list<E>(
        &self,
        resource: ListResource,
        path: &str,
        filters: BTreeMap<String, String>,
    ) -> Result<Vec<E>, ActionError>
    where
        E: Cacheable + DeserializeOwned,
    {
        let (body, generation) =
            self.authorized(ApiRequest::get(path).with_query(&filters)).await?;
        let items = decode::<ListEnvelope<E>>(body, "list")?.into_vec();
        if self.still_signed_in(generation) {
            self.cache.store_list(ListKey { resource, filters }, items.clone()).await;
        }
        Ok(items)
    }

    /// Sends a read with the current session's credential. Hands back the
    /// generation that issued it; results from an older one must not be cached.
    async fn authorized(&self, request: ApiRequest) -> Result<(Value, u64), ActionError> {
        let session = self.session.current().ok_or(ActionError::NotAuthenticated)?;
        let request = request
            .with_bearer(session.token.clone())
            .with_correlation_id(Uuid::new_v4().to_string());
        match self.transport.send(request).await {
            Ok(body) => Ok((body, session.generation)),
            Err(error) => {
                if error == ApiError::AuthExpired {
                    self.expire_session(session.generation).await;
                }
                Err(error.into())
            }
        }
    }

    fn still_signed_in(&self, generation: u64) -> bool {
        self.session.current().is_some_and(|session| session.generation == generation)
    }

    fn confirm(&self, entity: &EntityRef, flight: &InFlight) {
        self.mutations.settle(entity, flight.label, None);
        info!(
            event_name = "dispatch.confirmed",
            correlation_id = %flight.correlation_id,
            entity = %entity,
            action = flight.label,
            "server confirmed transition"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(entity.clone()),
                flight.correlation_id.as_str(),
                "dispatch.confirmed",
                AuditCategory::Dispatch,
                flight.actor.as_str(),
                AuditOutcome::Success,
            )
            .with_metadata("action", flight.label),
        );
    }

    /// Failure path shared by every mutation: cache untouched, mutation
    /// marked failed, and a 401 tears the session down once.
    async fn fail(&self, targets: &[EntityRef], flight: &InFlight, error: ApiError) -> ActionError {
        if error == ApiError::AuthExpired {
            self.expire_session(flight.generation).await;
        }
        self.record_failure(targets, flight, ActionError::from(error))
    }

    fn record_failure(&self, targets: &[EntityRef], flight: &InFlight, error: ActionError) -> ActionError {
        for target in targets {
            self.mutations.settle(target, flight.label, Some(error.clone()));
            warn!(
                event_name = "dispatch.failed",
                correlation_id = %flight.correlation_id,
                entity = %target,
                action = flight.label,
                kind = ?error.kind(),
                error = %error,
                "transition failed"
            );
            self.audit.emit(
                AuditEvent::new(
                    Some(target.clone()),
                    flight.correlation_id.as_str(),
                    "dispatch.failed",
                    AuditCategory::Dispatch,
                    flight.actor.as_str(),
                    AuditOutcome::Failed,
                )
                .with_metadata("action", flight.label)
                .with_metadata("error", error.to_string()),
            );
        }
        error
    }

    /// The request task panicked or was aborted; release its claims so the
    /// entities accept new actions.
    fn task_lost(
        &self,
        claimed: &[EntityRef],
        label: &'static str,
        error: tokio::task::JoinError,
    ) -> ActionError {
        let error = ActionError::ServerFault {
            message: format!("the request task stopped unexpectedly: {error}"),
        };
        for entity in claimed {
            self.mutations.settle(entity, label, Some(error.clone()));
            warn!(
                event_name = "dispatch.task_lost",
                entity = %entity,
                action = label,
                error = %error,
                "request task lost"
            );
        }
        error
    }

    async fn expire_session(&self, generation: u64) {
        if self.session.expire(generation) {
            self.cache.clear().await;
            self.audit.emit(
                AuditEvent::new(
                    None,
                    "",
                    "session.expired",
                    AuditCategory::Session,
                    "system",
                    AuditOutcome::Failed,
                )
                .with_metadata("generation", generation.to_string()),
            );
        }
    }
}

fn decode<D: DeserializeOwned>(body: Value, what: &str) -> Result<D, ActionError> {
    serde_json::from_value(body).map_err(|error| {
        warn!(event_name = "dispatch.unreadable_response", what, error = %error, "unexpected response shape");
        ActionError::ServerFault { message: format!("The server returned an unreadable {what}.") }
    })
}
