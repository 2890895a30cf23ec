//! The inbox/outbox state machine.
//!
//! Every entry point walks `Received → Authenticated → Deduplicated →
//! Dispatched → (Forwarded | Delivered) → Done` and returns an [`Outcome`]
//! describing how far it got and what it changed.

use std::sync::Arc;

use apub_common::{AppError, AppResult, FederationConfig, IdGenerator};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::actor::Actor;
use crate::capability::{Access, Capabilities, InboundRequest};
use crate::codec::ActivityCodec;
use crate::delivery::{Deliverer, DeliveryReport};
use crate::directory::Directory;
use crate::dispatch::{Dispatcher, Effect, HandlerContext, Side};
use crate::forwarding::{ForwardingDecider, ForwardingDecision};
use crate::resolver::RecipientResolver;
use crate::store::{ActivityStore, PageRequest};
use crate::transport::Transport;
use crate::vocab::{
    Activity, ApObject, OrderedCollectionPage, Reference, StandardKind, is_object_type, page_iri,
};

/// The collaborators an engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub capabilities: Arc<dyn Capabilities>,
    pub codec: Arc<dyn ActivityCodec>,
    pub store: Arc<dyn ActivityStore>,
    pub directory: Arc<dyn Directory>,
    pub transport: Arc<dyn Transport>,
}

/// Classification of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Inbox receipt processed.
    Accepted,
    /// Already processed; nothing was done.
    Duplicate,
    /// Outbox post processed.
    Created,
    /// Read served.
    Ok,
    Unauthorized,
    Forbidden,
    BadRequest,
    NotFound,
    /// A handler failed after the pipeline started changing state.
    Failed,
    InternalError,
}

impl Status {
    fn from_error(error: &AppError) -> Self {
        match error {
            AppError::AuthenticationFailed => Self::Unauthorized,
            AppError::AuthorizationDenied(_) => Self::Forbidden,
            AppError::MalformedActivity(_) | AppError::Unprocessable(_) => Self::BadRequest,
            AppError::NotFound(_) | AppError::UnknownRecipient(_) => Self::NotFound,
            AppError::DispatchFailure { .. } => Self::Failed,
            _ => Self::InternalError,
        }
    }

    /// HTTP status for this classification.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Accepted | Self::Duplicate => StatusCode::ACCEPTED,
            Self::Created => StatusCode::CREATED,
            Self::Ok => StatusCode::OK,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Failed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Pipeline states. An outcome carries the last one reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Authenticated,
    Deduplicated,
    Dispatched,
    Forwarded,
    Delivered,
    Done,
}

/// How much of the operation took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// No state changed.
    Nothing,
    /// Some state changed, or some recipients were missed; see `effects` and `deliveries`.
    Partial,
    /// Fully succeeded.
    Complete,
}

/// Structured result of an entry point.
#[derive(Debug)]
pub struct Outcome {
    pub status: Status,
    pub stage: Stage,
    pub progress: Progress,
    pub activity_id: Option<Url>,
    pub effects: Vec<Effect>,
    pub deliveries: DeliveryReport,
    /// Where the created activity lives (outbox posts).
    pub location: Option<Url>,
    pub payload: Option<Value>,
    pub error: Option<AppError>,
}

impl Outcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Accumulates what an operation has done so far.
struct Run {
    stage: Stage,
    activity_id: Option<Url>,
    effects: Vec<Effect>,
    deliveries: DeliveryReport,
    changed: bool,
}

impl Run {
    const fn new() -> Self {
        Self {
            stage: Stage::Received,
            activity_id: None,
            effects: Vec::new(),
            deliveries: DeliveryReport {
                delivered: Vec::new(),
                failed: Vec::new(),
                abandoned: Vec::new(),
            },
            changed: false,
        }
    }

    fn reach(&mut self, stage: Stage) {
        debug!(activity_id = ?self.activity_id, stage = ?stage, "Stage reached");
        self.stage = stage;
    }

    fn fail(self, error: AppError) -> Outcome {
        if error.is_server_error() {
            warn!(activity_id = ?self.activity_id, stage = ?self.stage, error = %error, "Operation failed");
        } else {
            debug!(activity_id = ?self.activity_id, stage = ?self.stage, error = %error, "Operation rejected");
        }
        let changed = self.changed || !self.effects.is_empty() || !self.deliveries.is_empty();
        Outcome {
            status: Status::from_error(&error),
            stage: self.stage,
            progress: if changed {
                Progress::Partial
            } else {
                Progress::Nothing
            },
            activity_id: self.activity_id,
            effects: self.effects,
            deliveries: self.deliveries,
            location: None,
            payload: None,
            error: Some(error),
        }
    }

    fn finish(self, status: Status, location: Option<Url>, payload: Option<Value>) -> Outcome {
        let progress = if status == Status::Duplicate {
            Progress::Nothing
        } else if self.deliveries.is_complete() {
            Progress::Complete
        } else {
            Progress::Partial
        };
        Outcome {
            status,
            stage: Stage::Done,
            progress,
            activity_id: self.activity_id,
            effects: self.effects,
            deliveries: self.deliveries,
            location,
            payload,
            error: None,
        }
    }
}

/// Federation engine. Holds no per-request state; share it behind an `Arc`.
pub struct FederationEngine {
    capabilities: Arc<dyn Capabilities>,
    codec: Arc<dyn ActivityCodec>,
    store: Arc<dyn ActivityStore>,
    directory: Arc<dyn Directory>,
    dispatcher: Dispatcher,
    resolver: RecipientResolver,
    forwarder: ForwardingDecider,
    deliverer: Deliverer,
    config: FederationConfig,
    base_url: Url,
    ids: IdGenerator,
}

impl FederationEngine {
    /// Build an engine. The callback table is read once, here.
    #[must_use]
    pub fn new(collaborators: Collaborators, base_url: Url, config: FederationConfig) -> Self {
        let Collaborators {
            capabilities,
            codec,
            store,
            directory,
            transport,
        } = collaborators;

        let resolver = RecipientResolver::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&capabilities),
            config.prefer_shared_inbox,
            config.max_collection_pages,
        );
        let forwarder = ForwardingDecider::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&capabilities),
            resolver.clone(),
        );

        Self {
            dispatcher: Dispatcher::new(capabilities.callbacks()),
            deliverer: Deliverer::new(transport, config.delivery_concurrency),
            resolver,
            forwarder,
            capabilities,
            codec,
            store,
            directory,
            config,
            base_url,
            ids: IdGenerator::new(),
        }
    }

    /// The server base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The dispatcher, for inspecting routes.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Receive an activity into the inbox of local actor `actor`.
    pub async fn receive_inbox(&self, actor: &Url, request: &InboundRequest) -> Outcome {
        let mut run = Run::new();
        let cancel = CancellationToken::new();

        if let Err(e) = self.authenticate(request, Access::PostInbox, actor).await {
            return run.fail(e);
        }
        run.reach(Stage::Authenticated);

        let local = match self.local_actor(actor).await {
            Ok(local) => local,
            Err(e) => return run.fail(e),
        };

        let activity = match self.parse(&request.body) {
            Ok(activity) => activity,
            Err(e) => return run.fail(e),
        };
        let Some(id) = activity.id().cloned() else {
            return run.fail(AppError::MalformedActivity(
                "Received activity has no id".to_string(),
            ));
        };
        run.activity_id = Some(id.clone());
        let senders = activity.actors();
        if senders.is_empty() {
            return run.fail(AppError::MalformedActivity(
                "Received activity has no actor".to_string(),
            ));
        }

        match self.sender_blocked(&local, &senders).await {
            Ok(false) => {}
            Ok(true) => {
                return run.fail(AppError::AuthorizationDenied(format!(
                    "Sender of {id} is blocked"
                )));
            }
            Err(e) => return run.fail(e),
        }

        info!(
            activity_id = %id,
            kind = %activity.kind(),
            inbox_owner = %local.id,
            "Received activity"
        );

        // Side effects run once per server; inbox membership is per actor.
        let first_seen = match self.store.mark_processed(&id).await {
            Ok(first_seen) => first_seen,
            Err(e) => return run.fail(e),
        };
        let added = match self.store.add_to_collection(&local.inbox, &id).await {
            Ok(added) => added,
            Err(e) => return run.fail(e),
        };
        if !first_seen {
            if !added {
                info!(activity_id = %id, "Duplicate activity ignored");
                return run.finish(Status::Duplicate, None, None);
            }
            run.changed = true;
            run.reach(Stage::Deduplicated);
            info!(
                activity_id = %id,
                inbox_owner = %local.id,
                "Activity already processed, added to inbox"
            );
            return run.finish(Status::Accepted, None, None);
        }
        run.changed = true;
        run.reach(Stage::Deduplicated);

        let report = self
            .dispatcher
            .dispatch(&self.context(Side::Inbox, &local), &activity)
            .await;
        run.effects = report.effects;
        if let Some(e) = report.error {
            return run.fail(e);
        }
        run.reach(Stage::Dispatched);

        for follow_up in report.outbound {
            match self.publish_follow_up(&local, follow_up, &cancel).await {
                Ok(deliveries) => run.deliveries.merge(deliveries),
                Err(e) => return run.fail(e),
            }
        }

        match self.forwarder.decide(&activity).await {
            Ok(ForwardingDecision::Forward(recipients)) => {
                let payload = match self.codec.serialize_for_delivery(&activity) {
                    Ok(payload) => payload,
                    Err(e) => return run.fail(e),
                };
                let mut deliveries = self
                    .deliverer
                    .deliver(recipients.inboxes(), payload, &cancel)
                    .await;
                deliveries.record_unresolved(&recipients.failures);
                run.deliveries.merge(deliveries);
                run.reach(Stage::Forwarded);
            }
            Ok(ForwardingDecision::NotRequired(reason)) => {
                debug!(activity_id = %id, reason = ?reason, "Forwarding not required");
            }
            Err(e) => return run.fail(e),
        }

        run.finish(Status::Accepted, None, None)
    }

    /// Post an activity (or a bare object) to the outbox of local actor `actor`.
    pub async fn post_outbox(&self, actor: &Url, request: &InboundRequest) -> Outcome {
        self.post_outbox_with_cancel(actor, request, &CancellationToken::new())
            .await
    }

    /// Like [`Self::post_outbox`], stopping delivery when `cancel` fires.
    /// Unfinished deliveries are reported as abandoned.
    pub async fn post_outbox_with_cancel(
        &self,
        actor: &Url,
        request: &InboundRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut run = Run::new();

        if let Err(e) = self.authenticate(request, Access::PostOutbox, actor).await {
            return run.fail(e);
        }
        run.reach(Stage::Authenticated);

        let local = match self.local_actor(actor).await {
            Ok(local) => local,
            Err(e) => return run.fail(e),
        };

        let activity = match self
            .parse(&request.body)
            .and_then(|activity| self.prepare_outbound(activity, &local))
        {
            Ok(activity) => activity,
            Err(e) => return run.fail(e),
        };
        let Some(id) = activity.id().cloned() else {
            return run.fail(AppError::Internal("Outbound activity has no id".to_string()));
        };
        run.activity_id = Some(id.clone());

        info!(
            activity_id = %id,
            kind = %activity.kind(),
            actor = %local.id,
            "Posting activity"
        );

        match self.store.mark_processed(&id).await {
            Ok(true) => {}
            Ok(false) => return run.finish(Status::Duplicate, Some(id), None),
            Err(e) => return run.fail(e),
        }
        run.changed = true;
        run.reach(Stage::Deduplicated);

        let is_block = activity.kind().standard() == Some(StandardKind::Block);
        if let Some(outbox) = local.outbox.as_ref().filter(|_| !is_block) {
            if let Err(e) = self.store.add_to_collection(outbox, &id).await {
                return run.fail(e);
            }
        }

        let report = self
            .dispatcher
            .dispatch(&self.context(Side::Outbox, &local), &activity)
            .await;
        run.effects = report.effects;
        if let Some(e) = report.error {
            return run.fail(e);
        }
        run.reach(Stage::Dispatched);

        if is_block {
            debug!(activity_id = %id, "Block recorded locally, not published");
        } else {
            match self.deliver(&activity, cancel).await {
                Ok(deliveries) => run.deliveries.merge(deliveries),
                Err(e) => return run.fail(e),
            }
            run.reach(Stage::Delivered);
        }

        for follow_up in report.outbound {
            match self.publish_follow_up(&local, follow_up, cancel).await {
                Ok(deliveries) => run.deliveries.merge(deliveries),
                Err(e) => return run.fail(e),
            }
        }

        let payload = serde_json::to_value(activity.as_object()).ok();
        run.finish(Status::Created, Some(id), payload)
    }

    /// Read a page of local actor `actor`'s inbox.
    pub async fn read_inbox(
        &self,
        actor: &Url,
        request: &InboundRequest,
        page: PageRequest,
    ) -> Outcome {
        self.read_collection(actor, request, page, Access::GetInbox)
            .await
    }

    /// Read a page of local actor `actor`'s outbox.
    pub async fn read_outbox(
        &self,
        actor: &Url,
        request: &InboundRequest,
        page: PageRequest,
    ) -> Outcome {
        self.read_collection(actor, request, page, Access::GetOutbox)
            .await
    }

    async fn read_collection(
        &self,
        actor: &Url,
        request: &InboundRequest,
        page: PageRequest,
        access: Access,
    ) -> Outcome {
        let mut run = Run::new();
        if let Err(e) = self.authenticate(request, access, actor).await {
            return run.fail(e);
        }
        run.reach(Stage::Authenticated);

        match self.collection_page(actor, page, access).await {
            Ok(page) => run.finish(Status::Ok, None, Some(page)),
            Err(e) => run.fail(e),
        }
    }

    async fn collection_page(
        &self,
        actor: &Url,
        page: PageRequest,
        access: Access,
    ) -> AppResult<Value> {
        let local = self.local_actor(actor).await?;
        let collection = match access {
            Access::GetInbox => local.inbox.clone(),
            _ => local
                .outbox
                .clone()
                .ok_or_else(|| AppError::NotFound(format!("{} has no outbox", local.id)))?,
        };

        let limit = if page.limit == 0 {
            self.config.default_page_size
        } else {
            page.limit.min(self.config.max_page_size)
        }
        .max(1);
        let slice = self
            .store
            .page_collection(
                &collection,
                PageRequest {
                    max_seq: page.max_seq,
                    limit,
                },
            )
            .await?;

        let mut items = Vec::with_capacity(slice.items.len());
        for (_, iri) in &slice.items {
            let item = match self.store.get_object(iri).await? {
                Some(mut object) => {
                    object.strip_blind_addressing();
                    serde_json::to_value(&object).map_err(|e| {
                        AppError::Internal(format!("Failed to serialize {iri}: {e}"))
                    })?
                }
                None => Value::String(iri.to_string()),
            };
            items.push(item);
        }

        let view = OrderedCollectionPage::new(
            page_iri(&collection, page.max_seq, limit),
            collection.clone(),
            slice.total,
            items,
            slice
                .next_max_seq
                .map(|max_seq| page_iri(&collection, Some(max_seq), limit)),
        );
        serde_json::to_value(&view)
            .map_err(|e| AppError::Internal(format!("Failed to serialize page: {e}")))
    }

    async fn authenticate(
        &self,
        request: &InboundRequest,
        access: Access,
        actor: &Url,
    ) -> AppResult<()> {
        match self.capabilities.authenticate(request, access, actor).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::AuthenticationFailed),
            Err(e) => Err(AppError::Internal(format!("Authentication failed: {e}"))),
        }
    }

    /// Application policy first, then blocks recorded by the inbox owner.
    async fn sender_blocked(&self, local: &Actor, senders: &[Url]) -> AppResult<bool> {
        if self.capabilities.is_blocked(senders).await? {
            return Ok(true);
        }
        for sender in senders {
            if self.store.is_blocking(&local.id, sender).await? {
                debug!(blocker = %local.id, blocked = %sender, "Sender blocked by inbox owner");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn local_actor(&self, actor: &Url) -> AppResult<Actor> {
        if !self.store.owns(actor) {
            return Err(AppError::NotFound(format!("{actor} is not a local actor")));
        }
        self.store
            .local_actor(actor)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unknown local actor {actor}")))
    }

    fn parse(&self, body: &[u8]) -> AppResult<Activity> {
        self.codec.deserialize(body)
    }

    fn context<'a>(&'a self, side: Side, local: &'a Actor) -> HandlerContext<'a> {
        HandlerContext {
            side,
            local_actor: local,
            store: self.store.as_ref(),
            directory: self.directory.as_ref(),
            on_follow: self.config.on_follow,
            ids: &self.ids,
            base_url: &self.base_url,
        }
    }

    /// Wrap bare objects, fix the actor, and mint ids for a locally posted activity.
    fn prepare_outbound(&self, activity: Activity, local: &Actor) -> AppResult<Activity> {
        let mut activity = if is_object_type(activity.kind().as_str()) {
            Activity::wrap_in_create(activity.into_object(), local.id.clone())
        } else {
            activity
        };

        let actors = activity.actors();
        if actors.is_empty() {
            activity
                .object_mut()
                .actor
                .push(Reference::Iri(local.id.clone()));
        } else if actors.iter().any(|actor| actor != &local.id) {
            return Err(AppError::AuthorizationDenied(format!(
                "{} cannot post as another actor",
                local.id
            )));
        }

        if activity.id().is_none() {
            activity.object_mut().id = Some(self.mint("activities")?);
        }

        if activity.kind().standard() == Some(StandardKind::Create) {
            let object = activity.object_mut();
            let addressing = Addressing::of(object);
            for reference in &mut object.object {
                if let Reference::Object(created) = reference {
                    if created.id.is_none() {
                        created.id = Some(self.mint("objects")?);
                    }
                    if created.attributed_to.is_empty() {
                        created
                            .attributed_to
                            .push(Reference::Iri(local.id.clone()));
                    }
                    addressing.fill(created);
                }
            }
        }

        Ok(activity)
    }

    /// Store, append and deliver an activity a handler produced on the
    /// local actor's behalf.
    async fn publish_follow_up(
        &self,
        local: &Actor,
        activity: Activity,
        cancel: &CancellationToken,
    ) -> AppResult<DeliveryReport> {
        let id = activity
            .id()
            .cloned()
            .ok_or_else(|| AppError::Internal("Follow-up activity has no id".to_string()))?;
        info!(activity_id = %id, kind = %activity.kind(), "Publishing follow-up activity");

        self.store.mark_processed(&id).await?;
        self.store
            .put_object(&id, activity.as_object().clone())
            .await?;
        if let Some(outbox) = &local.outbox {
            self.store.add_to_collection(outbox, &id).await?;
        }
        self.deliver(&activity, cancel).await
    }

    async fn deliver(
        &self,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> AppResult<DeliveryReport> {
        let recipients = self.resolver.resolve(activity).await?;
        let payload = self.codec.serialize_for_delivery(activity)?;
        let mut report = self
            .deliverer
            .deliver(recipients.inboxes(), payload, cancel)
            .await;
        report.record_unresolved(&recipients.failures);
        Ok(report)
    }

    fn mint(&self, segment: &str) -> AppResult<Url> {
        self.ids
            .iri(&self.base_url, segment)
            .map_err(|e| AppError::Internal(format!("Failed to mint IRI: {e}")))
    }
}

/// Addressing of a Create, copied onto created objects that have none.
struct Addressing {
    to: Vec<Reference>,
    cc: Vec<Reference>,
    bto: Vec<Reference>,
    bcc: Vec<Reference>,
    audience: Vec<Reference>,
}

impl Addressing {
    fn of(object: &ApObject) -> Self {
        Self {
            to: object.to.clone(),
            cc: object.cc.clone(),
            bto: object.bto.clone(),
            bcc: object.bcc.clone(),
            audience: object.audience.clone(),
        }
    }

    fn fill(&self, target: &mut ApObject) {
        let pairs = [
            (&mut target.to, &self.to),
            (&mut target.cc, &self.cc),
            (&mut target.bto, &self.bto),
            (&mut target.bcc, &self.bcc),
            (&mut target.audience, &self.audience),
        ];
        for (field, source) in pairs {
            if field.is_empty() {
                field.clone_from(source);
            }
        }
    }
}

impl std::fmt::Debug for FederationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationEngine")
            .field("base_url", &self.base_url.as_str())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
