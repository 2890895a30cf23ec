//! End-to-end federation between in-process engines.
//!
//! Engines are wired together by a loopback transport that hands each
//! delivery straight to the receiving engine's inbox entry point.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apub_common::{AppError, AppResult, FederationConfig, OnFollow};
use apub_federation::{
    Access, Activity, ActivityHandler, ActivityKind, ActivityStore, Actor, ApObject, Callbacks,
    Capabilities, Collaborators, Effect, EffectLog, ExtensionHandler, FederationEngine,
    FollowState, HandlerContext, InboundRequest, JsonCodec, MemoryDirectory, MemoryStore,
    PageRequest, Progress, Route, Stage, StandardKind, Status, Transport, router,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn body(value: &Value) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap())
}

// === Test policy ===

#[derive(Clone)]
struct Policy {
    deny: bool,
    blocked: Vec<Url>,
    forwarding_depth: usize,
    delivery_depth: usize,
    stray_forward: Option<Url>,
    callbacks: Callbacks,
}

fn policy() -> Policy {
    Policy {
        deny: false,
        blocked: Vec::new(),
        forwarding_depth: 2,
        delivery_depth: 2,
        stray_forward: None,
        callbacks: Callbacks::new(),
    }
}

#[async_trait]
impl Capabilities for Policy {
    async fn authenticate(
        &self,
        _request: &InboundRequest,
        _access: Access,
        _actor: &Url,
    ) -> AppResult<bool> {
        Ok(!self.deny)
    }

    async fn is_blocked(&self, actors: &[Url]) -> AppResult<bool> {
        Ok(actors.iter().any(|actor| self.blocked.contains(actor)))
    }

    async fn filter_forwarding(
        &self,
        candidates: &[Url],
        _activity: &Activity,
    ) -> AppResult<Vec<Url>> {
        let mut approved = candidates.to_vec();
        approved.extend(self.stray_forward.clone());
        Ok(approved)
    }

    fn max_inbox_forwarding_recursion_depth(&self) -> usize {
        self.forwarding_depth
    }

    fn max_delivery_recursion_depth(&self) -> usize {
        self.delivery_depth
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks.clone()
    }
}

// === Loopback network ===

/// Routes deliveries by host to registered engines. Hosts without an engine
/// accept everything.
#[derive(Default)]
struct Network {
    engines: RwLock<HashMap<String, Arc<FederationEngine>>>,
    down: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    sent: Mutex<Vec<(Url, Bytes)>>,
}

impl Network {
    async fn sent_to(&self, inbox: &Url) -> Vec<Value> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(target, _)| target == inbox)
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for Network {
    async fn deliver_to(&self, inbox: &Url, payload: Bytes) -> AppResult<()> {
        let host = inbox.host_str().unwrap_or_default().to_string();
        if self.hanging.read().await.contains(&host) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.sent.lock().await.push((inbox.clone(), payload.clone()));
        if self.down.read().await.contains(&host) {
            return Err(AppError::Transport(format!("{host} is down")));
        }

        let engine = self.engines.read().await.get(&host).cloned();
        let Some(engine) = engine else {
            return Ok(());
        };
        let actor = url(inbox.as_str().trim_end_matches("/inbox"));
        let outcome = engine
            .receive_inbox(&actor, &InboundRequest::post(inbox.path(), payload))
            .await;
        outcome.error.map_or(Ok(()), Err)
    }
}

struct Node {
    engine: Arc<FederationEngine>,
    store: Arc<MemoryStore>,
    actor: Actor,
}

impl Node {
    async fn post(&self, activity: &Value) -> apub_federation::Outcome {
        self.engine
            .post_outbox(
                &self.actor.id,
                &InboundRequest::post(self.actor.outbox.as_ref().unwrap().path(), body(activity)),
            )
            .await
    }

    async fn receive(&self, activity: &Value) -> apub_federation::Outcome {
        self.engine
            .receive_inbox(
                &self.actor.id,
                &InboundRequest::post(self.actor.inbox.path(), body(activity)),
            )
            .await
    }

    fn followers(&self) -> Url {
        self.actor.followers.clone().unwrap()
    }
}

struct World {
    network: Arc<Network>,
    directory: Arc<MemoryDirectory>,
}

impl World {
    fn new() -> Self {
        Self {
            network: Arc::new(Network::default()),
            directory: Arc::new(MemoryDirectory::new()),
        }
    }

    /// A server at `host` with one local actor.
    async fn node(&self, host: &str, username: &str, policy: Policy, on_follow: OnFollow) -> Node {
        let base = url(&format!("https://{host}"));
        let store = Arc::new(MemoryStore::new(base.clone()));
        let actor = Actor::conventional(url(&format!("https://{host}/users/{username}"))).unwrap();
        store.register_local_actor(&actor).await.unwrap();
        self.directory.insert_actor(actor.clone()).await;

        let engine = Arc::new(FederationEngine::new(
            Collaborators {
                capabilities: Arc::new(policy),
                codec: Arc::new(JsonCodec),
                store: store.clone(),
                directory: self.directory.clone(),
                transport: self.network.clone(),
            },
            base,
            FederationConfig {
                on_follow,
                ..FederationConfig::default()
            },
        ));
        self.network
            .engines
            .write()
            .await
            .insert(host.to_string(), engine.clone());

        Node {
            engine,
            store,
            actor,
        }
    }

    /// A remote actor with no engine behind it.
    async fn remote(&self, iri: &str) -> Actor {
        let actor = Actor::conventional(url(iri)).unwrap();
        self.directory.insert_actor(actor.clone()).await;
        actor
    }
}

fn note_from(actor: &Url, id: &str, to: &[&Url]) -> Value {
    json!({
        "id": format!("{id}/activity"),
        "type": "Create",
        "actor": actor,
        "to": to,
        "object": {
            "id": id,
            "type": "Note",
            "attributedTo": actor,
            "content": "hello",
            "to": to,
        }
    })
}

// === Follow lifecycle ===

#[tokio::test]
async fn test_follow_is_accepted_across_servers() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::AutoAccept)
        .await;

    let outcome = alice
        .post(&json!({
            "type": "Follow",
            "object": bob.actor.id,
            "to": [bob.actor.id],
        }))
        .await;

    assert_eq!(outcome.status, Status::Created);
    assert_eq!(outcome.progress, Progress::Complete);
    assert!(outcome.deliveries.delivered.contains(&bob.actor.inbox));
    let follow_id = outcome.activity_id.clone().unwrap();
    assert_eq!(outcome.location.as_ref(), Some(&follow_id));

    let followers = bob.store.local_collection(&bob.followers()).await.unwrap().unwrap();
    assert_eq!(followers, vec![alice.actor.id.clone()]);

    let following = alice
        .store
        .local_collection(alice.actor.following.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(following, vec![bob.actor.id.clone()]);

    let record = alice.store.get_follow(&follow_id).await.unwrap().unwrap();
    assert_eq!(record.state, FollowState::Accepted);

    let accepts = world.network.sent_to(&alice.actor.inbox).await;
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0]["type"], "Accept");
    assert_eq!(accepts[0]["object"]["id"], follow_id.as_str());
}

#[tokio::test]
async fn test_pending_follow_waits_for_application() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;

    let outcome = alice
        .post(&json!({ "type": "Follow", "object": bob.actor.id, "to": [bob.actor.id] }))
        .await;
    let follow_id = outcome.activity_id.unwrap();

    let record = bob.store.get_follow(&follow_id).await.unwrap().unwrap();
    assert_eq!(record.state, FollowState::Pending);
    assert!(
        bob.store
            .local_collection(&bob.followers())
            .await
            .unwrap()
            .unwrap()
            .is_empty()
    );
    assert!(world.network.sent_to(&alice.actor.inbox).await.is_empty());
}

// === Inbox pipeline ===

#[tokio::test]
async fn test_duplicate_delivery_is_a_no_op() {
    let world = World::new();
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let create = note_from(&carol.id, "https://c.example/notes/1", &[&bob.actor.id]);

    let first = bob.receive(&create).await;
    assert_eq!(first.status, Status::Accepted);
    assert_eq!(first.progress, Progress::Complete);
    let stored = bob.store.object_count().await;

    let second = bob.receive(&create).await;
    assert_eq!(second.status, Status::Duplicate);
    assert_eq!(second.stage, Stage::Done);
    assert_eq!(second.progress, Progress::Nothing);
    assert!(second.effects.is_empty());
    assert_eq!(bob.store.object_count().await, stored);

    let inbox = bob
        .store
        .page_collection(&bob.actor.inbox, PageRequest::first(10))
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
}

#[tokio::test]
async fn test_each_local_inbox_keeps_its_copy() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let carol = Actor::conventional(url("https://a.example/users/carol")).unwrap();
    alice.store.register_local_actor(&carol).await.unwrap();
    world.directory.insert_actor(carol.clone()).await;
    let bob = world.remote("https://b.example/users/bob").await;
    let create = note_from(
        &bob.id,
        "https://b.example/notes/1",
        &[&alice.actor.id, &carol.id],
    );
    let activity_id = url("https://b.example/notes/1/activity");

    let to_alice = alice.receive(&create).await;
    let to_carol = alice
        .engine
        .receive_inbox(&carol.id, &InboundRequest::post(carol.inbox.path(), body(&create)))
        .await;

    assert_eq!(to_alice.status, Status::Accepted);
    assert_eq!(to_carol.status, Status::Accepted);
    assert!(to_carol.effects.is_empty());
    for inbox in [&alice.actor.inbox, &carol.inbox] {
        let members = alice.store.local_collection(inbox).await.unwrap().unwrap();
        assert_eq!(members, vec![activity_id.clone()], "{inbox}");
    }

    let again = alice
        .engine
        .receive_inbox(&carol.id, &InboundRequest::post(carol.inbox.path(), body(&create)))
        .await;
    assert_eq!(again.status, Status::Duplicate);
    assert_eq!(again.progress, Progress::Nothing);
}

#[tokio::test]
async fn test_unauthenticated_receipt_changes_nothing() {
    let world = World::new();
    let bob = world
        .node(
            "b.example",
            "bob",
            Policy {
                deny: true,
                ..policy()
            },
            OnFollow::AutoAccept,
        )
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let before = bob.store.object_count().await;

    let outcome = bob
        .receive(&json!({
            "id": "https://c.example/activities/f1",
            "type": "Follow",
            "actor": carol.id,
            "object": bob.actor.id,
        }))
        .await;

    assert_eq!(outcome.status, Status::Unauthorized);
    assert_eq!(outcome.stage, Stage::Received);
    assert_eq!(outcome.progress, Progress::Nothing);
    assert_eq!(bob.store.object_count().await, before);
    assert!(
        bob.store
            .get_follow(&url("https://c.example/activities/f1"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(world.network.sent.lock().await.is_empty());
}

#[tokio::test]
async fn test_blocked_sender_is_refused() {
    let world = World::new();
    let mallory = world.remote("https://m.example/users/mallory").await;
    let bob = world
        .node(
            "b.example",
            "bob",
            Policy {
                blocked: vec![mallory.id.clone()],
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;

    let outcome = bob
        .receive(&note_from(&mallory.id, "https://m.example/notes/1", &[&bob.actor.id]))
        .await;

    assert_eq!(outcome.status, Status::Forbidden);
    assert_eq!(outcome.progress, Progress::Nothing);
    assert!(
        bob.store
            .get_object(&url("https://m.example/notes/1"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_recorded_block_refuses_sender() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let mallory = world.remote("https://m.example/users/mallory").await;

    let block = alice
        .post(&json!({ "type": "Block", "object": mallory.id }))
        .await;
    assert_eq!(block.status, Status::Created);

    let outcome = alice
        .receive(&note_from(&mallory.id, "https://m.example/notes/1", &[&alice.actor.id]))
        .await;

    assert_eq!(outcome.status, Status::Forbidden);
    assert_eq!(outcome.progress, Progress::Nothing);
    assert!(
        alice
            .store
            .local_collection(&alice.actor.inbox)
            .await
            .unwrap()
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_override_replaces_default_handler() {
    struct CountingLike(AtomicUsize);

    #[async_trait]
    impl ActivityHandler for CountingLike {
        async fn handle(
            &self,
            _ctx: &HandlerContext<'_>,
            activity: &Activity,
            log: &mut EffectLog,
        ) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            log.push(Effect::Custom {
                description: format!("counted {:?}", activity.id().map(Url::as_str)),
            });
            Ok(())
        }
    }

    let world = World::new();
    let counter = Arc::new(CountingLike(AtomicUsize::new(0)));
    let bob = world
        .node(
            "b.example",
            "bob",
            Policy {
                callbacks: Callbacks::new().on(StandardKind::Like, counter.clone()),
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;
    let carol = world.remote("https://c.example/users/carol").await;

    assert_eq!(
        bob.engine.dispatcher().route(&ActivityKind::from_tag("Like")),
        Route::Override
    );
    assert_eq!(
        bob.engine.dispatcher().route(&ActivityKind::from_tag("Announce")),
        Route::Default
    );

    let outcome = bob
        .receive(&json!({
            "id": "https://c.example/activities/like1",
            "type": "Like",
            "actor": carol.id,
            "object": "https://b.example/notes/1",
        }))
        .await;

    assert!(outcome.is_success());
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert!(
        outcome
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::Custom { .. }))
    );
    assert!(
        !outcome
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::Recorded { .. }))
    );
}

struct Tally {
    tag: &'static str,
    calls: AtomicUsize,
}

impl Tally {
    fn new(tag: &'static str) -> Arc<Self> {
        Arc::new(Self {
            tag,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ActivityHandler for Tally {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        _activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        log.push(Effect::Custom {
            description: self.tag.to_string(),
        });
        Ok(())
    }
}

impl ExtensionHandler for Tally {
    fn accepts(&self, kind: &str) -> bool {
        kind == "EmojiReact"
    }
}

#[tokio::test]
async fn test_first_matching_extension_handles_the_activity() {
    let world = World::new();
    let first = Tally::new("first");
    let second = Tally::new("second");
    let bob = world
        .node(
            "b.example",
            "bob",
            Policy {
                callbacks: Callbacks::new()
                    .extension(first.clone())
                    .extension(second.clone()),
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;
    let carol = world.remote("https://c.example/users/carol").await;

    let outcome = bob
        .receive(&json!({
            "id": "https://c.example/activities/react1",
            "type": "EmojiReact",
            "actor": carol.id,
            "object": "https://b.example/notes/1",
            "content": "🎉",
        }))
        .await;

    assert_eq!(outcome.status, Status::Accepted);
    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.effects.iter().any(
        |effect| matches!(effect, Effect::Custom { description } if description == "first")
    ));
}

#[tokio::test]
async fn test_unknown_kind_is_stored_without_side_effects() {
    let world = World::new();
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let id = url("https://c.example/activities/wave1");

    let outcome = bob
        .receive(&json!({
            "id": id,
            "type": "Wave",
            "actor": carol.id,
            "object": bob.actor.id,
            "intensity": 3,
        }))
        .await;

    assert_eq!(outcome.status, Status::Accepted);
    assert_eq!(outcome.effects.len(), 1);
    assert!(matches!(&outcome.effects[0], Effect::Stored { activity } if activity == &id));
    let stored = bob.store.get_object(&id).await.unwrap().unwrap();
    assert_eq!(stored.kind, "Wave");
    assert_eq!(stored.extra["intensity"], 3);
    assert!(bob.store.get_follow(&id).await.unwrap().is_none());
    assert!(world.network.sent.lock().await.is_empty());
}

#[tokio::test]
async fn test_handler_failure_is_reported_with_partial_progress() {
    let world = World::new();
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;

    let outcome = bob
        .receive(&json!({
            "id": "https://c.example/activities/undo1",
            "type": "Undo",
            "actor": carol.id,
            "object": "https://c.example/activities/never-seen",
        }))
        .await;

    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(outcome.stage, Stage::Deduplicated);
    assert_eq!(outcome.progress, Progress::Partial);
    let error = outcome.error.unwrap();
    assert!(matches!(error, AppError::DispatchFailure { .. }));
    assert!(matches!(error.root(), AppError::NotFound(_)));
}

// === Outbox delivery ===

#[tokio::test]
async fn test_bare_object_is_wrapped_and_delivered() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;

    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [bob.actor.id] }))
        .await;

    assert_eq!(outcome.status, Status::Created);
    let payload = outcome.payload.unwrap();
    assert_eq!(payload["type"], "Create");
    assert_eq!(payload["actor"], alice.actor.id.as_str());
    assert_eq!(payload["object"]["attributedTo"], alice.actor.id.as_str());
    let note_id = url(payload["object"]["id"].as_str().unwrap());
    assert_eq!(note_id.host_str(), Some("a.example"));

    assert!(bob.store.get_object(&note_id).await.unwrap().is_some());
    assert!(alice.store.get_object(&note_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delivery_to_followers_skips_blocked_and_author() {
    let world = World::new();
    let carol = world.remote("https://c.example/users/carol").await;
    let dave = world.remote("https://d.example/users/dave").await;
    let alice = world
        .node(
            "a.example",
            "alice",
            Policy {
                blocked: vec![dave.id.clone()],
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;
    for follower in [&carol.id, &dave.id, &alice.actor.id] {
        alice
            .store
            .add_to_collection(&alice.followers(), follower)
            .await
            .unwrap();
    }

    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [alice.followers()] }))
        .await;

    assert_eq!(outcome.deliveries.delivered, vec![carol.inbox.clone()]);
    assert!(outcome.deliveries.failed.is_empty());
    assert!(world.network.sent_to(&dave.inbox).await.is_empty());
    assert!(world.network.sent_to(&alice.actor.inbox).await.is_empty());
}

#[tokio::test]
async fn test_blind_recipients_never_see_blind_fields() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let eve = world.remote("https://e.example/users/eve").await;

    let outcome = alice
        .post(&json!({
            "type": "Note",
            "content": "psst",
            "to": [carol.id],
            "bcc": [eve.id],
        }))
        .await;

    assert!(outcome.deliveries.delivered.contains(&carol.inbox));
    assert!(outcome.deliveries.delivered.contains(&eve.inbox));
    for inbox in [&carol.inbox, &eve.inbox] {
        let sent = world.network.sent_to(inbox).await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].get("bcc").is_none());
        assert!(sent[0]["object"].get("bcc").is_none());
    }

    let page = alice
        .engine
        .read_outbox(
            &alice.actor.id,
            &InboundRequest::get("/users/alice/outbox"),
            PageRequest::first(10),
        )
        .await;
    let items = page.payload.unwrap()["orderedItems"].clone();
    assert_eq!(items.as_array().unwrap().len(), 1);
    assert!(items[0].get("bcc").is_none());
    assert!(items[0]["object"].get("bcc").is_none());
}

#[tokio::test]
async fn test_partial_delivery_reports_each_inbox() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let dave = world.remote("https://d.example/users/dave").await;
    world.network.down.write().await.insert("d.example".to_string());

    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [carol.id, dave.id] }))
        .await;

    assert_eq!(outcome.status, Status::Created);
    assert!(outcome.is_success());
    assert_eq!(outcome.progress, Progress::Partial);
    assert_eq!(outcome.deliveries.delivered, vec![carol.inbox.clone()]);
    assert_eq!(outcome.deliveries.failed.len(), 1);
    assert_eq!(outcome.deliveries.failed[0].target, dave.inbox);
}

#[tokio::test]
async fn test_unknown_recipient_is_reported_not_fatal() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let ghost = url("https://g.example/users/ghost");
    world.directory.mark_unreachable(&ghost).await;

    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [carol.id, ghost] }))
        .await;

    assert!(outcome.is_success());
    assert!(outcome.deliveries.delivered.contains(&carol.inbox));
    assert_eq!(outcome.deliveries.failed.len(), 1);
    assert_eq!(outcome.deliveries.failed[0].target, ghost);
}

#[tokio::test]
async fn test_cancelled_delivery_is_abandoned() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let slow = world.remote("https://s.example/users/slow").await;
    world.network.hanging.write().await.insert("s.example".to_string());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = alice
        .engine
        .post_outbox_with_cancel(
            &alice.actor.id,
            &InboundRequest::post(
                "/users/alice/outbox",
                body(&json!({ "type": "Note", "content": "hi", "to": [carol.id, slow.id] })),
            ),
            &cancel,
        )
        .await;

    assert_eq!(outcome.status, Status::Created);
    assert_eq!(outcome.progress, Progress::Partial);
    assert!(outcome.deliveries.delivered.contains(&carol.inbox));
    assert_eq!(outcome.deliveries.abandoned, vec![slow.inbox.clone()]);
}

#[tokio::test]
async fn test_posting_as_another_actor_is_forbidden() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;

    let outcome = alice
        .post(&json!({
            "type": "Like",
            "actor": "https://b.example/users/bob",
            "object": "https://c.example/notes/1",
        }))
        .await;

    assert_eq!(outcome.status, Status::Forbidden);
    assert_eq!(outcome.progress, Progress::Nothing);
}

// === Recipient expansion bounds ===

/// Remote collections `c/0 → c/1 → …`, each also holding one actor.
async fn collection_chain(world: &World, length: usize) -> Url {
    for n in 0..length {
        let member = world.remote(&format!("https://d.example/users/{n}")).await;
        let mut members = vec![member.id];
        if n + 1 < length {
            members.push(url(&format!("https://d.example/c/{}", n + 1)));
        }
        world
            .directory
            .insert_collection(&url(&format!("https://d.example/c/{n}")), members)
            .await;
    }
    url("https://d.example/c/0")
}

async fn fan_out_over_chain(length: usize, depth: usize) -> (usize, usize) {
    let world = World::new();
    let alice = world
        .node(
            "a.example",
            "alice",
            Policy {
                delivery_depth: depth,
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;
    let head = collection_chain(&world, length).await;

    let before = world.directory.fetch_count();
    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [head] }))
        .await;
    assert!(outcome.is_success());
    (
        world.directory.fetch_count() - before,
        outcome.deliveries.delivered.len(),
    )
}

#[tokio::test]
async fn test_expansion_cost_is_bounded_by_depth() {
    let depth = 2;
    let (shallow_fetches, shallow_delivered) = fan_out_over_chain(depth + 1, depth).await;
    let (deep_fetches, deep_delivered) = fan_out_over_chain(depth + 1000, depth).await;

    assert_eq!(shallow_fetches, deep_fetches);
    assert_eq!(shallow_delivered, depth);
    assert_eq!(deep_delivered, depth);
}

#[tokio::test]
async fn test_collection_cycle_terminates() {
    let world = World::new();
    let alice = world
        .node(
            "a.example",
            "alice",
            Policy {
                delivery_depth: 50,
                ..policy()
            },
            OnFollow::DoNothing,
        )
        .await;
    let carol = world.remote("https://c.example/users/carol").await;
    let dave = world.remote("https://d.example/users/dave").await;
    let left = url("https://c.example/lists/left");
    let right = url("https://d.example/lists/right");
    world
        .directory
        .insert_collection(&left, vec![carol.id.clone(), right.clone()])
        .await;
    world
        .directory
        .insert_collection(&right, vec![dave.id.clone(), left.clone()])
        .await;

    let outcome = alice
        .post(&json!({ "type": "Note", "content": "hi", "to": [left] }))
        .await;

    let mut delivered = outcome.deliveries.delivered.clone();
    delivered.sort();
    let mut expected = vec![carol.inbox.clone(), dave.inbox.clone()];
    expected.sort();
    assert_eq!(delivered, expected);
}

// === Inbox forwarding ===

/// Bob replies to Alice's note and copies her followers.
fn reply_to_alice(bob: &Url, alice: &Url, followers: &Url) -> Value {
    json!({
        "id": "https://b.example/activities/reply1",
        "type": "Create",
        "actor": bob,
        "to": [alice],
        "cc": [followers],
        "bcc": ["https://b.example/users/secret"],
        "object": {
            "id": "https://b.example/notes/reply1",
            "type": "Note",
            "attributedTo": bob,
            "inReplyTo": "https://a.example/notes/1",
            "content": "nice",
        }
    })
}

async fn forwarding_world(alice_policy: Policy) -> (World, Node, Actor) {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", alice_policy, OnFollow::DoNothing)
        .await;
    world.remote("https://b.example/users/bob").await;
    let carol = world.remote("https://c.example/users/carol").await;
    alice
        .store
        .add_to_collection(&alice.followers(), &carol.id)
        .await
        .unwrap();
    alice
        .store
        .add_to_collection(&alice.followers(), &url("https://b.example/users/bob"))
        .await
        .unwrap();
    (world, alice, carol)
}

#[tokio::test]
async fn test_reply_is_forwarded_to_local_followers() {
    let (world, alice, carol) = forwarding_world(policy()).await;
    let bob = url("https://b.example/users/bob");

    let outcome = alice
        .receive(&reply_to_alice(&bob, &alice.actor.id, &alice.followers()))
        .await;

    assert_eq!(outcome.status, Status::Accepted);
    assert_eq!(outcome.deliveries.delivered, vec![carol.inbox.clone()]);
    let forwarded = world.network.sent_to(&carol.inbox).await;
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0]["id"], "https://b.example/activities/reply1");
    assert!(forwarded[0].get("bcc").is_none());
}

#[tokio::test]
async fn test_forwarding_respects_depth() {
    let (world, alice, carol) = forwarding_world(Policy {
        forwarding_depth: 1,
        ..policy()
    })
    .await;
    let bob = url("https://b.example/users/bob");

    let outcome = alice
        .receive(&reply_to_alice(&bob, &alice.actor.id, &alice.followers()))
        .await;

    assert_eq!(outcome.status, Status::Accepted);
    assert!(outcome.deliveries.is_empty());
    assert!(world.network.sent_to(&carol.inbox).await.is_empty());
}

#[tokio::test]
async fn test_forwarding_filter_must_return_candidates() {
    let (world, alice, carol) = forwarding_world(Policy {
        stray_forward: Some(url("https://x.example/users/stranger")),
        ..policy()
    })
    .await;
    let bob = url("https://b.example/users/bob");

    let outcome = alice
        .receive(&reply_to_alice(&bob, &alice.actor.id, &alice.followers()))
        .await;

    assert_eq!(outcome.status, Status::InternalError);
    assert_eq!(outcome.stage, Stage::Dispatched);
    assert_eq!(outcome.progress, Progress::Partial);
    assert!(matches!(outcome.error, Some(AppError::Configuration(_))));
    assert!(world.network.sent_to(&carol.inbox).await.is_empty());
}

#[tokio::test]
async fn test_forwarding_reference_cycle_terminates() {
    let (world, alice, carol) = forwarding_world(Policy {
        forwarding_depth: 1000,
        ..policy()
    })
    .await;
    let bob = url("https://b.example/users/bob");
    let x = url("https://b.example/notes/x");
    let y = url("https://b.example/notes/y");
    for (id, parent) in [(&x, &y), (&y, &x)] {
        let note: ApObject = serde_json::from_value(json!({
            "id": id,
            "type": "Note",
            "attributedTo": bob,
            "inReplyTo": parent,
        }))
        .unwrap();
        world.directory.insert_object(id, note).await;
    }

    let before = world.directory.fetch_count();
    let outcome = alice
        .receive(&json!({
            "id": "https://b.example/activities/loop1",
            "type": "Create",
            "actor": bob,
            "to": [alice.actor.id],
            "cc": [alice.followers()],
            "object": {
                "id": "https://b.example/notes/z",
                "type": "Note",
                "attributedTo": bob,
                "inReplyTo": x,
            }
        }))
        .await;

    assert_eq!(outcome.status, Status::Accepted);
    assert!(outcome.deliveries.is_empty());
    assert!(world.network.sent_to(&carol.inbox).await.is_empty());
    // Each note in the cycle is dereferenced once.
    assert_eq!(world.directory.fetch_count() - before, 2);
}

// === Reads ===

#[tokio::test]
async fn test_outbox_pages_are_stable_under_appends() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    for n in 0..5 {
        alice
            .post(&json!({ "type": "Note", "content": format!("note {n}") }))
            .await;
    }

    let read = |page: PageRequest| {
        let engine = alice.engine.clone();
        let actor = alice.actor.id.clone();
        async move {
            engine
                .read_outbox(&actor, &InboundRequest::get("/users/alice/outbox"), page)
                .await
                .payload
                .unwrap()
        }
    };
    let ids = |page: &Value| -> Vec<String> {
        page["orderedItems"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap().to_string())
            .collect()
    };

    let first = read(PageRequest::first(2)).await;
    assert_eq!(first["totalItems"], 5);
    let next = url(first["next"].as_str().unwrap());
    let max_seq: u64 = next
        .query_pairs()
        .find(|(key, _)| key == "max_seq")
        .map(|(_, value)| value.parse().unwrap())
        .unwrap();

    let expected_second = ids(&read(PageRequest::below(max_seq, 2)).await);
    alice
        .post(&json!({ "type": "Note", "content": "late arrival" }))
        .await;
    let second = read(PageRequest::below(max_seq, 2)).await;

    assert_eq!(ids(&second), expected_second);
    for id in ids(&second) {
        assert!(!ids(&first).contains(&id));
    }
}

#[tokio::test]
async fn test_block_stays_out_of_outbox() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let mallory = world.remote("https://m.example/users/mallory").await;
    alice
        .post(&json!({ "type": "Note", "content": "visible", "to": [mallory.id] }))
        .await;

    let block = alice
        .post(&json!({ "type": "Block", "object": mallory.id, "to": [mallory.id] }))
        .await;
    assert_eq!(block.status, Status::Created);
    assert!(block.deliveries.is_empty());

    let page = alice
        .engine
        .read_outbox(
            &alice.actor.id,
            &InboundRequest::get("/users/alice/outbox"),
            PageRequest::first(10),
        )
        .await
        .payload
        .unwrap();

    assert_eq!(page["totalItems"], 1);
    let items = page["orderedItems"].as_array().unwrap();
    assert!(items.iter().all(|item| item["type"] != "Block"));
    assert_eq!(world.network.sent_to(&mallory.inbox).await.len(), 1);
}

// === HTTP surface ===

#[tokio::test]
async fn test_router_round_trip() {
    let world = World::new();
    let alice = world
        .node("a.example", "alice", policy(), OnFollow::DoNothing)
        .await;
    let app = router(alice.engine.clone());

    let response = app
        .clone()
        .oneshot(
            Request::post("/users/alice/outbox")
                .header(header::CONTENT_TYPE, "application/activity+json")
                .body(Body::from(
                    serde_json::to_vec(&json!({ "type": "Note", "content": "hi" })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with("https://a.example/"));

    let response = app
        .clone()
        .oneshot(
            Request::get("/users/alice/outbox?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let page: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(page["orderedItems"][0]["id"], location.as_str());

    let response = app
        .oneshot(
            Request::post("/users/nobody/inbox")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_router_maps_handler_failure_to_root_status() {
    let world = World::new();
    let bob = world
        .node("b.example", "bob", policy(), OnFollow::DoNothing)
        .await;
    world.remote("https://c.example/users/carol").await;

    let response = router(bob.engine.clone())
        .oneshot(
            Request::post("/users/bob/inbox")
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "id": "https://c.example/activities/undo1",
                        "type": "Undo",
                        "actor": "https://c.example/users/carol",
                        "object": "https://c.example/activities/never-seen",
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["progress"], "partial");
}
