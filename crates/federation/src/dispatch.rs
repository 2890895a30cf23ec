//! Routing of activities to side-effect handlers.

use std::collections::HashMap;
use std::sync::Arc;

use apub_common::{AppError, AppResult, IdGenerator, OnFollow};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::actor::Actor;
use crate::capability::Callbacks;
use crate::directory::Directory;
use crate::processor;
use crate::store::ActivityStore;
use crate::vocab::{Activity, ActivityKind, StandardKind};

/// Which entry point is applying the activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Received from a peer.
    Inbox,
    /// Posted by a local actor.
    Outbox,
}

/// Everything a handler may touch.
pub struct HandlerContext<'a> {
    pub side: Side,
    /// The local actor whose inbox or outbox is being used.
    pub local_actor: &'a Actor,
    pub store: &'a dyn ActivityStore,
    pub directory: &'a dyn Directory,
    pub on_follow: OnFollow,
    pub ids: &'a IdGenerator,
    pub base_url: &'a Url,
}

impl HandlerContext<'_> {
    /// Mint a fresh IRI under `{base}/{segment}/`.
    pub fn mint(&self, segment: &str) -> AppResult<Url> {
        self.ids
            .iri(self.base_url, segment)
            .map_err(|e| AppError::Internal(format!("Failed to mint IRI: {e}")))
    }
}

/// A side effect that was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    Stored { activity: Url },
    ObjectCreated { object: Url },
    ObjectReplaced { object: Url },
    ObjectMerged { object: Url },
    Tombstoned { object: Url },
    FollowPending { follow: Url },
    FollowAccepted { follow: Url },
    FollowRejected { follow: Url },
    FollowUndone { follow: Url },
    CollectionAdded { collection: Url, item: Url },
    CollectionRemoved { collection: Url, item: Url },
    Recorded { activity: Url },
    RecordUndone { activity: Url },
    BlockRecorded { block: Url },
    BlockUndone { block: Url },
    /// Free-form effect reported by an application handler.
    Custom { description: String },
}

/// Effects applied so far, plus activities to send as a consequence.
#[derive(Debug, Default)]
pub struct EffectLog {
    pub applied: Vec<Effect>,
    /// Follow-up activities (e.g. an automatic Accept) authored by the local actor.
    pub outbound: Vec<Activity>,
}

impl EffectLog {
    pub fn push(&mut self, effect: Effect) {
        self.applied.push(effect);
    }
}

/// Side-effect handler for one activity kind.
///
/// Effects must be pushed to `log` as they are applied, so a handler that
/// fails midway still reports what it did.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()>;
}

/// Handler for application-defined kinds.
pub trait ExtensionHandler: ActivityHandler {
    /// Whether this handler takes activities tagged `kind`.
    fn accepts(&self, kind: &str) -> bool;
}

/// Which handler an activity kind resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Override,
    Default,
    Extension(usize),
    Fallback,
    /// Stored without side effects.
    Opaque,
}

/// Result of dispatching one activity.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub effects: Vec<Effect>,
    pub outbound: Vec<Activity>,
    pub error: Option<AppError>,
}

/// Immutable kind-to-handler table.
#[derive(Clone)]
pub struct Dispatcher {
    defaults: HashMap<StandardKind, Arc<dyn ActivityHandler>>,
    callbacks: Callbacks,
}

impl Dispatcher {
    /// Build the table from the built-in handlers and the application's callbacks.
    #[must_use]
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            defaults: processor::defaults(),
            callbacks,
        }
    }

    /// Resolve the handler for `kind`.
    #[must_use]
    pub fn route(&self, kind: &ActivityKind) -> Route {
        match kind {
            ActivityKind::Standard(standard) => {
                if self.callbacks.overrides.contains_key(standard) {
                    Route::Override
                } else if self.defaults.contains_key(standard) {
                    Route::Default
                } else {
                    Route::Opaque
                }
            }
            ActivityKind::Extension(tag) => self
                .callbacks
                .extensions
                .iter()
                .position(|handler| handler.accepts(tag))
                .map_or_else(
                    || {
                        if self.callbacks.fallback.is_some() {
                            Route::Fallback
                        } else {
                            Route::Opaque
                        }
                    },
                    Route::Extension,
                ),
        }
    }

    async fn run(
        &self,
        route: Route,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        match (route, activity.kind()) {
            (Route::Override, ActivityKind::Standard(standard)) => {
                match self.callbacks.overrides.get(standard) {
                    Some(handler) => handler.handle(ctx, activity, log).await,
                    None => Ok(()),
                }
            }
            (Route::Default, ActivityKind::Standard(standard)) => {
                match self.defaults.get(standard) {
                    Some(handler) => handler.handle(ctx, activity, log).await,
                    None => Ok(()),
                }
            }
            (Route::Extension(index), _) => match self.callbacks.extensions.get(index) {
                Some(handler) => handler.handle(ctx, activity, log).await,
                None => Ok(()),
            },
            (Route::Fallback, _) => match &self.callbacks.fallback {
                Some(handler) => handler.handle(ctx, activity, log).await,
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Store the activity, then apply its side effects.
    pub async fn dispatch(&self, ctx: &HandlerContext<'_>, activity: &Activity) -> DispatchReport {
        let mut log = EffectLog::default();
        let kind = activity.kind().as_str().to_string();

        let Some(id) = activity.id().cloned() else {
            return DispatchReport {
                error: Some(AppError::MalformedActivity(
                    "Activity has no id".to_string(),
                )),
                ..DispatchReport::default()
            };
        };

        if let Err(e) = ctx.store.put_object(&id, activity.as_object().clone()).await {
            return DispatchReport {
                error: Some(AppError::dispatch(kind, e)),
                ..DispatchReport::default()
            };
        }
        log.push(Effect::Stored {
            activity: id.clone(),
        });

        let route = self.route(activity.kind());
        debug!(activity_id = %id, kind = %kind, route = ?route, side = ?ctx.side, "Dispatching activity");

        let result = self.run(route, ctx, activity, &mut log).await;

        let error = result.err().map(|e| {
            error!(
                activity_id = %id,
                kind = %kind,
                applied = log.applied.len(),
                error = %e,
                "Activity handler failed"
            );
            AppError::dispatch(kind, e)
        });

        DispatchReport {
            effects: log.applied,
            outbound: log.outbound,
            error,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("defaults", &self.defaults.len())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
