//! Policy hooks supplied by the embedding application.

use std::collections::HashMap;
use std::sync::Arc;

use apub_common::AppResult;
use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use url::Url;

use crate::dispatch::{ActivityHandler, ExtensionHandler};
use crate::vocab::{Activity, StandardKind};

/// A raw request as seen by the engine, independent of the HTTP framework.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// A POST carrying a payload.
    #[must_use]
    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A bodiless GET.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Which entry point an authentication decision is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    PostInbox,
    GetInbox,
    PostOutbox,
    GetOutbox,
}

/// Application hooks consulted by the engine.
///
/// Implementations must be safe to call concurrently from many requests.
#[async_trait]
pub trait Capabilities: Send + Sync {
    /// Decide whether `request` may use `access` on the local `actor`.
    ///
    /// `Ok(false)` rejects with unauthorized; `Err` rejects with an internal failure.
    async fn authenticate(
        &self,
        request: &InboundRequest,
        access: Access,
        actor: &Url,
    ) -> AppResult<bool>;

    /// True if any of `actors` is blocked from interacting with local actors.
    async fn is_blocked(&self, actors: &[Url]) -> AppResult<bool>;

    /// Final veto over forwarding targets. Must return a subset of `candidates`.
    async fn filter_forwarding(
        &self,
        candidates: &[Url],
        _activity: &Activity,
    ) -> AppResult<Vec<Url>> {
        Ok(candidates.to_vec())
    }

    /// Levels of reference traversal when deciding inbox forwarding. 0 disables forwarding.
    fn max_inbox_forwarding_recursion_depth(&self) -> usize;

    /// Levels of collection expansion when resolving recipients. 0 uses direct recipients only.
    fn max_delivery_recursion_depth(&self) -> usize;

    /// Application handlers. Read once when the engine is built.
    fn callbacks(&self) -> Callbacks {
        Callbacks::default()
    }
}

/// Application-supplied handlers: overrides for standard kinds, handlers for
/// extension kinds, and an optional catch-all.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) overrides: HashMap<StandardKind, Arc<dyn ActivityHandler>>,
    pub(crate) extensions: Vec<Arc<dyn ExtensionHandler>>,
    pub(crate) fallback: Option<Arc<dyn ActivityHandler>>,
}

impl Callbacks {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the built-in handler for `kind`.
    #[must_use]
    pub fn on(mut self, kind: StandardKind, handler: Arc<dyn ActivityHandler>) -> Self {
        self.overrides.insert(kind, handler);
        self
    }

    /// Register an extension handler. Scanned in registration order.
    #[must_use]
    pub fn extension(mut self, handler: Arc<dyn ExtensionHandler>) -> Self {
        self.extensions.push(handler);
        self
    }

    /// Handler for extension kinds no extension handler accepts.
    #[must_use]
    pub fn otherwise(mut self, handler: Arc<dyn ActivityHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut overrides: Vec<_> = self.overrides.keys().copied().collect();
        overrides.sort();
        f.debug_struct("Callbacks")
            .field("overrides", &overrides)
            .field("extensions", &self.extensions.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
