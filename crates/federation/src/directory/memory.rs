//! In-memory directory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tokio::sync::RwLock;
use url::Url;

use super::{Directory, Resolved};
use crate::actor::{Actor, CollectionPage};
use crate::vocab::ApObject;

#[derive(Default)]
struct Entries {
    actors: HashMap<String, Actor>,
    pages: HashMap<String, CollectionPage>,
    objects: HashMap<String, ApObject>,
    unreachable: HashSet<String>,
}

/// Directory backed by maps, for embedding and tests.
///
/// Every lookup is counted so traversal bounds can be observed.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<Entries>,
    fetches: AtomicUsize,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor.
    pub async fn insert_actor(&self, actor: Actor) {
        self.entries
            .write()
            .await
            .actors
            .insert(actor.id.to_string(), actor);
    }

    /// Register a single-page collection.
    pub async fn insert_collection(&self, iri: &Url, members: Vec<Url>) {
        self.insert_page(iri, CollectionPage::last(members)).await;
    }

    /// Register a collection split across pages. Page `n` is `{iri}?page=n`.
    pub async fn insert_paged_collection(&self, iri: &Url, pages: Vec<Vec<Url>>) {
        let count = pages.len();
        for (index, members) in pages.into_iter().enumerate() {
            let current = if index == 0 {
                iri.clone()
            } else {
                Self::nth_page(iri, index)
            };
            let next = (index + 1 < count).then(|| Self::nth_page(iri, index + 1));
            self.insert_page(&current, CollectionPage { members, next })
                .await;
        }
    }

    /// Register a dereferenceable object under its id.
    pub async fn insert_object(&self, iri: &Url, object: ApObject) {
        self.entries
            .write()
            .await
            .objects
            .insert(iri.to_string(), object);
    }

    /// Make every lookup of `iri` fail.
    pub async fn mark_unreachable(&self, iri: &Url) {
        self.entries
            .write()
            .await
            .unreachable
            .insert(iri.to_string());
    }

    /// Number of lookups served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn insert_page(&self, iri: &Url, page: CollectionPage) {
        self.entries
            .write()
            .await
            .pages
            .insert(iri.to_string(), page);
    }

    fn nth_page(iri: &Url, index: usize) -> Url {
        let mut page = iri.clone();
        page.query_pairs_mut()
            .clear()
            .append_pair("page", &index.to_string());
        page
    }

    async fn check_reachable(&self, iri: &Url) -> AppResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.entries.read().await.unreachable.contains(iri.as_str()) {
            return Err(AppError::ExternalService(format!("{iri} is unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn resolve_actor(&self, iri: &Url) -> AppResult<Option<Actor>> {
        self.check_reachable(iri).await?;
        Ok(self.entries.read().await.actors.get(iri.as_str()).cloned())
    }

    async fn resolve_collection_page(&self, iri: &Url) -> AppResult<CollectionPage> {
        self.check_reachable(iri).await?;
        self.entries
            .read()
            .await
            .pages
            .get(iri.as_str())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Collection not found: {iri}")))
    }

    async fn fetch_object(&self, iri: &Url) -> AppResult<ApObject> {
        self.check_reachable(iri).await?;
        self.entries
            .read()
            .await
            .objects
            .get(iri.as_str())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Object not found: {iri}")))
    }

    async fn resolve(&self, iri: &Url) -> AppResult<Resolved> {
        self.check_reachable(iri).await?;
        let entries = self.entries.read().await;
        if let Some(actor) = entries.actors.get(iri.as_str()) {
            return Ok(Resolved::Actor(actor.clone()));
        }
        entries
            .pages
            .get(iri.as_str())
            .cloned()
            .map(Resolved::Collection)
            .ok_or_else(|| AppError::NotFound(format!("Neither actor nor collection: {iri}")))
    }
}
