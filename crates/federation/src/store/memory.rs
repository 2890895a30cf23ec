//! In-memory store.

use std::collections::{HashMap, HashSet};

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tokio::sync::RwLock;
use url::Url;

use super::{ActivityStore, BlockRecord, CollectionSlice, FollowRecord, PageRequest};
use crate::actor::Actor;
use crate::vocab::ApObject;

#[derive(Default)]
struct State {
    actors: HashMap<String, Actor>,
    processed: HashSet<String>,
    objects: HashMap<String, ApObject>,
    collections: HashMap<String, Vec<(u64, Url)>>,
    follows: HashMap<String, FollowRecord>,
    blocks: HashMap<String, BlockRecord>,
    next_seq: u64,
}

/// Store backed by maps behind one lock, for embedding and tests.
///
/// Owns every IRI with the same origin as its base URL.
pub struct MemoryStore {
    base_url: Url,
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a store for the server at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            state: RwLock::new(State::default()),
        }
    }

    /// Register a local actor and create its collections.
    pub async fn register_local_actor(&self, actor: &Actor) -> AppResult<()> {
        if !self.owns(&actor.id) {
            return Err(AppError::Configuration(format!(
                "{} is not under {}",
                actor.id, self.base_url
            )));
        }

        let mut state = self.state.write().await;
        let collections = std::iter::once(&actor.inbox)
            .chain(&actor.outbox)
            .chain(&actor.followers)
            .chain(&actor.following);
        for collection in collections {
            state
                .collections
                .entry(collection.to_string())
                .or_default();
        }
        state.actors.insert(actor.id.to_string(), actor.clone());
        Ok(())
    }

    /// Number of stored objects and activities.
    pub async fn object_count(&self) -> usize {
        self.state.read().await.objects.len()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    fn owns(&self, iri: &Url) -> bool {
        iri.origin() == self.base_url.origin()
    }

    async fn local_actor(&self, iri: &Url) -> AppResult<Option<Actor>> {
        Ok(self.state.read().await.actors.get(iri.as_str()).cloned())
    }

    async fn mark_processed(&self, id: &Url) -> AppResult<bool> {
        Ok(self.state.write().await.processed.insert(id.to_string()))
    }

    async fn get_object(&self, iri: &Url) -> AppResult<Option<ApObject>> {
        Ok(self.state.read().await.objects.get(iri.as_str()).cloned())
    }

    async fn put_object(&self, iri: &Url, object: ApObject) -> AppResult<()> {
        self.state
            .write()
            .await
            .objects
            .insert(iri.to_string(), object);
        Ok(())
    }

    async fn remove_object(&self, iri: &Url) -> AppResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .objects
            .remove(iri.as_str())
            .is_some())
    }

    async fn local_collection(&self, iri: &Url) -> AppResult<Option<Vec<Url>>> {
        Ok(self
            .state
            .read()
            .await
            .collections
            .get(iri.as_str())
            .map(|members| members.iter().map(|(_, item)| item.clone()).collect()))
    }

    async fn add_to_collection(&self, collection: &Url, item: &Url) -> AppResult<bool> {
        if !self.owns(collection) {
            return Err(AppError::Unprocessable(format!(
                "Collection {collection} is not local"
            )));
        }

        let mut state = self.state.write().await;
        let seq = state.next_seq;
        let members = state
            .collections
            .entry(collection.to_string())
            .or_default();
        if members.iter().any(|(_, existing)| existing == item) {
            return Ok(false);
        }
        members.push((seq, item.clone()));
        state.next_seq += 1;
        Ok(true)
    }

    async fn remove_from_collection(&self, collection: &Url, item: &Url) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let Some(members) = state.collections.get_mut(collection.as_str()) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|(_, existing)| existing != item);
        Ok(members.len() != before)
    }

    async fn page_collection(
        &self,
        collection: &Url,
        page: PageRequest,
    ) -> AppResult<CollectionSlice> {
        let state = self.state.read().await;
        let members = state
            .collections
            .get(collection.as_str())
            .ok_or_else(|| AppError::NotFound(format!("Collection not found: {collection}")))?;

        let limit = page.limit.max(1);
        let mut items: Vec<(u64, Url)> = members
            .iter()
            .rev()
            .filter(|(seq, _)| page.max_seq.is_none_or(|max| *seq < max))
            .take(limit + 1)
            .cloned()
            .collect();

        let next_max_seq = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|(seq, _)| *seq)
        } else {
            None
        };

        Ok(CollectionSlice {
            items,
            total: members.len() as u64,
            next_max_seq,
        })
    }

    async fn put_follow(&self, record: FollowRecord) -> AppResult<()> {
        self.state
            .write()
            .await
            .follows
            .insert(record.id.to_string(), record);
        Ok(())
    }

    async fn get_follow(&self, id: &Url) -> AppResult<Option<FollowRecord>> {
        Ok(self.state.read().await.follows.get(id.as_str()).cloned())
    }

    async fn remove_follow(&self, id: &Url) -> AppResult<Option<FollowRecord>> {
        Ok(self.state.write().await.follows.remove(id.as_str()))
    }

    async fn put_block(&self, record: BlockRecord) -> AppResult<()> {
        self.state
            .write()
            .await
            .blocks
            .insert(record.id.to_string(), record);
        Ok(())
    }

    async fn remove_block(&self, id: &Url) -> AppResult<Option<BlockRecord>> {
        Ok(self.state.write().await.blocks.remove(id.as_str()))
    }

    async fn is_blocking(&self, blocker: &Url, blocked: &Url) -> AppResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .blocks
            .values()
            .any(|block| &block.blocker == blocker && &block.blocked == blocked))
    }
}
