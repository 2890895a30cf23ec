//! Persistence of activities, objects, collections and relationships.

mod memory;

pub use memory::MemoryStore;

use apub_common::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::actor::Actor;
use crate::vocab::ApObject;

/// Lifecycle of a follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    Pending,
    Accepted,
    Rejected,
}

/// A recorded Follow, keyed by the Follow activity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRecord {
    pub id: Url,
    pub follower: Url,
    pub followee: Url,
    pub state: FollowState,
}

/// A recorded Block, keyed by the Block activity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: Url,
    pub blocker: Url,
    pub blocked: Url,
}

/// Cursor for reading a collection newest-first.
///
/// `max_seq` is exclusive: only items inserted before that sequence number are
/// returned, so items appended after the first page was read never shift
/// later pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub max_seq: Option<u64>,
    pub limit: usize,
}

impl PageRequest {
    /// First page.
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self {
            max_seq: None,
            limit,
        }
    }

    /// Page starting below `max_seq`.
    #[must_use]
    pub const fn below(max_seq: u64, limit: usize) -> Self {
        Self {
            max_seq: Some(max_seq),
            limit,
        }
    }
}

/// One page of a local collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionSlice {
    /// `(sequence, item)` pairs, newest first.
    pub items: Vec<(u64, Url)>,
    pub total: u64,
    /// Cursor for the following page, if more items exist.
    pub next_max_seq: Option<u64>,
}

/// Storage collaborator.
///
/// Implementations provide their own concurrency discipline; the engine calls
/// them from many requests at once.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Whether this server is authoritative for `iri`.
    fn owns(&self, iri: &Url) -> bool;

    /// Look up a local actor.
    async fn local_actor(&self, iri: &Url) -> AppResult<Option<Actor>>;

    /// Record that activity `id` has been seen. Returns `false` if it already was.
    ///
    /// Must be an atomic insert-if-absent.
    async fn mark_processed(&self, id: &Url) -> AppResult<bool>;

    async fn get_object(&self, iri: &Url) -> AppResult<Option<ApObject>>;

    async fn put_object(&self, iri: &Url, object: ApObject) -> AppResult<()>;

    /// Returns whether an object was removed.
    async fn remove_object(&self, iri: &Url) -> AppResult<bool>;

    /// Members of a local collection, oldest first. `None` if `iri` is not a local collection.
    async fn local_collection(&self, iri: &Url) -> AppResult<Option<Vec<Url>>>;

    /// Append `item`. Returns `false` if it was already a member.
    async fn add_to_collection(&self, collection: &Url, item: &Url) -> AppResult<bool>;

    /// Returns whether `item` was a member.
    async fn remove_from_collection(&self, collection: &Url, item: &Url) -> AppResult<bool>;

    async fn page_collection(
        &self,
        collection: &Url,
        page: PageRequest,
    ) -> AppResult<CollectionSlice>;

    async fn put_follow(&self, record: FollowRecord) -> AppResult<()>;

    async fn get_follow(&self, id: &Url) -> AppResult<Option<FollowRecord>>;

    async fn remove_follow(&self, id: &Url) -> AppResult<Option<FollowRecord>>;

    async fn put_block(&self, record: BlockRecord) -> AppResult<()>;

    async fn remove_block(&self, id: &Url) -> AppResult<Option<BlockRecord>>;

    /// Whether `blocker` has an active block on `blocked`.
    async fn is_blocking(&self, blocker: &Url, blocked: &Url) -> AppResult<bool>;
}
