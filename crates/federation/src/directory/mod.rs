//! Lookup of remote actors, collections and objects.

mod memory;

pub use memory::MemoryDirectory;

use apub_common::AppResult;
use async_trait::async_trait;
use url::Url;

use crate::actor::{Actor, CollectionPage};
use crate::vocab::ApObject;

/// What a remote IRI turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Actor(Actor),
    /// A collection, with its first page already read.
    Collection(CollectionPage),
}

/// Read-only view of the federated network.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve an IRI to an actor. `Ok(None)` means the IRI is not an actor.
    async fn resolve_actor(&self, iri: &Url) -> AppResult<Option<Actor>>;

    /// Fetch one page of a collection. The first call receives the collection IRI.
    async fn resolve_collection_page(&self, iri: &Url) -> AppResult<CollectionPage>;

    /// Dereference an arbitrary object.
    async fn fetch_object(&self, iri: &Url) -> AppResult<ApObject>;

    /// Resolve an IRI to an actor or to a collection's first page.
    ///
    /// The default asks for an actor and then for a page; implementations
    /// that can classify one fetched document should override it.
    async fn resolve(&self, iri: &Url) -> AppResult<Resolved> {
        match self.resolve_actor(iri).await? {
            Some(actor) => Ok(Resolved::Actor(actor)),
            None => self
                .resolve_collection_page(iri)
                .await
                .map(Resolved::Collection),
        }
    }
}
