//! Expansion of addressing into a deduplicated set of inboxes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use apub_common::{AppError, AppResult};
use futures::future::try_join_all;
use tracing::{debug, warn};
use url::Url;

use crate::actor::{Actor, CollectionPage};
use crate::capability::Capabilities;
use crate::directory::{Directory, Resolved};
use crate::store::ActivityStore;
use crate::vocab::{Activity, iris, is_public};

/// Per-operation traversal state: a depth bound and the IRIs already expanded.
///
/// Visited IRIs live in an arena indexed by their string form, so each IRI is
/// expanded at most once however many paths reach it.
#[derive(Debug)]
pub struct RecursionContext {
    max_depth: usize,
    arena: Vec<Url>,
    index: HashMap<String, usize>,
    truncated: usize,
}

impl RecursionContext {
    /// Create a context bounded at `max_depth` levels.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            arena: Vec::new(),
            index: HashMap::new(),
            truncated: 0,
        }
    }

    /// Mark `iri` visited. Returns `false` if it already was.
    pub fn visit(&mut self, iri: &Url) -> bool {
        if self.index.contains_key(iri.as_str()) {
            return false;
        }
        self.index.insert(iri.to_string(), self.arena.len());
        self.arena.push(iri.clone());
        true
    }

    /// Whether an item at `depth` may be expanded one level further.
    #[must_use]
    pub const fn can_descend(&self, depth: usize) -> bool {
        depth < self.max_depth
    }

    /// Record that a branch stopped at the depth bound.
    pub fn truncate(&mut self) {
        self.truncated += 1;
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of IRIs visited.
    #[must_use]
    pub fn visited(&self) -> usize {
        self.arena.len()
    }

    /// Number of branches cut off at the depth bound.
    #[must_use]
    pub const fn truncated(&self) -> usize {
        self.truncated
    }
}

/// One resolved delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub actor: Url,
    pub inbox: Url,
    /// Reached only through `bto`/`bcc`.
    pub blind: bool,
}

/// A branch of resolution that failed without failing the whole operation.
#[derive(Debug, Clone)]
pub struct ResolutionFailure {
    pub iri: Url,
    pub error: String,
}

/// Deduplicated, block-filtered delivery targets.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    pub recipients: Vec<Recipient>,
    pub failures: Vec<ResolutionFailure>,
    /// Branches cut off at the depth bound.
    pub truncated: usize,
}

impl RecipientSet {
    /// Distinct inboxes, in resolution order.
    #[must_use]
    pub fn inboxes(&self) -> Vec<Url> {
        self.recipients.iter().map(|r| r.inbox.clone()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipients.len()
    }
}

/// A seed IRI and whether it came from blind addressing.
#[derive(Debug, Clone)]
pub struct Seed {
    pub iri: Url,
    pub blind: bool,
}

impl Seed {
    #[must_use]
    pub const fn visible(iri: Url) -> Self {
        Self { iri, blind: false }
    }

    #[must_use]
    pub const fn blind(iri: Url) -> Self {
        Self { iri, blind: true }
    }
}

struct Pending {
    iri: Url,
    depth: usize,
    blind: bool,
}

/// Expands addressing into inboxes.
#[derive(Clone)]
pub struct RecipientResolver {
    store: Arc<dyn ActivityStore>,
    directory: Arc<dyn Directory>,
    capabilities: Arc<dyn Capabilities>,
    prefer_shared_inbox: bool,
    max_collection_pages: usize,
}

impl RecipientResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        store: Arc<dyn ActivityStore>,
        directory: Arc<dyn Directory>,
        capabilities: Arc<dyn Capabilities>,
        prefer_shared_inbox: bool,
        max_collection_pages: usize,
    ) -> Self {
        Self {
            store,
            directory,
            capabilities,
            prefer_shared_inbox,
            max_collection_pages: max_collection_pages.max(1),
        }
    }

    /// Resolve the delivery targets of an outbound activity.
    ///
    /// Visible addressing is expanded before blind addressing, so an actor
    /// named in both is treated as visible.
    pub async fn resolve(&self, activity: &Activity) -> AppResult<RecipientSet> {
        let object = activity.as_object();
        let seeds = object
            .visible_addressing()
            .filter_map(|r| r.iri().cloned())
            .map(Seed::visible)
            .chain(
                object
                    .blind_addressing()
                    .filter_map(|r| r.iri().cloned())
                    .map(Seed::blind),
            )
            .collect();

        let mut context =
            RecursionContext::new(self.capabilities.max_delivery_recursion_depth());
        self.resolve_seeds(seeds, &activity.actors(), &mut context)
            .await
    }

    /// Resolve explicit seeds, skipping `exclude` and the Public collection.
    pub async fn resolve_seeds(
        &self,
        seeds: Vec<Seed>,
        exclude: &[Url],
        context: &mut RecursionContext,
    ) -> AppResult<RecipientSet> {
        let excluded: HashSet<&str> = exclude.iter().map(Url::as_str).collect();
        let mut worklist: VecDeque<Pending> = seeds
            .into_iter()
            .map(|seed| Pending {
                iri: seed.iri,
                depth: 0,
                blind: seed.blind,
            })
            .collect();

        // Actor id -> (actor, blind); insertion order kept in `order`.
        let mut actors: HashMap<String, (Actor, bool)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut failures = Vec::new();

        while let Some(item) = worklist.pop_front() {
            if is_public(&item.iri) || excluded.contains(item.iri.as_str()) {
                continue;
            }

            if let Some(seen) = actors.get_mut(item.iri.as_str()) {
                seen.1 &= item.blind;
                continue;
            }
            if !context.visit(&item.iri) {
                continue;
            }

            match self.classify(&item.iri).await {
                Ok(Target::Actor(actor)) => {
                    let key = actor.id.to_string();
                    if excluded.contains(key.as_str()) {
                        continue;
                    }
                    if let Some(seen) = actors.get_mut(&key) {
                        seen.1 &= item.blind;
                        continue;
                    }
                    order.push(key.clone());
                    actors.insert(key, (actor, item.blind));
                }
                Ok(Target::Collection(members)) => {
                    if !context.can_descend(item.depth) {
                        debug!(collection = %item.iri, depth = item.depth, "Collection not expanded at depth bound");
                        context.truncate();
                        continue;
                    }
                    let (members, error) = self.collection_members(&item.iri, members).await;
                    if let Some(error) = error {
                        warn!(collection = %item.iri, error = %error, "Collection partially read");
                        failures.push(ResolutionFailure {
                            iri: item.iri.clone(),
                            error,
                        });
                    }
                    worklist.extend(members.into_iter().map(|iri| Pending {
                        iri,
                        depth: item.depth + 1,
                        blind: item.blind,
                    }));
                }
                Err(e) => {
                    warn!(iri = %item.iri, error = %e, "Skipping unresolvable recipient");
                    failures.push(ResolutionFailure {
                        iri: item.iri.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let ordered: Vec<(Actor, bool)> = order
            .into_iter()
            .filter_map(|key| actors.remove(&key))
            .collect();

        let blocked = try_join_all(ordered.iter().map(|(actor, _)| {
            let capabilities = Arc::clone(&self.capabilities);
            let id = actor.id.clone();
            async move { capabilities.is_blocked(std::slice::from_ref(&id)).await }
        }))
        .await?;

        let mut by_inbox: HashMap<String, usize> = HashMap::new();
        let mut recipients: Vec<Recipient> = Vec::new();
        for ((actor, blind), is_blocked) in ordered.into_iter().zip(blocked) {
            if is_blocked {
                debug!(actor = %actor.id, "Dropping blocked recipient");
                continue;
            }
            let inbox = actor.delivery_inbox(self.prefer_shared_inbox).clone();
            if let Some(&existing) = by_inbox.get(inbox.as_str()) {
                recipients[existing].blind &= blind;
                continue;
            }
            by_inbox.insert(inbox.to_string(), recipients.len());
            recipients.push(Recipient {
                actor: actor.id,
                inbox,
                blind,
            });
        }

        debug!(
            recipients = recipients.len(),
            failures = failures.len(),
            truncated = context.truncated(),
            "Resolved recipients"
        );

        Ok(RecipientSet {
            recipients,
            failures,
            truncated: context.truncated(),
        })
    }

    async fn classify(&self, iri: &Url) -> AppResult<Target> {
        if self.store.owns(iri) {
            if let Some(members) = self.store.local_collection(iri).await? {
                return Ok(Target::Collection(Members::Local(members)));
            }
            return match self.store.local_actor(iri).await? {
                Some(actor) => Ok(Target::Actor(actor)),
                None => Err(AppError::UnknownRecipient(iri.to_string())),
            };
        }

        match self.directory.resolve(iri).await {
            Ok(Resolved::Actor(actor)) => Ok(Target::Actor(actor)),
            Ok(Resolved::Collection(first)) => Ok(Target::Collection(Members::Remote(first))),
            Err(e) => Err(AppError::UnreachableRecipient {
                recipient: iri.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Read every page of a collection, bounded by the page cap and a
    /// visited-page guard. A failure after the first page keeps the members
    /// read so far and reports the error alongside them.
    async fn collection_members(
        &self,
        collection: &Url,
        members: Members,
    ) -> (Vec<Url>, Option<String>) {
        let first = match members {
            Members::Local(members) => return (members, None),
            Members::Remote(first) => first,
        };

        let mut seen_pages: HashSet<String> = HashSet::new();
        seen_pages.insert(collection.to_string());
        let mut members = first.members;
        let mut next = first.next;
        let mut pages = 1;

        while let Some(page_iri) = next.take() {
            if pages >= self.max_collection_pages {
                debug!(collection = %collection, pages, "Page cap reached");
                break;
            }
            if !seen_pages.insert(page_iri.to_string()) {
                break;
            }
            match self.directory.resolve_collection_page(&page_iri).await {
                Ok(page) => {
                    pages += 1;
                    members.extend(page.members);
                    next = page.next;
                }
                Err(e) => return (members, Some(e.to_string())),
            }
        }

        (members, None)
    }
}

enum Target {
    Actor(Actor),
    Collection(Members),
}

enum Members {
    Local(Vec<Url>),
    /// First page as fetched; later pages are read on expansion.
    Remote(CollectionPage),
}

/// IRIs an activity addresses directly, visible or blind.
#[must_use]
pub fn direct_addressees(activity: &Activity) -> Vec<Url> {
    let object = activity.as_object();
    let mut out = iris(&object.to);
    out.extend(iris(&object.cc));
    out.extend(iris(&object.bto));
    out.extend(iris(&object.bcc));
    out.extend(iris(&object.audience));
    out
}
