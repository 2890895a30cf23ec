//! Inbox forwarding decision.
//!
//! A received activity is relayed to the members of a local collection when it
//! addresses that collection and its reference graph (`object`, `target`,
//! `origin`, `inReplyTo`) reaches something this server owns within the
//! configured number of levels.
//!
//! This is the ActivityPub inbox-forwarding rule: an activity that addresses
//! a local collection is relayed, one that leaves it out is not. The reading
//! "forward when the followers collection is not already included" is not
//! used.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use apub_common::{AppError, AppResult};
use futures::future::try_join_all;
use tracing::{debug, info};
use url::Url;

use crate::capability::Capabilities;
use crate::directory::Directory;
use crate::resolver::{RecipientResolver, RecipientSet, RecursionContext, Seed, direct_addressees};
use crate::store::ActivityStore;
use crate::vocab::{Activity, ApObject, Reference};

/// Why an activity is not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotForwarded {
    /// Forwarding depth is 0.
    Disabled,
    /// No addressed collection belongs to this server.
    NoLocalCollection,
    /// Nothing in the reference graph belongs to this server.
    NoLocalReference,
    /// No candidate survived exclusion, blocking and filtering.
    NoCandidates,
}

/// Outcome of the forwarding check.
#[derive(Debug, Clone)]
pub enum ForwardingDecision {
    NotRequired(NotForwarded),
    Forward(RecipientSet),
}

/// Decides inbox forwarding.
#[derive(Clone)]
pub struct ForwardingDecider {
    store: Arc<dyn ActivityStore>,
    directory: Arc<dyn Directory>,
    capabilities: Arc<dyn Capabilities>,
    resolver: RecipientResolver,
}

impl ForwardingDecider {
    /// Create a decider.
    #[must_use]
    pub fn new(
        store: Arc<dyn ActivityStore>,
        directory: Arc<dyn Directory>,
        capabilities: Arc<dyn Capabilities>,
        resolver: RecipientResolver,
    ) -> Self {
        Self {
            store,
            directory,
            capabilities,
            resolver,
        }
    }

    /// Decide whether `activity` must be forwarded, and to whom.
    pub async fn decide(&self, activity: &Activity) -> AppResult<ForwardingDecision> {
        let max_depth = self.capabilities.max_inbox_forwarding_recursion_depth();
        if max_depth == 0 {
            return Ok(ForwardingDecision::NotRequired(NotForwarded::Disabled));
        }

        let mut members = Vec::new();
        let mut owned_collection = false;
        for reference in activity.as_object().visible_addressing() {
            let Some(iri) = reference.iri() else { continue };
            if !self.store.owns(iri) {
                continue;
            }
            if let Some(collection) = self.store.local_collection(iri).await? {
                owned_collection = true;
                members.extend(collection);
            }
        }
        if !owned_collection {
            return Ok(ForwardingDecision::NotRequired(
                NotForwarded::NoLocalCollection,
            ));
        }

        let mut context = RecursionContext::new(max_depth);
        if !self.reaches_local(activity, &mut context).await {
            debug!(
                activity_id = ?activity.id(),
                visited = context.visited(),
                "No local reference within forwarding depth"
            );
            return Ok(ForwardingDecision::NotRequired(
                NotForwarded::NoLocalReference,
            ));
        }

        let candidates = self.candidates(activity, members).await?;
        if candidates.is_empty() {
            return Ok(ForwardingDecision::NotRequired(NotForwarded::NoCandidates));
        }

        let approved = self
            .capabilities
            .filter_forwarding(&candidates, activity)
            .await?;
        let allowed: HashSet<&str> = candidates.iter().map(Url::as_str).collect();
        if let Some(stray) = approved.iter().find(|iri| !allowed.contains(iri.as_str())) {
            return Err(AppError::Configuration(format!(
                "Forwarding filter returned {stray}, which is not a candidate"
            )));
        }
        if approved.is_empty() {
            return Ok(ForwardingDecision::NotRequired(NotForwarded::NoCandidates));
        }

        let mut targets = RecursionContext::new(0);
        let set = self
            .resolver
            .resolve_seeds(
                approved.into_iter().map(Seed::visible).collect(),
                &activity.actors(),
                &mut targets,
            )
            .await?;

        info!(
            activity_id = ?activity.id(),
            recipients = set.len(),
            "Forwarding activity"
        );

        if set.is_empty() {
            return Ok(ForwardingDecision::NotRequired(NotForwarded::NoCandidates));
        }
        Ok(ForwardingDecision::Forward(set))
    }

    /// Collection members minus the activity's actors, actors it already
    /// addresses, and blocked actors.
    async fn candidates(&self, activity: &Activity, members: Vec<Url>) -> AppResult<Vec<Url>> {
        let mut skip: HashSet<String> = activity.actors().iter().map(Url::to_string).collect();
        skip.extend(direct_addressees(activity).iter().map(Url::to_string));

        let mut unique = Vec::new();
        for member in members {
            if skip.insert(member.to_string()) {
                unique.push(member);
            }
        }

        let blocked = try_join_all(unique.iter().map(|iri| {
            let capabilities = Arc::clone(&self.capabilities);
            let iri = iri.clone();
            async move { capabilities.is_blocked(std::slice::from_ref(&iri)).await }
        }))
        .await?;

        Ok(unique
            .into_iter()
            .zip(blocked)
            .filter_map(|(iri, blocked)| (!blocked).then_some(iri))
            .collect())
    }

    /// Walk the reference graph level by level, up to the context's depth.
    async fn reaches_local(&self, activity: &Activity, context: &mut RecursionContext) -> bool {
        let mut worklist: VecDeque<(Reference, usize)> = activity
            .as_object()
            .references()
            .cloned()
            .map(|reference| (reference, 1))
            .collect();

        while let Some((reference, level)) = worklist.pop_front() {
            if level > context.max_depth() {
                context.truncate();
                continue;
            }

            if let Some(iri) = reference.iri() {
                if !context.visit(iri) {
                    continue;
                }
                if self.store.owns(iri) {
                    return true;
                }
            }

            let body = match reference {
                Reference::Object(object) => Some(*object),
                Reference::Iri(iri) => self.dereference(&iri).await,
            };
            let Some(body) = body else { continue };

            if body.owners().iter().any(|owner| self.store.owns(owner)) {
                return true;
            }
            worklist.extend(
                body.references()
                    .cloned()
                    .map(|reference| (reference, level + 1)),
            );
        }
        false
    }

    async fn dereference(&self, iri: &Url) -> Option<ApObject> {
        match self.store.get_object(iri).await {
            Ok(Some(object)) => return Some(object),
            Ok(None) => {}
            Err(e) => debug!(iri = %iri, error = %e, "Stored copy unavailable"),
        }
        match self.directory.fetch_object(iri).await {
            Ok(object) => Some(object),
            Err(e) => {
                debug!(iri = %iri, error = %e, "Reference not dereferenceable");
                None
            }
        }
    }
}
