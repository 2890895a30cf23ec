//! Built-in handlers for the standard activity kinds.

#![allow(missing_docs)]

mod accept;
mod block;
mod collection;
mod create;
mod delete;
mod follow;
mod record;
mod reject;
mod undo;
mod update;

use std::collections::HashMap;
use std::sync::Arc;

use apub_common::{AppError, AppResult};
use url::Url;

pub use accept::AcceptProcessor;
pub use block::BlockProcessor;
pub use collection::CollectionProcessor;
pub use create::CreateProcessor;
pub use delete::DeleteProcessor;
pub use follow::{FollowProcessor, build_response, complete_follow};
pub use record::RecordProcessor;
pub use reject::RejectProcessor;
pub use undo::UndoProcessor;
pub use update::UpdateProcessor;

use crate::dispatch::{ActivityHandler, HandlerContext, Side};
use crate::vocab::{Activity, ApObject, Reference, StandardKind};

/// The default handler table.
pub(crate) fn defaults() -> HashMap<StandardKind, Arc<dyn ActivityHandler>> {
    let record: Arc<dyn ActivityHandler> = Arc::new(RecordProcessor);
    let mut table: HashMap<StandardKind, Arc<dyn ActivityHandler>> = HashMap::new();
    table.insert(StandardKind::Create, Arc::new(CreateProcessor));
    table.insert(StandardKind::Update, Arc::new(UpdateProcessor));
    table.insert(StandardKind::Delete, Arc::new(DeleteProcessor));
    table.insert(StandardKind::Follow, Arc::new(FollowProcessor));
    table.insert(StandardKind::Accept, Arc::new(AcceptProcessor));
    table.insert(StandardKind::Reject, Arc::new(RejectProcessor));
    table.insert(StandardKind::Add, Arc::new(CollectionProcessor::add()));
    table.insert(StandardKind::Remove, Arc::new(CollectionProcessor::remove()));
    table.insert(StandardKind::Like, Arc::clone(&record));
    table.insert(StandardKind::Announce, record);
    table.insert(StandardKind::Undo, Arc::new(UndoProcessor));
    table.insert(StandardKind::Block, Arc::new(BlockProcessor));
    table
}

/// The one actor performing `activity`.
fn sole_actor(activity: &Activity) -> AppResult<Url> {
    match activity.actors().as_slice() {
        [actor] => Ok(actor.clone()),
        [] => Err(AppError::MalformedActivity(format!(
            "{} has no actor",
            activity.kind()
        ))),
        _ => Err(AppError::MalformedActivity(format!(
            "{} has more than one actor",
            activity.kind()
        ))),
    }
}

/// The first `object` of `activity`.
fn first_object(activity: &Activity) -> AppResult<&Reference> {
    activity.as_object().object.first().ok_or_else(|| {
        AppError::MalformedActivity(format!("{} has no object", activity.kind()))
    })
}

fn reference_iri(reference: &Reference) -> AppResult<Url> {
    reference
        .iri()
        .cloned()
        .ok_or_else(|| AppError::MalformedActivity("Referenced object has no id".to_string()))
}

/// The body behind a reference: embedded, stored locally, or (for received
/// activities) fetched from the network.
async fn resolve_reference(ctx: &HandlerContext<'_>, reference: &Reference) -> AppResult<ApObject> {
    match reference {
        Reference::Object(object) => Ok(object.as_ref().clone()),
        Reference::Iri(iri) => {
            if let Some(object) = ctx.store.get_object(iri).await? {
                return Ok(object);
            }
            match ctx.side {
                Side::Inbox => ctx.directory.fetch_object(iri).await,
                Side::Outbox => Err(AppError::NotFound(format!("Object not found: {iri}"))),
            }
        }
    }
}

/// Require one of the activity's actors to own `object`.
///
/// Objects without attribution are owned by actors on the same origin.
fn check_owner(activity: &Activity, object: &ApObject, iri: &Url) -> AppResult<()> {
    let actors = activity.actors();
    let owners = object.owners();
    let allowed = if owners.is_empty() {
        actors.iter().any(|actor| actor.origin() == iri.origin())
    } else {
        actors.iter().any(|actor| owners.contains(actor))
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::AuthorizationDenied(format!(
            "{iri} is not owned by the activity's actor"
        )))
    }
}
