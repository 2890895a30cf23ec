//! Add and Remove activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::{debug, info};

use super::sole_actor;
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext};
use crate::vocab::{Activity, Reference};

/// Mutates the membership of a local collection named by `target`.
#[derive(Debug, Clone, Copy)]
pub struct CollectionProcessor {
    insert: bool,
}

impl CollectionProcessor {
    /// Processor for Add.
    #[must_use]
    pub const fn add() -> Self {
        Self { insert: true }
    }

    /// Processor for Remove.
    #[must_use]
    pub const fn remove() -> Self {
        Self { insert: false }
    }
}

#[async_trait]
impl ActivityHandler for CollectionProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        apply_membership(ctx, activity, self.insert, log).await
    }
}

/// Add (or remove) every `object` of `activity` to (or from) its `target`.
pub(super) async fn apply_membership(
    ctx: &HandlerContext<'_>,
    activity: &Activity,
    insert: bool,
    log: &mut EffectLog,
) -> AppResult<()> {
    let target = activity
        .as_object()
        .target
        .first()
        .and_then(Reference::iri)
        .cloned()
        .ok_or_else(|| {
            AppError::MalformedActivity(format!("{} has no target", activity.kind()))
        })?;

    if !ctx.store.owns(&target) {
        debug!(target = %target, "Target collection is not local; nothing to change");
        return Ok(());
    }

    let actor = sole_actor(activity)?;
    let namespace = format!("{}/", actor.as_str().trim_end_matches('/'));
    if !target.as_str().starts_with(&namespace) {
        return Err(AppError::AuthorizationDenied(format!(
            "{actor} does not own collection {target}"
        )));
    }

    for item in activity.as_object().object.iter().filter_map(Reference::iri) {
        let changed = if insert {
            ctx.store.add_to_collection(&target, item).await?
        } else {
            ctx.store.remove_from_collection(&target, item).await?
        };
        if !changed {
            continue;
        }
        info!(collection = %target, item = %item, insert, "Collection membership changed");
        log.push(if insert {
            Effect::CollectionAdded {
                collection: target.clone(),
                item: item.clone(),
            }
        } else {
            Effect::CollectionRemoved {
                collection: target.clone(),
                item: item.clone(),
            }
        });
    }
    Ok(())
}
