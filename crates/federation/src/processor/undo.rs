//! Undo activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::info;

use super::collection::apply_membership;
use super::follow::undo_follow;
use super::{first_object, reference_iri};
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext};
use crate::vocab::{Activity, StandardKind};

/// Reverses a prior activity by the same actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct UndoProcessor;

#[async_trait]
impl ActivityHandler for UndoProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let original_id = reference_iri(first_object(activity)?)?;
        let stored = ctx
            .store
            .get_object(&original_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Activity to undo not found: {original_id}"))
            })?;
        let original = Activity::from_object(stored)?;

        let undoers = activity.actors();
        let authors = original.actors();
        if authors.is_empty() || !authors.iter().all(|author| undoers.contains(author)) {
            return Err(AppError::AuthorizationDenied(format!(
                "{original_id} was not performed by the undoing actor"
            )));
        }

        info!(
            activity_id = ?activity.id(),
            original = %original_id,
            kind = %original.kind(),
            "Undoing activity"
        );

        match original.kind().standard() {
            Some(StandardKind::Follow) => undo_follow(ctx, &original, log).await,
            Some(StandardKind::Like | StandardKind::Announce) => {
                if ctx.store.remove_object(&original_id).await? {
                    log.push(Effect::RecordUndone {
                        activity: original_id,
                    });
                }
                Ok(())
            }
            Some(StandardKind::Block) => {
                if let Some(block) = ctx.store.remove_block(&original_id).await? {
                    log.push(Effect::BlockUndone { block: block.id });
                }
                Ok(())
            }
            Some(StandardKind::Add) => apply_membership(ctx, &original, false, log).await,
            Some(StandardKind::Remove) => apply_membership(ctx, &original, true, log).await,
            _ => Err(AppError::Unprocessable(format!(
                "{} activities cannot be undone",
                original.kind()
            ))),
        }
    }
}
