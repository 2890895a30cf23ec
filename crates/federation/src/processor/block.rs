//! Block activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::info;

use super::{first_object, reference_iri, sole_actor};
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext};
use crate::store::BlockRecord;
use crate::vocab::Activity;

/// Records a block relationship.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockProcessor;

#[async_trait]
impl ActivityHandler for BlockProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let blocker = sole_actor(activity)?;
        let blocked = reference_iri(first_object(activity)?)?;
        let id = activity
            .id()
            .cloned()
            .ok_or_else(|| AppError::MalformedActivity("Block has no id".to_string()))?;

        info!(blocker = %blocker, blocked = %blocked, side = ?ctx.side, "Recording block");
        ctx.store
            .put_block(BlockRecord {
                id: id.clone(),
                blocker,
                blocked,
            })
            .await?;
        log.push(Effect::BlockRecorded { block: id });
        Ok(())
    }
}
