//! Reject activity processor.

use apub_common::AppResult;
use async_trait::async_trait;
use tracing::info;

use super::accept::answered_follow;
use super::complete_follow;
use crate::dispatch::{ActivityHandler, EffectLog, HandlerContext};
use crate::vocab::Activity;

/// Marks a prior Follow as rejected and drops any membership it created.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectProcessor;

#[async_trait]
impl ActivityHandler for RejectProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let record = answered_follow(ctx, activity).await?;
        info!(follow = %record.id, actor = %record.followee, "Processing Reject");
        complete_follow(ctx, &record, false, log).await
    }
}
