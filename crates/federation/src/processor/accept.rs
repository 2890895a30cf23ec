//! Accept activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::info;

use super::{complete_follow, first_object, reference_iri};
use crate::dispatch::{ActivityHandler, EffectLog, HandlerContext};
use crate::store::FollowRecord;
use crate::vocab::Activity;

/// Marks a prior Follow as accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptProcessor;

#[async_trait]
impl ActivityHandler for AcceptProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let record = answered_follow(ctx, activity).await?;
        info!(follow = %record.id, actor = %record.followee, "Processing Accept");
        complete_follow(ctx, &record, true, log).await
    }
}

/// Locate the Follow an Accept or Reject answers and check that the
/// followee is the one answering.
pub(super) async fn answered_follow(
    ctx: &HandlerContext<'_>,
    activity: &Activity,
) -> AppResult<FollowRecord> {
    let follow_id = reference_iri(first_object(activity)?)?;
    let record = ctx
        .store
        .get_follow(&follow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No follow request {follow_id}")))?;

    if !activity.actors().contains(&record.followee) {
        return Err(AppError::AuthorizationDenied(format!(
            "Only {} may answer {follow_id}",
            record.followee
        )));
    }
    Ok(record)
}
