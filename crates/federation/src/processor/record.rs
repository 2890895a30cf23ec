//! Like and Announce activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::info;

use super::{first_object, reference_iri, sole_actor};
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext};
use crate::vocab::Activity;

/// Records the activity; the target object is left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordProcessor;

#[async_trait]
impl ActivityHandler for RecordProcessor {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let actor = sole_actor(activity)?;
        let object = reference_iri(first_object(activity)?)?;
        let id = activity.id().cloned().ok_or_else(|| {
            AppError::MalformedActivity(format!("{} has no id", activity.kind()))
        })?;

        info!(
            kind = %activity.kind(),
            actor = %actor,
            object = %object,
            "Recorded activity"
        );
        log.push(Effect::Recorded { activity: id });
        Ok(())
    }
}
