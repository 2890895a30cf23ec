//! Create activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use tracing::info;

use super::resolve_reference;
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext, Side};
use crate::vocab::Activity;

/// Persists the created object(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateProcessor;

#[async_trait]
impl ActivityHandler for CreateProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let objects = &activity.as_object().object;
        if objects.is_empty() {
            return Err(AppError::MalformedActivity(
                "Create has no object".to_string(),
            ));
        }

        for reference in objects {
            let object = resolve_reference(ctx, reference).await?;
            let id = object
                .id
                .clone()
                .or_else(|| reference.iri().cloned())
                .ok_or_else(|| {
                    AppError::MalformedActivity("Created object has no id".to_string())
                })?;

            // Peers cannot create objects in our namespace.
            if ctx.side == Side::Inbox && ctx.store.owns(&id) {
                return Err(AppError::AuthorizationDenied(format!(
                    "Remote Create of local object {id}"
                )));
            }

            info!(
                activity_id = ?activity.id(),
                object = %id,
                object_type = %object.kind,
                "Storing created object"
            );
            ctx.store.put_object(&id, object).await?;
            log.push(Effect::ObjectCreated { object: id });
        }

        Ok(())
    }
}
