//! Delete activity processor.

use apub_common::AppResult;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use super::{check_owner, first_object, reference_iri};
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext};
use crate::vocab::{Activity, ApObject};

/// Replaces an owned object with a Tombstone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteProcessor;

#[async_trait]
impl ActivityHandler for DeleteProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let id = reference_iri(first_object(activity)?)?;

        let Some(existing) = ctx.store.get_object(&id).await? else {
            debug!(object = %id, "Delete of unknown object ignored");
            return Ok(());
        };
        if existing.kind == "Tombstone" {
            return Ok(());
        }

        check_owner(activity, &existing, &id)?;

        let tombstone = ApObject::new("Tombstone")
            .with_id(id.clone())
            .with_extra("formerType", Value::String(existing.kind))
            .with_extra("deleted", Value::String(Utc::now().to_rfc3339()));

        info!(activity_id = ?activity.id(), object = %id, "Tombstoning object");
        ctx.store.put_object(&id, tombstone).await?;
        log.push(Effect::Tombstoned { object: id });
        Ok(())
    }
}
