//! Update activity processor.

use apub_common::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{check_owner, first_object, resolve_reference};
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext, Side};
use crate::vocab::{Activity, ApObject};

/// Replaces (inbox) or merges into (outbox) the stored object, if the actor owns it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateProcessor;

#[async_trait]
impl ActivityHandler for UpdateProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let reference = first_object(activity)?;
        if ctx.side == Side::Outbox && reference.as_object().is_none() {
            return Err(AppError::MalformedActivity(
                "Update must embed the updated object".to_string(),
            ));
        }

        let incoming = resolve_reference(ctx, reference).await?;
        let id = incoming
            .id
            .clone()
            .or_else(|| reference.iri().cloned())
            .ok_or_else(|| AppError::MalformedActivity("Updated object has no id".to_string()))?;
        let existing = ctx.store.get_object(&id).await?;

        match ctx.side {
            Side::Inbox => {
                check_owner(activity, existing.as_ref().unwrap_or(&incoming), &id)?;
                info!(activity_id = ?activity.id(), object = %id, "Replacing object");
                ctx.store.put_object(&id, incoming).await?;
                log.push(Effect::ObjectReplaced { object: id });
            }
            Side::Outbox => {
                let existing = existing
                    .ok_or_else(|| AppError::NotFound(format!("Object not found: {id}")))?;
                check_owner(activity, &existing, &id)?;
                let merged = merge(existing, incoming)?;
                info!(activity_id = ?activity.id(), object = %id, "Merging object update");
                ctx.store.put_object(&id, merged).await?;
                log.push(Effect::ObjectMerged { object: id });
            }
        }

        Ok(())
    }
}

/// Overlay the top-level fields of `patch` on `base`. A `null` field deletes it;
/// `id` and `type` never change.
fn merge(base: ApObject, patch: ApObject) -> AppResult<ApObject> {
    let to_map = |object: &ApObject| match serde_json::to_value(object) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::Internal("Object did not serialize to a map".to_string())),
        Err(e) => Err(AppError::Internal(format!("Failed to serialize object: {e}"))),
    };

    let mut merged = to_map(&base)?;
    for (key, value) in to_map(&patch)? {
        if key == "id" || key == "type" {
            continue;
        }
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }

    Ok(serde_json::from_value(Value::Object(merged))?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::processor::test_support::{Fixture, url};
    use crate::store::ActivityStore;
    use apub_common::OnFollow;
    use serde_json::json;

    fn note(extra: Value) -> ApObject {
        let mut value = json!({
            "type": "Note",
            "id": "https://a.example/notes/1",
            "attributedTo": "https://a.example/users/alice"
        });
        if let (Value::Object(map), Value::Object(more)) = (&mut value, extra) {
            map.extend(more);
        }
        serde_json::from_value(value).unwrap()
    }

    fn update(actor: &str, object: ApObject) -> Activity {
        Activity::from_object(
            ApObject::new("Update")
                .with_id(url("https://a.example/activities/u1"))
                .with_actor(url(actor))
                .with_object(object),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_outbox_update_merges_fields() {
        let fixture = Fixture::new().await;
        let iri = url("https://a.example/notes/1");
        fixture
            .store
            .put_object(&iri, note(json!({"content": "old", "summary": "cw"})))
            .await
            .unwrap();

        let patch = ApObject::new("Note")
            .with_id(iri.clone())
            .with_extra("content", json!("new"))
            .with_extra("summary", Value::Null);

        UpdateProcessor
            .handle(
                &fixture.ctx(Side::Outbox, OnFollow::DoNothing),
                &update("https://a.example/users/alice", patch),
                &mut EffectLog::default(),
            )
            .await
            .unwrap();

        let stored = fixture.store.get_object(&iri).await.unwrap().unwrap();
        assert_eq!(stored.extra["content"], "new");
        assert!(!stored.extra.contains_key("summary"));
        assert_eq!(stored.attributed_to_iris(), vec![url("https://a.example/users/alice")]);
    }

    #[tokio::test]
    async fn test_update_by_non_owner_is_rejected() {
        let fixture = Fixture::new().await;
        let iri = url("https://a.example/notes/1");
        fixture
            .store
            .put_object(&iri, note(json!({"content": "mine"})))
            .await
            .unwrap();

        let result = UpdateProcessor
            .handle(
                &fixture.ctx(Side::Inbox, OnFollow::DoNothing),
                &update("https://b.example/users/bob", note(json!({"content": "yours"}))),
                &mut EffectLog::default(),
            )
            .await;

        assert!(matches!(result, Err(AppError::AuthorizationDenied(_))));
        let stored = fixture.store.get_object(&iri).await.unwrap().unwrap();
        assert_eq!(stored.extra["content"], "mine");
    }
}
