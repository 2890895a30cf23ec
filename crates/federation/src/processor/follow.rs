//! Follow activity processor and follow lifecycle helpers.

use apub_common::{AppError, AppResult, OnFollow};
use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::{first_object, reference_iri, sole_actor};
use crate::actor::Actor;
use crate::dispatch::{ActivityHandler, Effect, EffectLog, HandlerContext, Side};
use crate::store::{FollowRecord, FollowState};
use crate::vocab::{Activity, ApObject};

/// Records a pending follow, answering it when the follow policy says so.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowProcessor;

#[async_trait]
impl ActivityHandler for FollowProcessor {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        activity: &Activity,
        log: &mut EffectLog,
    ) -> AppResult<()> {
        let follower = sole_actor(activity)?;
        let followee = reference_iri(first_object(activity)?)?;
        let id = activity
            .id()
            .cloned()
            .ok_or_else(|| AppError::MalformedActivity("Follow has no id".to_string()))?;

        info!(
            follow = %id,
            follower = %follower,
            followee = %followee,
            "Recording follow request"
        );

        let record = FollowRecord {
            id: id.clone(),
            follower,
            followee,
            state: FollowState::Pending,
        };
        ctx.store.put_follow(record.clone()).await?;
        log.push(Effect::FollowPending { follow: id });

        if ctx.side != Side::Inbox || record.followee != ctx.local_actor.id {
            return Ok(());
        }

        let accept = match ctx.on_follow {
            OnFollow::DoNothing => return Ok(()),
            OnFollow::AutoAccept => true,
            OnFollow::AutoReject => false,
        };
        let response = build_response(ctx, activity, &record, accept)?;
        complete_follow(ctx, &record, accept, log).await?;
        log.outbound.push(response);
        Ok(())
    }
}

/// Build the Accept or Reject the followee sends back.
pub fn build_response(
    ctx: &HandlerContext<'_>,
    follow: &Activity,
    record: &FollowRecord,
    accept: bool,
) -> AppResult<Activity> {
    let kind = if accept { "Accept" } else { "Reject" };
    let response = ApObject::new(kind)
        .with_id(ctx.mint("activities")?)
        .with_actor(record.followee.clone())
        .with_object(follow.as_object().clone())
        .with_to(record.follower.clone());
    Activity::from_object(response)
}

/// Move a follow to accepted or rejected and update the local
/// followers/following collections to match.
pub async fn complete_follow(
    ctx: &HandlerContext<'_>,
    record: &FollowRecord,
    accepted: bool,
    log: &mut EffectLog,
) -> AppResult<()> {
    let state = if accepted {
        FollowState::Accepted
    } else {
        FollowState::Rejected
    };
    ctx.store
        .put_follow(FollowRecord {
            state,
            ..record.clone()
        })
        .await?;
    log.push(if accepted {
        Effect::FollowAccepted {
            follow: record.id.clone(),
        }
    } else {
        Effect::FollowRejected {
            follow: record.id.clone(),
        }
    });

    info!(follow = %record.id, state = ?state, "Follow resolved");
    set_membership(ctx, record, accepted, log).await
}

/// Reverse a follow entirely.
pub(super) async fn undo_follow(
    ctx: &HandlerContext<'_>,
    original: &Activity,
    log: &mut EffectLog,
) -> AppResult<()> {
    let id = original
        .id()
        .cloned()
        .ok_or_else(|| AppError::MalformedActivity("Follow has no id".to_string()))?;

    let record = match ctx.store.remove_follow(&id).await? {
        Some(record) => record,
        None => FollowRecord {
            id: id.clone(),
            follower: sole_actor(original)?,
            followee: reference_iri(first_object(original)?)?,
            state: FollowState::Pending,
        },
    };
    log.push(Effect::FollowUndone { follow: id });
    set_membership(ctx, &record, false, log).await
}

async fn set_membership(
    ctx: &HandlerContext<'_>,
    record: &FollowRecord,
    member: bool,
    log: &mut EffectLog,
) -> AppResult<()> {
    let followers = local_collection(ctx, &record.followee, |actor| actor.followers).await?;
    let following = local_collection(ctx, &record.follower, |actor| actor.following).await?;

    for (collection, item) in [
        (followers, &record.follower),
        (following, &record.followee),
    ] {
        let Some(collection) = collection else { continue };
        if member {
            if ctx.store.add_to_collection(&collection, item).await? {
                log.push(Effect::CollectionAdded {
                    collection,
                    item: item.clone(),
                });
            }
        } else if ctx.store.remove_from_collection(&collection, item).await? {
            log.push(Effect::CollectionRemoved {
                collection,
                item: item.clone(),
            });
        }
    }
    Ok(())
}

async fn local_collection(
    ctx: &HandlerContext<'_>,
    actor: &Url,
    pick: impl FnOnce(Actor) -> Option<Url> + Send,
) -> AppResult<Option<Url>> {
    if !ctx.store.owns(actor) {
        return Ok(None);
    }
    Ok(ctx.store.local_actor(actor).await?.and_then(pick))
}
