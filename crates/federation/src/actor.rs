//! Actor records and collection pages returned by the directory.

use apub_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Delivery-relevant view of an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Url,
    pub inbox: Url,
    pub outbox: Option<Url>,
    pub followers: Option<Url>,
    pub following: Option<Url>,
    pub shared_inbox: Option<Url>,
}

impl Actor {
    /// Create an actor with the conventional `{id}/inbox`, `{id}/outbox`,
    /// `{id}/followers` and `{id}/following` endpoints.
    pub fn conventional(id: Url) -> AppResult<Self> {
        let sub = |segment: &str| {
            Url::parse(&format!("{}/{segment}", id.as_str().trim_end_matches('/')))
                .map_err(|e| AppError::Internal(format!("Invalid actor IRI {id}: {e}")))
        };
        Ok(Self {
            inbox: sub("inbox")?,
            outbox: Some(sub("outbox")?),
            followers: Some(sub("followers")?),
            following: Some(sub("following")?),
            shared_inbox: None,
            id,
        })
    }

    /// Set the shared inbox.
    #[must_use]
    pub fn with_shared_inbox(mut self, shared_inbox: Url) -> Self {
        self.shared_inbox = Some(shared_inbox);
        self
    }

    /// Parse an actor document.
    pub fn from_json(json: &Value) -> AppResult<Self> {
        let url_field = |value: Option<&Value>| -> Option<Url> {
            value.and_then(Value::as_str).and_then(|s| Url::parse(s).ok())
        };

        let id = url_field(json.get("id"))
            .ok_or_else(|| AppError::MalformedActivity("Actor missing id".to_string()))?;
        let inbox = url_field(json.get("inbox"))
            .ok_or_else(|| AppError::MalformedActivity(format!("Actor {id} missing inbox")))?;

        Ok(Self {
            inbox,
            outbox: url_field(json.get("outbox")),
            followers: url_field(json.get("followers")),
            following: url_field(json.get("following")),
            shared_inbox: url_field(
                json.get("endpoints")
                    .and_then(|endpoints| endpoints.get("sharedInbox")),
            ),
            id,
        })
    }

    /// The inbox to deliver to.
    #[must_use]
    pub fn delivery_inbox(&self, prefer_shared: bool) -> &Url {
        match (&self.shared_inbox, prefer_shared) {
            (Some(shared), true) => shared,
            _ => &self.inbox,
        }
    }
}

/// One page of a collection's membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionPage {
    pub members: Vec<Url>,
    pub next: Option<Url>,
}

impl CollectionPage {
    /// A terminal page.
    #[must_use]
    pub const fn last(members: Vec<Url>) -> Self {
        Self {
            members,
            next: None,
        }
    }
}
