//! Typed activity wrapper.

use apub_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ActivityKind, ApObject, Reference};

/// An activity: an object whose type tag has been classified into an
/// [`ActivityKind`].
///
/// The engine treats an `Activity` as immutable once it reaches the
/// dispatcher; the only mutations happen while an outbox post is prepared.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "ApObject", into = "ApObject")]
pub struct Activity {
    kind: ActivityKind,
    object: ApObject,
}

impl Activity {
    /// Classify an object as an activity.
    pub fn from_object(object: ApObject) -> AppResult<Self> {
        if object.kind.trim().is_empty() {
            return Err(AppError::MalformedActivity(
                "Activity is missing its type".to_string(),
            ));
        }
        Ok(Self {
            kind: ActivityKind::from_tag(&object.kind),
            object,
        })
    }

    /// Wrap a bare object in a Create authored by `actor`, copying its addressing.
    #[must_use]
    pub fn wrap_in_create(object: ApObject, actor: Url) -> Self {
        let mut create = ApObject::new("Create").with_actor(actor);
        create.context.clone_from(&object.context);
        create.to.clone_from(&object.to);
        create.cc.clone_from(&object.cc);
        create.bto.clone_from(&object.bto);
        create.bcc.clone_from(&object.bcc);
        create.audience.clone_from(&object.audience);
        create.object.push(Reference::from(object));
        Self {
            kind: ActivityKind::from_tag("Create"),
            object: create,
        }
    }

    /// The activity kind.
    #[must_use]
    pub const fn kind(&self) -> &ActivityKind {
        &self.kind
    }

    /// The identity IRI, if assigned.
    #[must_use]
    pub const fn id(&self) -> Option<&Url> {
        self.object.id.as_ref()
    }

    /// IRIs of the actors performing the activity.
    #[must_use]
    pub fn actors(&self) -> Vec<Url> {
        self.object.actor_iris()
    }

    /// Borrow the underlying object.
    #[must_use]
    pub const fn as_object(&self) -> &ApObject {
        &self.object
    }

    /// Consume into the underlying object.
    #[must_use]
    pub fn into_object(self) -> ApObject {
        self.object
    }

    /// Mutable access for outbox preparation.
    pub(crate) fn object_mut(&mut self) -> &mut ApObject {
        &mut self.object
    }
}

impl TryFrom<ApObject> for Activity {
    type Error = AppError;

    fn try_from(object: ApObject) -> Result<Self, Self::Error> {
        Self::from_object(object)
    }
}

impl From<Activity> for ApObject {
    fn from(activity: Activity) -> Self {
        activity.object
    }
}
