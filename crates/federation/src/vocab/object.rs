//! Lossless ActivityStreams object value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use url::Url;

/// The ActivityStreams Public collection.
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// The ActivityStreams JSON-LD context.
pub const CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Returns whether the IRI names the Public collection.
///
/// The compact `Public` spelling is not an IRI; [`Reference`] rewrites it to
/// [`PUBLIC`] while deserializing.
#[must_use]
pub fn is_public(iri: &Url) -> bool {
    matches!(iri.as_str(), PUBLIC | "as:Public")
}

/// A property value: either an IRI or an embedded object.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reference {
    Iri(Url),
    Object(Box<ApObject>),
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Iri(String),
            Object(Box<ApObject>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Iri(iri) => {
                let iri = match iri.as_str() {
                    "Public" | "as:Public" => PUBLIC,
                    other => other,
                };
                Url::parse(iri)
                    .map(Self::Iri)
                    .map_err(serde::de::Error::custom)
            }
            Raw::Object(object) => Ok(Self::Object(object)),
        }
    }
}

impl Reference {
    /// The IRI this reference identifies, if any.
    #[must_use]
    pub fn iri(&self) -> Option<&Url> {
        match self {
            Self::Iri(iri) => Some(iri),
            Self::Object(object) => object.id.as_ref(),
        }
    }

    /// The embedded object, when the reference is not a bare IRI.
    #[must_use]
    pub fn as_object(&self) -> Option<&ApObject> {
        match self {
            Self::Iri(_) => None,
            Self::Object(object) => Some(object),
        }
    }
}

impl From<Url> for Reference {
    fn from(iri: Url) -> Self {
        Self::Iri(iri)
    }
}

impl From<ApObject> for Reference {
    fn from(object: ApObject) -> Self {
        Self::Object(Box::new(object))
    }
}

/// An ActivityStreams object with the properties the engine reads typed and
/// every other property kept verbatim in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApObject {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Url>,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub actor: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub attributed_to: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub origin: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub in_reply_to: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub bto: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Reference>,

    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<Reference>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApObject {
    /// Create an object with only a type tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Set the id.
    #[must_use]
    pub fn with_id(mut self, id: Url) -> Self {
        self.id = Some(id);
        self
    }

    /// Append an actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<Reference>) -> Self {
        self.actor.push(actor.into());
        self
    }

    /// Append an object.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<Reference>) -> Self {
        self.object.push(object.into());
        self
    }

    /// Append a `to` recipient.
    #[must_use]
    pub fn with_to(mut self, recipient: Url) -> Self {
        self.to.push(Reference::Iri(recipient));
        self
    }

    /// Append a `cc` recipient.
    #[must_use]
    pub fn with_cc(mut self, recipient: Url) -> Self {
        self.cc.push(Reference::Iri(recipient));
        self
    }

    /// Append a `bcc` recipient.
    #[must_use]
    pub fn with_bcc(mut self, recipient: Url) -> Self {
        self.bcc.push(Reference::Iri(recipient));
        self
    }

    /// Set an arbitrary extension property.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// IRIs of the `actor` property.
    #[must_use]
    pub fn actor_iris(&self) -> Vec<Url> {
        iris(&self.actor)
    }

    /// IRIs of the `attributedTo` property.
    #[must_use]
    pub fn attributed_to_iris(&self) -> Vec<Url> {
        iris(&self.attributed_to)
    }

    /// The reference graph edges: `object`, `target`, `origin`, `inReplyTo`.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.object
            .iter()
            .chain(&self.target)
            .chain(&self.origin)
            .chain(&self.in_reply_to)
    }

    /// Visible addressing: `to`, `cc`, `audience`.
    pub fn visible_addressing(&self) -> impl Iterator<Item = &Reference> {
        self.to.iter().chain(&self.cc).chain(&self.audience)
    }

    /// Blind addressing: `bto`, `bcc`.
    pub fn blind_addressing(&self) -> impl Iterator<Item = &Reference> {
        self.bto.iter().chain(&self.bcc)
    }

    /// Actors that own this object: its attribution, plus itself when it is an actor.
    #[must_use]
    pub fn owners(&self) -> Vec<Url> {
        let mut owners = self.attributed_to_iris();
        owners.extend(self.actor_iris());
        if is_actor_type(&self.kind) {
            owners.extend(self.id.clone());
        }
        owners
    }

    /// Remove `bto` and `bcc` here and in every embedded object.
    pub fn strip_blind_addressing(&mut self) {
        self.bto.clear();
        self.bcc.clear();
        for reference in self
            .actor
            .iter_mut()
            .chain(self.attributed_to.iter_mut())
            .chain(self.object.iter_mut())
            .chain(self.target.iter_mut())
            .chain(self.origin.iter_mut())
            .chain(self.in_reply_to.iter_mut())
        {
            if let Reference::Object(object) = reference {
                object.strip_blind_addressing();
            }
        }
    }
}

/// Collect the IRIs of a list of references, skipping anonymous embedded objects.
#[must_use]
pub fn iris(references: &[Reference]) -> Vec<Url> {
    references.iter().filter_map(Reference::iri).cloned().collect()
}

/// Returns whether the type tag names an actor type.
#[must_use]
pub fn is_actor_type(kind: &str) -> bool {
    matches!(
        kind,
        "Person" | "Service" | "Application" | "Group" | "Organization"
    )
}

/// Returns whether the type tag names a collection or collection page.
#[must_use]
pub fn is_collection_type(kind: &str) -> bool {
    matches!(
        kind,
        "Collection" | "OrderedCollection" | "CollectionPage" | "OrderedCollectionPage"
    )
}

/// Serde adapter for properties that may hold one value, many values, or `null`.
pub mod one_or_many {
    use super::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let value = Option::<OneOrMany<T>>::deserialize(deserializer)?;
        Ok(match value {
            None => Vec::new(),
            Some(OneOrMany::One(item)) => vec![item],
            Some(OneOrMany::Many(items)) => items,
        })
    }

    pub fn serialize<S, T>(values: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match values {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }
}
