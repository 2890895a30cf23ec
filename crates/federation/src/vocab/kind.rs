//! Activity kind tags.

use std::fmt;

/// The standard activity kinds the engine ships default handlers for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StandardKind {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Add,
    Remove,
    Like,
    Announce,
    Undo,
    Block,
}

impl StandardKind {
    /// Every standard kind.
    pub const ALL: [Self; 12] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Follow,
        Self::Accept,
        Self::Reject,
        Self::Add,
        Self::Remove,
        Self::Like,
        Self::Announce,
        Self::Undo,
        Self::Block,
    ];

    /// The ActivityStreams type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Undo => "Undo",
            Self::Block => "Block",
        }
    }

    /// Parse an exact type tag.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for StandardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of an activity: a standard kind or an application extension tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Standard(StandardKind),
    Extension(String),
}

impl ActivityKind {
    /// Classify a type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        StandardKind::parse(tag).map_or_else(|| Self::Extension(tag.to_string()), Self::Standard)
    }

    /// The type tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard(kind) => kind.as_str(),
            Self::Extension(tag) => tag,
        }
    }

    /// The standard kind, if this is one.
    #[must_use]
    pub const fn standard(&self) -> Option<StandardKind> {
        match self {
            Self::Standard(kind) => Some(*kind),
            Self::Extension(_) => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether the type tag names a non-activity object that an outbox
/// post should wrap in a Create.
#[must_use]
pub fn is_object_type(tag: &str) -> bool {
    matches!(
        tag,
        "Article"
            | "Audio"
            | "Document"
            | "Event"
            | "Image"
            | "Note"
            | "Page"
            | "Place"
            | "Profile"
            | "Relationship"
            | "Tombstone"
            | "Video"
    )
}
