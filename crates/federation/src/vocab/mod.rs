//! ActivityStreams vocabulary boundary.
//!
//! Only the properties that drive routing and side effects are typed; every
//! other property rides along untouched so unknown extensions round-trip.

#![allow(missing_docs)]

mod activity;
mod collection;
mod kind;
mod object;

pub use activity::Activity;
pub use collection::{OrderedCollectionPage, page_iri};
pub use kind::{ActivityKind, StandardKind, is_object_type};
pub use object::{
    ApObject, CONTEXT, PUBLIC, Reference, iris, is_actor_type, is_collection_type, is_public,
    one_or_many,
};
