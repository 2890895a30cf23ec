//! `ActivityPub` `OrderedCollectionPage` view.

use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::CONTEXT;

/// `ActivityPub` `OrderedCollectionPage` returned by inbox/outbox reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Url,
    pub part_of: Url,
    pub total_items: u64,
    pub ordered_items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
}

impl OrderedCollectionPage {
    /// Create a page of `collection` with the given items.
    #[must_use]
    pub fn new(
        id: Url,
        collection: Url,
        total_items: u64,
        ordered_items: Vec<Value>,
        next: Option<Url>,
    ) -> Self {
        Self {
            context: Value::String(CONTEXT.to_string()),
            kind: "OrderedCollectionPage".to_string(),
            id,
            part_of: collection,
            total_items,
            ordered_items,
            next,
        }
    }
}

/// Build the IRI of a page that starts below `max_seq`.
#[must_use]
pub fn page_iri(collection: &Url, max_seq: Option<u64>, limit: usize) -> Url {
    let mut iri = collection.clone();
    {
        let mut query = iri.query_pairs_mut();
        query.clear().append_pair("page", "true");
        if let Some(max_seq) = max_seq {
            query.append_pair("max_seq", &max_seq.to_string());
        }
        query.append_pair("limit", &limit.to_string());
    }
    iri
}
