//! Paged GET handlers for inboxes and outboxes.

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;

use super::{OutcomeResponse, actor_iri};
use crate::capability::{Access, InboundRequest};
use crate::engine::FederationEngine;
use crate::store::PageRequest;

/// Pagination cursor. `max_seq` is exclusive; a zero or missing limit uses the default.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub max_seq: Option<u64>,
    pub limit: Option<usize>,
}

impl From<PageQuery> for PageRequest {
    fn from(query: PageQuery) -> Self {
        Self {
            max_seq: query.max_seq,
            limit: query.limit.unwrap_or(0),
        }
    }
}

/// Read a page of a local actor's inbox.
pub async fn inbox_page_handler(
    state: State<Arc<FederationEngine>>,
    path: Path<String>,
    query: Query<PageQuery>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
) -> Response {
    read(state, path, query, method, uri, headers, Access::GetInbox).await
}

/// Read a page of a local actor's outbox.
pub async fn outbox_page_handler(
    state: State<Arc<FederationEngine>>,
    path: Path<String>,
    query: Query<PageQuery>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
) -> Response {
    read(state, path, query, method, uri, headers, Access::GetOutbox).await
}

async fn read(
    State(engine): State<Arc<FederationEngine>>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    access: Access,
) -> Response {
    let actor = match actor_iri(engine.base_url(), &username) {
        Ok(actor) => actor,
        Err(e) => return e.into_response(),
    };

    let request = InboundRequest {
        method,
        path: uri.0.path().to_string(),
        headers,
        body: Bytes::new(),
    };
    let page = PageRequest::from(query);
    let outcome = match access {
        Access::GetInbox => engine.read_inbox(&actor, &request, page).await,
        _ => engine.read_outbox(&actor, &request, page).await,
    };
    OutcomeResponse(outcome).into_response()
}
