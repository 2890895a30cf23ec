//! POST handlers for inboxes and outboxes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{OutcomeResponse, actor_iri};
use crate::capability::InboundRequest;
use crate::engine::FederationEngine;

fn inbound(method: Method, uri: &OriginalUri, headers: HeaderMap, body: Bytes) -> InboundRequest {
    InboundRequest {
        method,
        path: uri.0.path().to_string(),
        headers,
        body,
    }
}

/// Receive a federated activity for a local actor.
pub async fn inbox_handler(
    State(engine): State<Arc<FederationEngine>>,
    Path(username): Path<String>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let actor = match actor_iri(engine.base_url(), &username) {
        Ok(actor) => actor,
        Err(e) => return e.into_response(),
    };
    debug!(actor = %actor, bytes = body.len(), "Inbox POST");

    let request = inbound(method, &uri, headers, body);
    OutcomeResponse(engine.receive_inbox(&actor, &request).await).into_response()
}

/// Accept a client submission to a local actor's outbox.
pub async fn outbox_handler(
    State(engine): State<Arc<FederationEngine>>,
    Path(username): Path<String>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let actor = match actor_iri(engine.base_url(), &username) {
        Ok(actor) => actor,
        Err(e) => return e.into_response(),
    };
    debug!(actor = %actor, bytes = body.len(), "Outbox POST");

    let request = inbound(method, &uri, headers, body);
    OutcomeResponse(engine.post_outbox(&actor, &request).await).into_response()
}
