//! HTTP surface for the federation engine.
//!
//! Local actors live at `{base}/users/{username}`; their inbox and outbox
//! are mounted below that path.

mod collections;
mod inbox;

pub use collections::{PageQuery, inbox_page_handler, outbox_page_handler};
pub use inbox::{inbox_handler, outbox_handler};

use std::sync::Arc;

use apub_common::AppError;
use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::client::ACTIVITY_CONTENT_TYPE;
use crate::engine::{FederationEngine, Outcome, Status};

/// Build the inbox/outbox router over a shared engine.
pub fn router(engine: Arc<FederationEngine>) -> Router {
    Router::new()
        .route(
            "/users/{username}/inbox",
            get(inbox_page_handler).post(inbox_handler),
        )
        .route(
            "/users/{username}/outbox",
            get(outbox_page_handler).post(outbox_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// IRI of the local actor named `username`.
pub fn actor_iri(base: &Url, username: &str) -> Result<Url, AppError> {
    if username.is_empty() || username.contains(['/', '?', '#']) {
        return Err(AppError::NotFound(format!("No such user: {username}")));
    }
    let iri = format!("{}/users/{username}", base.as_str().trim_end_matches('/'));
    Url::parse(&iri).map_err(|_| AppError::NotFound(format!("No such user: {username}")))
}

/// Turns an engine outcome into an HTTP response.
#[derive(Debug)]
pub struct OutcomeResponse(pub Outcome);

impl IntoResponse for OutcomeResponse {
    fn into_response(self) -> Response {
        let outcome = self.0;

        if let Some(error) = &outcome.error {
            let status = match outcome.status {
                Status::Failed => error.root().status_code(),
                other => other.http_status(),
            };
            let body = Json(json!({
                "error": {
                    "code": error.root().error_code(),
                    "message": error.to_string(),
                },
                "stage": outcome.stage,
                "progress": outcome.progress,
            }));
            return (status, body).into_response();
        }

        let status = outcome.status.http_status();
        let mut response = match outcome.payload {
            Some(payload) => (status, Json(payload)).into_response(),
            None => status.into_response(),
        };

        let headers = response.headers_mut();
        if status != StatusCode::ACCEPTED {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(ACTIVITY_CONTENT_TYPE),
            );
        }
        if let Some(location) = outcome
            .location
            .and_then(|location| HeaderValue::from_str(location.as_str()).ok())
        {
            headers.insert(header::LOCATION, location);
        }
        response
    }
}
