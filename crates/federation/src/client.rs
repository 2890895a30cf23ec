//! `ActivityPub` HTTP client.
//!
//! Implements [`Directory`] by dereferencing IRIs and [`Transport`] by
//! POSTing to remote inboxes, retrying transient failures with backoff.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use apub_common::{AppError, AppResult, DeliveryConfig};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, DATE, HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use crate::actor::{Actor, CollectionPage};
use crate::directory::{Directory, Resolved};
use crate::retry::RetryConfig;
use crate::transport::Transport;
use crate::vocab::{ApObject, is_actor_type, is_collection_type};

/// Media type for activity payloads.
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

const ACCEPT_ACTIVITY: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Error type for AP client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("{url} answered {status}: {body}")]
    Status { url: Url, status: u16, body: String },
    #[error("Invalid document at {url}: {reason}")]
    InvalidDocument { url: Url, reason: String },
}

impl ClientError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Header(_) | Self::Signing(_) | Self::InvalidDocument { .. } => false,
        }
    }
}

impl From<ClientError> for AppError {
    fn from(e: ClientError) -> Self {
        match &e {
            ClientError::Status { url, status, .. } if *status == 404 || *status == 410 => {
                Self::NotFound(url.to_string())
            }
            ClientError::InvalidDocument { .. } => Self::ExternalService(e.to_string()),
            ClientError::Signing(_) | ClientError::Header(_) => Self::Internal(e.to_string()),
            ClientError::Http(_) | ClientError::Status { .. } => Self::Transport(e.to_string()),
        }
    }
}

/// Hook for authenticating outbound requests, e.g. with HTTP signatures.
///
/// Called after `Digest`, `Date` and `Content-Type` are set.
pub trait SignRequest: Send + Sync {
    fn sign(&self, method: &Method, url: &Url, headers: &mut HeaderMap) -> AppResult<()>;
}

/// `ActivityPub` HTTP client.
#[derive(Clone)]
pub struct ApClient {
    client: Client,
    retry: RetryConfig,
    signer: Option<Arc<dyn SignRequest>>,
}

impl ApClient {
    /// Create a new AP client for the instance at `instance_url`.
    pub fn new(config: &DeliveryConfig, instance_url: &Url) -> AppResult<Self> {
        let user_agent = config.user_agent.clone().unwrap_or_else(|| {
            format!(
                "apub-engine/{} (+{instance_url})",
                env!("CARGO_PKG_VERSION")
            )
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: RetryConfig::from(config),
            signer: None,
        })
    }

    /// Authenticate every request with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn SignRequest>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json(&self, url: &Url) -> Result<Value, ClientError> {
        debug!(url = %url, "Fetching remote document");

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_ACTIVITY));
        headers.insert(DATE, HeaderValue::from_str(&http_date())?);
        self.sign(&Method::GET, url, &mut headers)?;

        let response = self.client.get(url.clone()).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url: url.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn post_once(&self, inbox: &Url, payload: &Bytes) -> Result<(), ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(ACTIVITY_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_ACTIVITY));
        headers.insert(DATE, HeaderValue::from_str(&http_date())?);
        headers.insert("digest", HeaderValue::from_str(&digest_header(payload))?);
        self.sign(&Method::POST, inbox, &mut headers)?;

        let response = self
            .client
            .post(inbox.clone())
            .headers(headers)
            .body(payload.clone())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(inbox = %inbox, status = %status, "Activity delivered");
            Ok(())
        } else if status == StatusCode::GONE {
            // The recipient is gone; there is nothing left to deliver to.
            warn!(inbox = %inbox, "Remote inbox is gone (410)");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status {
                url: inbox.clone(),
                status: status.as_u16(),
                body,
            })
        }
    }

    fn sign(&self, method: &Method, url: &Url, headers: &mut HeaderMap) -> Result<(), ClientError> {
        match &self.signer {
            Some(signer) => signer
                .sign(method, url, headers)
                .map_err(|e| ClientError::Signing(e.to_string())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ApClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApClient")
            .field("retry", &self.retry)
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Directory for ApClient {
    async fn resolve_actor(&self, iri: &Url) -> AppResult<Option<Actor>> {
        let document = self.get_json(iri).await?;
        parse_actor(&document)
    }

    async fn resolve_collection_page(&self, iri: &Url) -> AppResult<CollectionPage> {
        let document = self.get_json(iri).await?;
        self.first_page(iri, &document).await
    }

    async fn fetch_object(&self, iri: &Url) -> AppResult<ApObject> {
        let document = self.get_json(iri).await?;
        serde_json::from_value(document).map_err(|e| {
            ClientError::InvalidDocument {
                url: iri.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn resolve(&self, iri: &Url) -> AppResult<Resolved> {
        let document = self.get_json(iri).await?;
        if let Some(actor) = parse_actor(&document)? {
            return Ok(Resolved::Actor(actor));
        }
        self.first_page(iri, &document)
            .await
            .map(Resolved::Collection)
    }
}

impl ApClient {
    /// The page a collection document starts with, fetching `first` when it
    /// is only linked.
    async fn first_page(&self, iri: &Url, document: &Value) -> AppResult<CollectionPage> {
        match parse_collection(iri, document)? {
            CollectionDocument::Page(page) => Ok(page),
            CollectionDocument::First(first) => {
                let document = self.get_json(&first).await?;
                match parse_collection(&first, &document)? {
                    CollectionDocument::Page(page) => Ok(page),
                    CollectionDocument::First(_) => Err(ClientError::InvalidDocument {
                        url: first,
                        reason: "first page points at another first page".to_string(),
                    }
                    .into()),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for ApClient {
    async fn deliver_to(&self, inbox: &Url, payload: Bytes) -> AppResult<()> {
        let mut attempt = 0;
        loop {
            match self.post_once(inbox, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        inbox = %inbox,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// `Digest` header value for a request body.
#[must_use]
pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", STANDARD.encode(Sha256::digest(body)))
}

fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn type_tags(document: &Value) -> Vec<&str> {
    match document.get("type") {
        Some(Value::String(kind)) => vec![kind.as_str()],
        Some(Value::Array(kinds)) => kinds.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Interpret a fetched document as an actor. `None` when it has another type.
pub fn parse_actor(document: &Value) -> AppResult<Option<Actor>> {
    if type_tags(document).into_iter().any(is_actor_type) {
        Actor::from_json(document).map(Some)
    } else {
        Ok(None)
    }
}

/// A fetched collection document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionDocument {
    /// Members are inline.
    Page(CollectionPage),
    /// Members start on a separate first page.
    First(Url),
}

fn iri_of(value: &Value) -> Option<Url> {
    match value {
        Value::String(iri) => Url::parse(iri).ok(),
        Value::Object(object) => object.get("id").and_then(iri_of),
        _ => None,
    }
}

/// Interpret a fetched document as a collection or collection page.
pub fn parse_collection(url: &Url, document: &Value) -> AppResult<CollectionDocument> {
    let items = document
        .get("orderedItems")
        .or_else(|| document.get("items"));

    if let Some(items) = items {
        let members = match items {
            Value::Array(items) => items.iter().filter_map(iri_of).collect(),
            single => iri_of(single).into_iter().collect(),
        };
        let next = document.get("next").and_then(iri_of);
        return Ok(CollectionDocument::Page(CollectionPage { members, next }));
    }

    match document.get("first") {
        Some(first @ Value::Object(_)) => match parse_collection(url, first)? {
            CollectionDocument::Page(page) => Ok(CollectionDocument::Page(page)),
            CollectionDocument::First(_) => Err(ClientError::InvalidDocument {
                url: url.clone(),
                reason: "embedded first page has no items".to_string(),
            }
            .into()),
        },
        Some(first) => iri_of(first)
            .map(CollectionDocument::First)
            .ok_or_else(|| {
                ClientError::InvalidDocument {
                    url: url.clone(),
                    reason: "first is not an IRI".to_string(),
                }
                .into()
            }),
        None if type_tags(document).into_iter().any(is_collection_type) => {
            Ok(CollectionDocument::Page(CollectionPage::last(Vec::new())))
        }
        None => Err(ClientError::InvalidDocument {
            url: url.clone(),
            reason: "not a collection".to_string(),
        }
        .into()),
    }
}
