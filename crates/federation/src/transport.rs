//! Outbound delivery boundary.

use apub_common::AppResult;
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

/// Sends a serialized activity to one inbox.
///
/// Retrying transient failures is the implementation's job. Any error means
/// the recipient was not reached.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `payload` to `inbox`.
    async fn deliver_to(&self, inbox: &Url, payload: Bytes) -> AppResult<()>;
}
