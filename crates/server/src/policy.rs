//! Access policy driven by the `[policy]` config section.

use apub_common::{AppResult, PolicyConfig};
use apub_federation::{Access, Activity, Capabilities, InboundRequest};
use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use tracing::debug;
use url::Url;

/// Bearer-token gate for client endpoints plus a host blocklist.
///
/// Federated endpoints (inbox POST, outbox GET) are open; request signatures
/// are not verified here.
#[derive(Debug, Clone)]
pub struct ConfigPolicy {
    api_token: Option<String>,
    blocked_domains: Vec<String>,
    forwarding_depth: usize,
    delivery_depth: usize,
}

impl ConfigPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            api_token: config.api_token.clone(),
            blocked_domains: config
                .blocked_domains
                .iter()
                .map(|domain| domain.to_ascii_lowercase())
                .collect(),
            forwarding_depth: config.max_inbox_forwarding_depth,
            delivery_depth: config.max_delivery_depth,
        }
    }

    fn bearer_matches(&self, request: &InboundRequest) -> bool {
        let presented = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match (&self.api_token, presented) {
            (Some(expected), Some(presented)) => expected == presented,
            _ => false,
        }
    }

    fn is_blocked_host(&self, actor: &Url) -> bool {
        actor.host_str().is_some_and(|host| {
            let host = host.to_ascii_lowercase();
            self.blocked_domains.iter().any(|domain| {
                host == *domain || host.ends_with(&format!(".{domain}"))
            })
        })
    }
}

#[async_trait]
impl Capabilities for ConfigPolicy {
    async fn authenticate(
        &self,
        request: &InboundRequest,
        access: Access,
        actor: &Url,
    ) -> AppResult<bool> {
        let allowed = match access {
            Access::PostInbox | Access::GetOutbox => true,
            Access::PostOutbox | Access::GetInbox => self.bearer_matches(request),
        };
        debug!(actor = %actor, access = ?access, allowed, "Authentication decision");
        Ok(allowed)
    }

    async fn is_blocked(&self, actors: &[Url]) -> AppResult<bool> {
        Ok(actors.iter().any(|actor| self.is_blocked_host(actor)))
    }

    async fn filter_forwarding(
        &self,
        candidates: &[Url],
        _activity: &Activity,
    ) -> AppResult<Vec<Url>> {
        Ok(candidates
            .iter()
            .filter(|candidate| !self.is_blocked_host(candidate))
            .cloned()
            .collect())
    }

    fn max_inbox_forwarding_recursion_depth(&self) -> usize {
        self.forwarding_depth
    }

    fn max_delivery_recursion_depth(&self) -> usize {
        self.delivery_depth
    }
}
