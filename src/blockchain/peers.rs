use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use std::time::Duration;

use super::block::Block;
use super::transaction::SignedTransaction;

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Request to {peer} failed: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },
}

/// Outbound calls a node makes to its peers.
///
/// Every call is a single best-effort request: no acknowledgement beyond the
/// HTTP status and no retry.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// `GET {peer}/blocks`, returning the raw JSON chain dump
    async fn fetch_chain(&self, peer: &str) -> Result<String, PeerError>;

    /// `POST {peer}/new_transaction` with form field `transaction`
    async fn send_transaction(
        &self,
        peer: &str,
        transaction: &SignedTransaction,
    ) -> Result<(), PeerError>;

    /// `POST {peer}/new_block` with form field `block`
    async fn send_block(&self, peer: &str, block: &Block) -> Result<(), PeerError>;
}

/// reqwest-backed [`PeerClient`]
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Unreachable {
                peer: String::new(),
                reason: format!("HTTP client error: {}", e),
            })?;
        Ok(HttpPeerClient { client })
    }

    async fn post_form(&self, peer: &str, path: &str, field: &str, json: String) -> Result<(), PeerError> {
        let response = self
            .client
            .post(endpoint(peer, path))
            .form(&[(field, json)])
            .send()
            .await
            .map_err(|e| unreachable_peer(peer, e))?;

        check_status(peer, response.status())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<String, PeerError> {
        let response = self
            .client
            .get(endpoint(peer, "/blocks"))
            .send()
            .await
            .map_err(|e| unreachable_peer(peer, e))?;

        check_status(peer, response.status())?;
        response.text().await.map_err(|e| unreachable_peer(peer, e))
    }

    async fn send_transaction(
        &self,
        peer: &str,
        transaction: &SignedTransaction,
    ) -> Result<(), PeerError> {
        let json = serde_json::to_string(transaction).map_err(|e| unreachable_peer(peer, e))?;
        self.post_form(peer, "/new_transaction", "transaction", json).await
    }

    async fn send_block(&self, peer: &str, block: &Block) -> Result<(), PeerError> {
        let json = serde_json::to_string(block).map_err(|e| unreachable_peer(peer, e))?;
        self.post_form(peer, "/new_block", "block", json).await
    }
}

/// Peer URLs are compared without a trailing slash
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn endpoint(peer: &str, path: &str) -> String {
    format!("{}{}", peer.trim_end_matches('/'), path)
}

fn unreachable_peer(peer: &str, error: impl std::fmt::Display) -> PeerError {
    PeerError::Unreachable {
        peer: peer.to_string(),
        reason: error.to_string(),
    }
}

fn check_status(peer: &str, status: reqwest::StatusCode) -> Result<(), PeerError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(PeerError::BadStatus {
            peer: peer.to_string(),
            status: status.as_u16(),
        })
    }
}

/// What the node remembers about a peer
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PeerStatus {
    pub url: String,
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub added_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub last_contact: Option<DateTime<Utc>>,
    pub failures: u32,
}

/// Statically known peers, shared between request handlers and the miner
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerStatus>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    /// Registers a peer, returning `false` if it was already known
    pub fn register(&self, url: &str) -> bool {
        let url = normalize_url(url);
        if self.peers.contains_key(&url) {
            return false;
        }
        self.peers.insert(
            url.clone(),
            PeerStatus {
                url,
                added_at: Utc::now(),
                last_contact: None,
                failures: 0,
            },
        );
        true
    }

    /// Peer URLs in a stable order
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.peers.iter().map(|entry| entry.key().clone()).collect();
        urls.sort();
        urls
    }

    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> =
            self.peers.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    pub fn record_success(&self, url: &str) {
        if let Some(mut status) = self.peers.get_mut(url) {
            status.last_contact = Some(Utc::now());
        }
    }

    pub fn record_failure(&self, url: &str) {
        if let Some(mut status) = self.peers.get_mut(url) {
            status.failures += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_normalizes_and_deduplicates() {
        let registry = PeerRegistry::new();
        assert!(registry.register("http://b:5000/"));
        assert!(!registry.register("http://b:5000"));
        assert!(registry.register("http://a:5000"));

        assert_eq!(registry.urls(), vec!["http://a:5000", "http://b:5000"]);
    }

    #[test]
    fn test_records_contact_and_failures() {
        let registry = PeerRegistry::new();
        registry.register("http://a:5000");

        registry.record_failure("http://a:5000");
        registry.record_failure("http://a:5000");
        registry.record_success("http://a:5000");
        registry.record_failure("http://unknown");

        let status = &registry.statuses()[0];
        assert_eq!(status.failures, 2);
        assert!(status.last_contact.is_some());
    }

    #[test]
    fn test_endpoint_joins_paths() {
        assert_eq!(endpoint("http://a:5000/", "/blocks"), "http://a:5000/blocks");
        assert_eq!(endpoint("http://a:5000", "/new_block"), "http://a:5000/new_block");
    }
}
