//! HTTP Peer
//!
//! [`PeerHandle`] over another node's peer endpoints:
//! - `POST {base}/peer/{cache}/events` with a JSON array of events
//! - `GET  {base}/peer/{cache}/keys`
//! - `POST {base}/peer/{cache}/elements` with a JSON array of keys

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheKey, Element};
use crate::error::{CacheError, Result};
use crate::replication::{PeerHandle, ReplicationEvent};

#[derive(Debug, Clone)]
pub struct HttpPeer {
    id: String,
    client: reqwest::Client,
    base_url: String,
    cache_name: String,
}

impl HttpPeer {
    pub fn new(base_url: &str, cache_name: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::InvalidConfiguration(format!("http client: {}", e)))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            id: format!("{}/{}", base_url, cache_name),
            client,
            base_url,
            cache_name: cache_name.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/peer/{}/{}", self.base_url, self.cache_name, endpoint)
    }

    fn send_error(&self, reason: impl std::fmt::Display) -> CacheError {
        CacheError::ReplicationSend {
            peer: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = response
            .error_for_status()
            .map_err(|e| self.send_error(e))?;
        response.json::<T>().await.map_err(|e| self.send_error(e))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.read_json(response).await
    }
}

#[async_trait]
impl PeerHandle for HttpPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, events: &[ReplicationEvent]) -> Result<()> {
        let response = self
            .client
            .post(self.url("events"))
            .json(events)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        response
            .error_for_status()
            .map_err(|e| self.send_error(e))?;
        Ok(())
    }

    async fn get_keys(&self) -> Result<Vec<CacheKey>> {
        let response = self
            .client
            .get(self.url("keys"))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.read_json(response).await
    }

    async fn get_element(&self, key: &CacheKey) -> Result<Option<Element>> {
        let found: Vec<Element> = self.post_json("elements", std::slice::from_ref(key)).await?;
        Ok(found.into_iter().next())
    }

    async fn get_elements(&self, keys: &[CacheKey]) -> Result<Vec<Element>> {
        self.post_json("elements", keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_and_identity() {
        let peer = HttpPeer::new("http://10.0.0.2:3000/", "sessions", Duration::from_secs(1)).unwrap();
        assert_eq!(peer.id(), "http://10.0.0.2:3000/sessions");
        assert_eq!(peer.url("events"), "http://10.0.0.2:3000/peer/sessions/events");
        assert_eq!(peer.url("keys"), "http://10.0.0.2:3000/peer/sessions/keys");
    }

    #[tokio::test]
    async fn test_unreachable_peer_reports_send_error() {
        let peer = HttpPeer::new("http://127.0.0.1:9", "c", Duration::from_millis(500)).unwrap();
        let event = ReplicationEvent::remove_all("c", "n1");
        match peer.send(&[event]).await {
            Err(CacheError::ReplicationSend { peer, .. }) => {
                assert_eq!(peer, "http://127.0.0.1:9/c")
            }
            other => panic!("expected send error, got {:?}", other),
        }
    }
}
