//! HTTP adapter for an IPFS-compatible content-addressed block store.
//!
//! Blocks are exchanged as raw bytes against `{node_url}/block/{address}`
//! with the address in `base64_url` form. Transient failures are retried a
//! bounded number of times with a delay between attempts; a `get` that
//! exhausts its retries surfaces as `BlockUnavailable` so callers can fall
//! back to another node.

use std::time::Duration;

use noisefs_types::{Address, Block, NoiseError, Result};
use reqwest::{Client as ReqwestClient, StatusCode};

use crate::{BackendGateway, NodeHealth};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct HttpGateway {
    node_url: String,
    client: ReqwestClient,
}

impl HttpGateway {
    /// Builds a gateway against `node_url`, e.g. `http://127.0.0.1:5001`.
    pub fn new(node_url: impl Into<String>) -> Self {
        HttpGateway {
            node_url: node_url.into(),
            client: ReqwestClient::new(),
        }
    }

    fn block_url(&self, address: &Address) -> String {
        format!("{}/block/{}", self.node_url, address.to_base64())
    }
}

impl BackendGateway for HttpGateway {
    async fn put(&self, block: Block) -> Result<Address> {
        let address = block.address();
        let url = self.block_url(&address);
        let bytes = block.into_bytes();

        let mut retry_count = 0;
        loop {
            let result = self
                .client
                .put(&url)
                .body(bytes.clone())
                .send()
                .await;

            match result {
                Ok(res) if res.status().is_success() => return Ok(address),
                Ok(res) => {
                    retry_count += 1;
                    if retry_count == MAX_RETRIES {
                        return Err(NoiseError::backend(std::io::Error::other(format!(
                            "put of {} failed with HTTP status {}",
                            address.to_base64(),
                            res.status()
                        ))));
                    }
                }
                Err(err) => {
                    retry_count += 1;
                    if retry_count == MAX_RETRIES {
                        return Err(NoiseError::backend(err));
                    }
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    async fn get(&self, address: Address) -> Result<Block> {
        let url = self.block_url(&address);

        let mut retry_count = 0;
        loop {
            let result = self.client.get(&url).send().await;

            match result {
                Ok(res) if res.status() == StatusCode::OK => {
                    let bytes = res.bytes().await.map_err(NoiseError::backend)?;
                    return Block::new(bytes.to_vec());
                }
                // A definitive miss is not worth retrying
                Ok(res) if res.status() == StatusCode::NOT_FOUND => {
                    return Err(NoiseError::NotFound(address));
                }
                Ok(_) | Err(_) => {
                    retry_count += 1;
                    if retry_count == MAX_RETRIES {
                        return Err(NoiseError::BlockUnavailable(address));
                    }
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    async fn has(&self, address: Address) -> Result<bool> {
        let url = self.block_url(&address);
        let res = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(NoiseError::backend)?;

        match res.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(NoiseError::backend(std::io::Error::other(format!(
                "has of {} failed with HTTP status {status}",
                address.to_base64()
            )))),
        }
    }

    async fn connected(&self) -> bool {
        self.health().await != NodeHealth::Down
    }

    async fn health(&self) -> NodeHealth {
        let url = format!("{}/health", self.node_url);
        match self.client.get(&url).send().await {
            Ok(res) if res.status() == StatusCode::OK => NodeHealth::Ok,
            Ok(res) if res.status().is_server_error() => NodeHealth::Down,
            Ok(_) => NodeHealth::Degraded,
            Err(_) => NodeHealth::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_urls_embed_the_base64_address() {
        let gateway = HttpGateway::new("http://127.0.0.1:5001");
        let address = Address::of(b"a block");
        let url = gateway.block_url(&address);
        assert_eq!(
            url,
            format!("http://127.0.0.1:5001/block/{}", address.to_base64())
        );
    }

    #[tokio::test]
    async fn unreachable_node_reports_down() {
        // Port 9 is the discard service; nothing should be listening
        let gateway = HttpGateway::new("http://127.0.0.1:9");
        assert_eq!(gateway.health().await, NodeHealth::Down);
        assert!(!gateway.connected().await);
    }
}
