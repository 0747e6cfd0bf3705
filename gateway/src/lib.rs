//! Contains the backend gateway abstraction and adapters noisefs uses to
//! persist anonymized blocks in a content-addressed blob store.
//!
//! The core treats the backend as a black box with deterministic addressing:
//! `put` must return an address that is a pure function of the block bytes,
//! and durability is required before `put` returns. Latency and transient
//! failures belong to the gateway; the core only sees the typed error kinds.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use noisefs_types::{Address, Block, NoiseError, Result};
use serde_derive::Serialize;

pub mod http;

pub use http::HttpGateway;

/// Backend health as reported by [`BackendGateway::health`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Ok,
    Degraded,
    Down,
}

/// The minimum adapter the core requires from the backend blob store.
///
/// Implementations are free to cache, retry or batch internally; the core
/// attributes all I/O latency to the gateway for its metrics.
pub trait BackendGateway: Send + Sync + 'static {
    /// Persists a block, returning its content address. The address is
    /// deterministic in the block's bytes.
    fn put(&self, block: Block) -> impl Future<Output = Result<Address>> + Send;

    /// Fetches the block stored under `address`; `NotFound` when absent.
    fn get(&self, address: Address) -> impl Future<Output = Result<Block>> + Send;

    /// Cheap existence test.
    fn has(&self, address: Address) -> impl Future<Output = Result<bool>> + Send;

    fn connected(&self) -> impl Future<Output = bool> + Send;

    fn health(&self) -> impl Future<Output = NodeHealth> + Send;
}

/// In-process reference backend: a hash map behind a read/write lock.
///
/// Used by the test suites and as the fallback store for single-process
/// deployments. Durability is trivially satisfied.
#[derive(Default)]
pub struct MemoryGateway {
    blocks: RwLock<HashMap<Address, Vec<u8>>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        MemoryGateway::default()
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("gateway lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `bytes` verbatim under `address`, bypassing content
    /// addressing. Exists so tests can simulate a backend returning bytes
    /// that no longer hash to the requested address.
    pub fn inject(&self, address: Address, bytes: Vec<u8>) {
        self.blocks
            .write()
            .expect("gateway lock poisoned")
            .insert(address, bytes);
    }
}

impl BackendGateway for MemoryGateway {
    async fn put(&self, block: Block) -> Result<Address> {
        let address = block.address();
        self.blocks
            .write()
            .expect("gateway lock poisoned")
            .insert(address, block.into_bytes());
        Ok(address)
    }

    async fn get(&self, address: Address) -> Result<Block> {
        let bytes = self
            .blocks
            .read()
            .expect("gateway lock poisoned")
            .get(&address)
            .cloned()
            .ok_or(NoiseError::NotFound(address))?;
        Block::new(bytes)
    }

    async fn has(&self, address: Address) -> Result<bool> {
        Ok(self
            .blocks
            .read()
            .expect("gateway lock poisoned")
            .contains_key(&address))
    }

    async fn connected(&self) -> bool {
        true
    }

    async fn health(&self) -> NodeHealth {
        NodeHealth::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let gateway = MemoryGateway::new();
        let block = Block::new(b"some stored bytes".to_vec()).unwrap();
        let expected = block.address();

        let address = gateway.put(block).await.unwrap();
        assert_eq!(address, expected);
        assert!(gateway.has(address).await.unwrap());

        let fetched = gateway.get(address).await.unwrap();
        assert_eq!(fetched.bytes(), b"some stored bytes");
        assert_eq!(fetched.address(), address);
    }

    #[tokio::test]
    async fn get_of_absent_address_is_not_found() {
        let gateway = MemoryGateway::new();
        let err = gateway.get(Address::of(b"missing")).await.unwrap_err();
        assert!(matches!(err, NoiseError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_address_is_deterministic() {
        let gateway = MemoryGateway::new();
        let a = gateway
            .put(Block::new(b"same".to_vec()).unwrap())
            .await
            .unwrap();
        let b = gateway
            .put(Block::new(b"same".to_vec()).unwrap())
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(gateway.len(), 1);
    }

    #[tokio::test]
    async fn injected_bytes_fail_the_address_check() {
        let gateway = MemoryGateway::new();
        let address = Address::of(b"original");
        gateway.inject(address, b"tampered".to_vec());

        let block = gateway.get(address).await.unwrap();
        assert_ne!(block.address(), address);
    }
}
