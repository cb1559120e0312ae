//! Block persistence
//!
//! The chain only talks to storage through [`BlockStore`]. [`KvBlockStore`]
//! maps blocks onto any ordered [`KeyValueStore`]; key layout stays private to
//! this module.

pub mod memory;
pub mod retry;

pub use memory::MemoryStore;
pub use retry::RetryPolicy;

use crate::core::{Block, Header};
use crate::Result;
use async_trait::async_trait;
use std::fmt;

const BLOCK_PREFIX: u8 = b'b';
const HEADER_PREFIX: u8 = b'h';
const LAST_BLOCK_KEY: &[u8] = b"LastBlock";

/// Ordered byte key-value backend
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a value
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Whether a key exists
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in key order
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Block persistence as seen by the node
#[async_trait]
pub trait BlockStore: Send + Sync + fmt::Debug {
    /// Persist a block and advance the last-block marker
    async fn store_block(&self, block: &Block) -> Result<()>;

    /// Load a full block
    async fn load_block_by_number(&self, number: u64) -> Result<Option<Block>>;

    /// Load only a header
    async fn load_header_by_number(&self, number: u64) -> Result<Option<Header>>;

    /// Highest stored block number
    async fn last_block_number(&self) -> Result<Option<u64>>;
}

fn numbered_key(prefix: u8, number: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = prefix;
    key[1..].copy_from_slice(&number.to_be_bytes());
    key
}

/// [`BlockStore`] over a key-value backend, JSON encoded
#[derive(Debug)]
pub struct KvBlockStore<S> {
    backend: S,
}

impl<S: KeyValueStore> KvBlockStore<S> {
    /// Wrap a backend
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    /// Access the backend
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Stored block numbers in ascending order
    pub fn stored_numbers(&self) -> Result<Vec<u64>> {
        Ok(self
            .backend
            .iter_prefix(&[BLOCK_PREFIX])?
            .into_iter()
            .filter_map(|(key, _)| {
                let bytes: [u8; 8] = key.get(1..)?.try_into().ok()?;
                Some(u64::from_be_bytes(bytes))
            })
            .collect())
    }
}

#[async_trait]
impl<S: KeyValueStore> BlockStore for KvBlockStore<S> {
    async fn store_block(&self, block: &Block) -> Result<()> {
        let number = block.number();
        self.backend
            .put(&numbered_key(BLOCK_PREFIX, number), &serde_json::to_vec(block)?)?;
        self.backend
            .put(&numbered_key(HEADER_PREFIX, number), &serde_json::to_vec(block.header())?)?;

        let last = self.last_block_number().await?;
        if last.map_or(true, |last| number > last) {
            self.backend.put(LAST_BLOCK_KEY, &number.to_be_bytes())?;
        }
        Ok(())
    }

    async fn load_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        match self.backend.get(&numbered_key(BLOCK_PREFIX, number))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_header_by_number(&self, number: u64) -> Result<Option<Header>> {
        match self.backend.get(&numbered_key(HEADER_PREFIX, number))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn last_block_number(&self) -> Result<Option<u64>> {
        match self.backend.get(LAST_BLOCK_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| crate::Error::storage("Corrupt last block marker"))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_load_block() {
        let store = KvBlockStore::new(MemoryStore::new());
        assert_eq!(store.last_block_number().await.unwrap(), None);

        let genesis = Block::genesis();
        store.store_block(&genesis).await.unwrap();

        let loaded = store.load_block_by_number(0).await.unwrap().unwrap();
        assert_eq!(loaded.hash(), genesis.hash());
        let header = store.load_header_by_number(0).await.unwrap().unwrap();
        assert_eq!(&header, genesis.header());
        assert_eq!(store.last_block_number().await.unwrap(), Some(0));
        assert!(store.load_block_by_number(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_block_marker_only_advances() {
        let store = KvBlockStore::new(MemoryStore::new());
        let mut header = Header::genesis();
        header.number = 5;
        store.store_block(&Block::new(header.clone(), Vec::new())).await.unwrap();
        header.number = 3;
        store.store_block(&Block::new(header, Vec::new())).await.unwrap();

        assert_eq!(store.last_block_number().await.unwrap(), Some(5));
        assert_eq!(store.stored_numbers().unwrap(), vec![3, 5]);
    }
}
