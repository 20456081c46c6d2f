use std::collections::HashMap;

use async_trait::async_trait;

use super::{Block, BlockError, Cid};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("block store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid block: {0}")]
    Block(#[from] BlockError),
}

/// Append a block to some storage.
///
/// Putting a block whose CID is already present is a no-op.
#[async_trait]
pub trait BlockPut: Send {
    async fn put(&mut self, block: Block) -> Result<(), StoreError>;
}

/// Read a previously stored block back by CID.
#[async_trait]
pub trait BlockGet: Send {
    async fn get(&mut self, cid: &Cid) -> Result<Option<Block>, StoreError>;
}

/// An in-memory store that remembers insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockStore {
    blocks: Vec<Block>,
    index: HashMap<Cid, usize>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks in the order they were first put.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.index.contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn insert(&mut self, block: Block) {
        if self.index.contains_key(block.cid()) {
            return;
        }
        self.index.insert(*block.cid(), self.blocks.len());
        self.blocks.push(block);
    }
}

impl FromIterator<Block> for MemoryBlockStore {
    fn from_iter<T: IntoIterator<Item = Block>>(iter: T) -> Self {
        let mut store = Self::new();
        for block in iter {
            store.insert(block);
        }
        store
    }
}

#[async_trait]
impl BlockPut for MemoryBlockStore {
    async fn put(&mut self, block: Block) -> Result<(), StoreError> {
        self.insert(block);
        Ok(())
    }
}

#[async_trait]
impl BlockGet for MemoryBlockStore {
    async fn get(&mut self, cid: &Cid) -> Result<Option<Block>, StoreError> {
        Ok(self.index.get(cid).map(|i| self.blocks[*i].clone()))
    }
}
