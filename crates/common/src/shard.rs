//! Splitting an archive into size-bounded shards
//!
//! The storage service caps how much can be registered in a single
//!  `store/add`. An archive under that cap is sent as-is. A bigger one is
//!  cut along block boundaries into several complete CARv1 files:
//!
//! - blocks keep their original order and are never split
//! - every shard is independently decodable
//! - only the final shard lists the archive's roots (the root block is
//!   written last, so it lives there); earlier shards list none
//!
//! Shards are produced lazily, one at a time, so at most one shard's
//!  bytes are held in memory while it is being transferred.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::BufReader;

use crate::car::{encode_section, CarError, CarHeader, CarReader};
use crate::linked_data::{cid_for, Cid, CAR_CODEC};

/// Default shard ceiling (127 MiB), what the w3up clients use.
pub const DEFAULT_SHARD_SIZE: u64 = 133_169_152;

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("shard i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Car(#[from] CarError),
    #[error("block {cid} needs a {size} byte shard, over the {limit} byte limit")]
    OversizedBlock { cid: Cid, size: u64, limit: u64 },
    #[error("shard size limit must be positive")]
    ZeroLimit,
}

/// What to do with a block that cannot fit in a shard on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OversizedBlockPolicy {
    /// Emit the block alone in a shard larger than the limit
    #[default]
    Admit,
    /// Fail the whole sharding run
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardConfig {
    pub size_limit: u64,
    pub oversized: OversizedBlockPolicy,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_SHARD_SIZE,
            oversized: OversizedBlockPolicy::default(),
        }
    }
}

/// A complete CARv1 holding a contiguous run of the archive's blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    cid: Cid,
    bytes: Bytes,
    index: usize,
}

impl Shard {
    fn new(bytes: Bytes, index: usize) -> Self {
        let cid = cid_for(CAR_CODEC, &bytes);
        Self { cid, bytes, index }
    }

    /// CID of the serialized shard (car codec)
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Position of this shard in the sequence, from zero
    pub fn index(&self) -> usize {
        self.index
    }
}

enum State {
    /// The archive already fits; hand it over untouched
    Whole(PathBuf),
    Streaming(Box<Streaming>),
    Done,
}

struct Streaming {
    reader: CarReader<BufReader<File>>,
    roots: Vec<Cid>,
    header_len: u64,
    pending: Option<Vec<u8>>,
}

/// Lazy, single-pass shard producer over a finalized archive.
pub struct Sharder {
    state: State,
    config: ShardConfig,
    produced: usize,
}

impl std::fmt::Debug for Sharder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sharder")
            .field("config", &self.config)
            .field("produced", &self.produced)
            .finish()
    }
}

impl Sharder {
    /// Prepare to shard the archive at `path`.
    pub async fn open(path: impl AsRef<Path>, config: ShardConfig) -> Result<Self, ShardError> {
        if config.size_limit == 0 {
            return Err(ShardError::ZeroLimit);
        }
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();

        let state = if size <= config.size_limit {
            State::Whole(path)
        } else {
            let file = File::open(&path).await?;
            let reader = CarReader::new(BufReader::new(file)).await?;
            let roots = reader.roots().to_vec();
            // reserve room for the root-bearing header in every shard
            let header_len = CarHeader::new(roots.clone()).encoded_len()? as u64;
            tracing::debug!(path = ?path, size, limit = config.size_limit, "archive needs sharding");
            State::Streaming(Box::new(Streaming {
                reader,
                roots,
                header_len,
                pending: None,
            }))
        };

        Ok(Self {
            state,
            config,
            produced: 0,
        })
    }

    /// Produce the next shard, or `None` once the archive is exhausted.
    pub async fn next_shard(&mut self) -> Result<Option<Shard>, ShardError> {
        let state = std::mem::replace(&mut self.state, State::Done);
        let shard = match state {
            State::Done => return Ok(None),
            State::Whole(path) => {
                let bytes = tokio::fs::read(&path).await?;
                Shard::new(Bytes::from(bytes), self.produced)
            }
            State::Streaming(mut streaming) => {
                let (sections, finished) = self.fill(&mut streaming).await?;
                let Some(sections) = sections else {
                    return Ok(None);
                };
                let roots = if finished {
                    streaming.roots.clone()
                } else {
                    Vec::new()
                };
                let mut bytes = CarHeader::new(roots).encode()?;
                bytes.extend_from_slice(&sections);
                if !finished {
                    self.state = State::Streaming(streaming);
                }
                Shard::new(Bytes::from(bytes), self.produced)
            }
        };

        self.produced += 1;
        tracing::debug!(
            shard = %shard.cid(),
            index = shard.index(),
            size = shard.size(),
            "produced shard"
        );
        Ok(Some(shard))
    }

    /// Gather sections for one shard. Returns the section bytes (if any
    ///  block was left) and whether the archive is exhausted.
    async fn fill(&self, streaming: &mut Streaming) -> Result<(Option<Vec<u8>>, bool), ShardError> {
        let limit = self.config.size_limit;
        let mut sections = Vec::new();
        let mut count = 0usize;

        if let Some(pending) = streaming.pending.take() {
            sections = pending;
            count = 1;
        }

        loop {
            let Some(section) = streaming.reader.next_section().await? else {
                let sections = (count > 0).then_some(sections);
                return Ok((sections, true));
            };

            let mut encoded = Vec::with_capacity(section.len as usize);
            encode_section(&section.block, &mut encoded);
            let alone = streaming.header_len + encoded.len() as u64;

            if alone > limit && self.config.oversized == OversizedBlockPolicy::Reject {
                return Err(ShardError::OversizedBlock {
                    cid: *section.block.cid(),
                    size: alone,
                    limit,
                });
            }

            if count > 0 && streaming.header_len + (sections.len() + encoded.len()) as u64 > limit
            {
                streaming.pending = Some(encoded);
                return Ok((Some(sections), false));
            }

            sections.extend_from_slice(&encoded);
            count += 1;
        }
    }

    /// Shards handed out so far.
    pub fn produced(&self) -> usize {
        self.produced
    }
}
