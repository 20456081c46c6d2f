use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::pb::{PbLink, PbNode, UnixFsData};
use crate::linked_data::{Block, BlockGet, BlockPut, Cid, StoreError, DAG_PB_CODEC, RAW_CODEC};

/// Default leaf size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
/// Default fan-out of interior nodes. Roughly what fits an 8 KiB node.
pub const DEFAULT_MAX_LINKS: usize = 174;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed reading input stream: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed storing block: {0}")]
    Store(#[from] StoreError),
    #[error("root {0} was not found in the store after building")]
    MissingRoot(Cid),
    #[error("invalid chunker config: {0}")]
    Config(&'static str),
}

/// How a byte stream is cut into leaves and grouped into nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub max_links: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

/// A link to a (sub)tree of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLink {
    pub cid: Cid,
    /// File bytes covered by the subtree
    pub size: u64,
    /// Serialized bytes of every block in the subtree
    pub tsize: u64,
}

/// Build a UnixFS file DAG out of `reader`, handing every block to
///  `store` as soon as it exists.
///
/// Leaves are raw blocks. Interior nodes are DAG-PB with at most
///  `max_links` children, filled left to right (balanced layout).
///  Only the not-yet-full node at each level is held in memory.
pub async fn build_file<R, S>(
    mut reader: R,
    store: &mut S,
    config: &ChunkerConfig,
) -> Result<FileLink, BuildError>
where
    R: AsyncRead + Unpin + Send,
    S: BlockPut + BlockGet + ?Sized,
{
    if config.chunk_size == 0 {
        return Err(BuildError::Config("chunk size must be positive"));
    }
    if config.max_links < 2 {
        return Err(BuildError::Config("nodes need room for at least two links"));
    }

    let mut levels: Vec<Vec<FileLink>> = Vec::new();
    let mut leaves = 0usize;

    loop {
        let chunk = read_chunk(&mut reader, config.chunk_size)
            .await
            .map_err(BuildError::Read)?;
        if chunk.is_empty() && leaves > 0 {
            break;
        }
        let last = chunk.len() < config.chunk_size;

        let leaf = put_leaf(store, chunk).await?;
        leaves += 1;
        push_link(store, &mut levels, 0, leaf, config.max_links).await?;

        if last {
            break;
        }
    }

    let root = collapse(store, levels).await?;

    // the root must be readable back from where we put it
    if store.get(&root.cid).await?.is_none() {
        return Err(BuildError::MissingRoot(root.cid));
    }
    tracing::debug!(root = %root.cid, size = root.size, leaves, "built unixfs file");
    Ok(root)
}

/// Fill a buffer up to `size` bytes, stopping early only at end of stream.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

async fn put_leaf<S: BlockPut + ?Sized>(store: &mut S, chunk: Vec<u8>) -> Result<FileLink, BuildError> {
    let size = chunk.len() as u64;
    let block = Block::new(RAW_CODEC, chunk);
    let cid = *block.cid();
    store.put(block).await?;
    Ok(FileLink {
        cid,
        size,
        tsize: size,
    })
}

async fn put_node<S: BlockPut + ?Sized>(
    store: &mut S,
    children: Vec<FileLink>,
) -> Result<FileLink, BuildError> {
    let data = UnixFsData::file(children.iter().map(|c| c.size).collect());
    let size = data.filesize.unwrap_or_default();
    let node = PbNode {
        links: children
            .iter()
            .map(|c| PbLink {
                cid: c.cid,
                name: Some(String::new()),
                tsize: Some(c.tsize),
            })
            .collect(),
        data: Some(Bytes::from(data.encode())),
    };
    let encoded = node.encode();
    let tsize = encoded.len() as u64 + children.iter().map(|c| c.tsize).sum::<u64>();
    let block = Block::new(DAG_PB_CODEC, encoded);
    let cid = *block.cid();
    store.put(block).await?;
    Ok(FileLink { cid, size, tsize })
}

/// Add a link at `level`, sealing full nodes upward.
async fn push_link<S: BlockPut + ?Sized>(
    store: &mut S,
    levels: &mut Vec<Vec<FileLink>>,
    mut level: usize,
    mut link: FileLink,
    max_links: usize,
) -> Result<(), BuildError> {
    loop {
        if levels.len() <= level {
            levels.push(Vec::with_capacity(max_links));
        }
        levels[level].push(link);
        if levels[level].len() < max_links {
            return Ok(());
        }
        let full = std::mem::take(&mut levels[level]);
        link = put_node(store, full).await?;
        level += 1;
    }
}

/// Close every partially filled level, bottom up, into a single root.
///
/// A level left with a single link passes it up unwrapped, so no node
///  ever has exactly one child.
async fn collapse<S: BlockPut + ?Sized>(
    store: &mut S,
    levels: Vec<Vec<FileLink>>,
) -> Result<FileLink, BuildError> {
    let mut carry: Option<FileLink> = None;
    for mut links in levels {
        if let Some(link) = carry.take() {
            links.push(link);
        }
        carry = match links.len() {
            0 => None,
            1 => links.pop(),
            _ => Some(put_node(store, links).await?),
        };
    }
    // at least one leaf is always written, so there is always a carry
    carry.ok_or(BuildError::Config("no blocks were produced"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linked_data::MemoryBlockStore;
    use crate::unixfs::read_file;

    fn small() -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: 4,
            max_links: 3,
        }
    }

    #[tokio::test]
    async fn test_single_chunk_is_raw_root() {
        let mut store = MemoryBlockStore::new();
        let root = build_file(&b"Hello"[..], &mut store, &ChunkerConfig::default())
            .await
            .unwrap();

        assert_eq!(root.cid.codec(), RAW_CODEC);
        assert_eq!(root.size, 5);
        assert_eq!(
            root.cid.to_string(),
            "bafkreiayl6g3gitr7ys7kyng7sjywlrgimdoymco3jiyab6rozecmoazne"
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_is_empty_leaf() {
        let mut store = MemoryBlockStore::new();
        let empty: &[u8] = &[];
        let root = build_file(empty, &mut store, &small()).await.unwrap();
        assert_eq!(root.size, 0);
        assert_eq!(root.cid.codec(), RAW_CODEC);
        assert_eq!(read_file(&root.cid, &mut store).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size() {
        let mut store = MemoryBlockStore::new();
        let data = b"abcdefgh".to_vec();
        let root = build_file(&data[..], &mut store, &small()).await.unwrap();

        // two leaves and one node, no trailing empty leaf
        assert_eq!(root.cid.codec(), DAG_PB_CODEC);
        assert_eq!(store.len(), 3);
        assert_eq!(read_file(&root.cid, &mut store).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_multi_level_tree_round_trips() {
        let mut store = MemoryBlockStore::new();
        // 10 leaves with fan-out 3: three levels of interior nodes
        let data: Vec<u8> = (0..40u8).collect();
        let root = build_file(&data[..], &mut store, &small()).await.unwrap();

        assert_eq!(root.size, 40);
        assert_eq!(read_file(&root.cid, &mut store).await.unwrap(), data);

        // the root is the last block written
        assert_eq!(store.blocks().last().unwrap().cid(), &root.cid);

        // tsize covers every block in the tree
        let total: u64 = store.blocks().iter().map(|b| b.data().len() as u64).sum();
        assert_eq!(root.tsize, total);
    }

    #[tokio::test]
    async fn test_no_single_child_nodes() {
        let mut store = MemoryBlockStore::new();
        // 4 leaves with fan-out 3: [node(3 leaves), leaf]
        let data: Vec<u8> = (0..16u8).collect();
        let root = build_file(&data[..], &mut store, &small()).await.unwrap();

        let block = store.get(&root.cid).await.unwrap().unwrap();
        let node = PbNode::decode(block.data()).unwrap();
        assert_eq!(node.links.len(), 2);
        assert_eq!(node.links[0].cid.codec(), DAG_PB_CODEC);
        assert_eq!(node.links[1].cid.codec(), RAW_CODEC);

        let unixfs = UnixFsData::decode(node.data.as_ref().unwrap()).unwrap();
        assert_eq!(unixfs.blocksizes, vec![12, 4]);
        assert_eq!(unixfs.filesize, Some(16));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut a = MemoryBlockStore::new();
        let mut b = MemoryBlockStore::new();
        let ra = build_file(&data[..], &mut a, &small()).await.unwrap();
        let rb = build_file(&data[..], &mut b, &small()).await.unwrap();
        assert_eq!(ra, rb);
    }

    #[tokio::test]
    async fn test_read_error_aborts() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("boom")))
            }
        }

        let mut store = MemoryBlockStore::new();
        let result = build_file(Failing, &mut store, &small()).await;
        assert!(matches!(result, Err(BuildError::Read(_))));
    }
}
