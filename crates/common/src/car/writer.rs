use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

use super::{encode_section, CarError, CarHeader, MAX_HEADER_LEN};
use crate::linked_data::{varint, Block, BlockGet, BlockPut, Cid, StoreError};

/// Where a block's payload lives inside the file.
#[derive(Debug, Clone, Copy)]
struct Location {
    data_offset: u64,
    data_len: usize,
}

/// Two-phase CARv1 writer over a file on disk.
///
/// The header is written up front with whatever roots are handed to
///  [`CarWriter::create`] (normally a placeholder). Blocks are appended
///  as they are produced, each CID at most once. [`CarWriter::finalize`]
///  closes the file and then patches the header with the real root.
pub struct CarWriter {
    path: PathBuf,
    file: BufWriter<File>,
    read_handle: Option<File>,
    index: HashMap<Cid, Location>,
    offset: u64,
    blocks: usize,
}

impl std::fmt::Debug for CarWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarWriter")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// A closed archive whose header carries its real root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedCar {
    pub path: PathBuf,
    pub root: Cid,
    pub size: u64,
    pub blocks: usize,
}

impl CarWriter {
    /// Create (or truncate) `path` and write a header listing `roots`.
    pub async fn create(path: impl AsRef<Path>, roots: Vec<Cid>) -> Result<Self, CarError> {
        let path = path.as_ref().to_path_buf();
        let header = CarHeader::new(roots).encode()?;
        let file = File::create(&path).await?;
        let mut file = BufWriter::new(file);
        file.write_all(&header).await?;

        Ok(Self {
            path,
            file,
            read_handle: None,
            index: HashMap::new(),
            offset: header.len() as u64,
            blocks: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> u64 {
        self.offset
    }

    /// Number of distinct blocks written.
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.index.contains_key(cid)
    }

    /// Append a block. Returns `false` if the CID was already present.
    pub async fn append(&mut self, block: &Block) -> Result<bool, CarError> {
        if self.index.contains_key(block.cid()) {
            return Ok(false);
        }
        let mut section = Vec::with_capacity(block.section_body_len() + varint::MAX_VARINT_LEN);
        encode_section(block, &mut section);
        self.file.write_all(&section).await?;

        let data_len = block.data().len();
        let data_offset = self.offset + (section.len() - data_len) as u64;
        self.index.insert(
            *block.cid(),
            Location {
                data_offset,
                data_len,
            },
        );
        self.offset += section.len() as u64;
        self.blocks += 1;
        Ok(true)
    }

    /// Read a block that was appended earlier.
    pub async fn read(&mut self, cid: &Cid) -> Result<Option<Block>, CarError> {
        let Some(location) = self.index.get(cid).copied() else {
            return Ok(None);
        };
        // make sure buffered sections are visible to the read handle
        self.file.flush().await?;
        if self.read_handle.is_none() {
            self.read_handle = Some(File::open(&self.path).await?);
        }
        let handle = self
            .read_handle
            .as_mut()
            .ok_or_else(|| CarError::InvalidSection("read handle unavailable".into()))?;
        handle.seek(SeekFrom::Start(location.data_offset)).await?;
        let mut data = vec![0u8; location.data_len];
        handle.read_exact(&mut data).await?;
        Ok(Some(Block::verified(*cid, data)?))
    }

    /// Flush and close the file. After this the length and every block
    ///  offset are fixed.
    pub async fn close(mut self) -> Result<(PathBuf, u64, usize), CarError> {
        self.file.flush().await?;
        let file = self.file.into_inner();
        file.sync_all().await?;
        drop(file);
        drop(self.read_handle);
        Ok((self.path, self.offset, self.blocks))
    }

    /// Close the file, then rewrite the header with `root` as its only root.
    ///
    /// The order matters: the header is only patched once nothing else can
    ///  be appended.
    pub async fn finalize(self, root: Cid) -> Result<FinalizedCar, CarError> {
        let (path, size, blocks) = self.close().await?;
        replace_roots(&path, vec![root]).await?;
        tracing::debug!(path = ?path, %root, size, blocks, "finalized archive");
        Ok(FinalizedCar {
            path,
            root,
            size,
            blocks,
        })
    }
}

#[async_trait]
impl BlockPut for CarWriter {
    async fn put(&mut self, block: Block) -> Result<(), StoreError> {
        self.append(&block).await.map_err(car_to_store)?;
        Ok(())
    }
}

#[async_trait]
impl BlockGet for CarWriter {
    async fn get(&mut self, cid: &Cid) -> Result<Option<Block>, StoreError> {
        self.read(cid).await.map_err(car_to_store)
    }
}

fn car_to_store(err: CarError) -> StoreError {
    match err {
        CarError::Io(e) => StoreError::Io(e),
        CarError::Block(e) => StoreError::Block(e),
        other => StoreError::Io(std::io::Error::other(other.to_string())),
    }
}

/// Rewrite the header of a closed archive in place.
///
/// Only the header bytes are touched. The new header must encode to
///  exactly the same length as the old one, otherwise every block would
///  shift and the call fails instead.
pub async fn replace_roots(path: impl AsRef<Path>, roots: Vec<Cid>) -> Result<(), CarError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path.as_ref())
        .await?;

    let body_len = varint::read(&mut file)
        .await?
        .ok_or_else(|| CarError::InvalidSection("empty archive".into()))?;
    if body_len == 0 || body_len > MAX_HEADER_LEN {
        return Err(CarError::InvalidSection(format!(
            "header length {body_len} out of range"
        )));
    }
    let mut body = vec![0u8; body_len as usize];
    file.read_exact(&mut body).await?;
    // the existing header must at least be a valid one
    CarHeader::decode_body(&body)?;
    let existing_len = varint::encoded_len(body_len) + body_len as usize;

    let replacement = CarHeader::new(roots).encode()?;
    if replacement.len() != existing_len {
        return Err(CarError::HeaderSizeMismatch {
            expected: existing_len,
            actual: replacement.len(),
        });
    }

    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(&replacement).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
