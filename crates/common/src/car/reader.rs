use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{parse_section_body, CarError, CarHeader, MAX_HEADER_LEN, MAX_SECTION_LEN};
use crate::linked_data::{varint, Block, Cid};

/// A block read from an archive, with where it sat in the file.
#[derive(Debug, Clone)]
pub struct Section {
    pub block: Block,
    /// Offset of the section's length prefix from the start of the file
    pub offset: u64,
    /// Full section length, prefix included
    pub len: u64,
}

/// Streaming CARv1 reader.
///
/// Every block is re-hashed as it is read; a block whose bytes do
///  not match its CID is an error.
pub struct CarReader<R> {
    reader: R,
    header: CarHeader,
    header_len: u64,
    position: u64,
}

impl<R> std::fmt::Debug for CarReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarReader")
            .field("header", &self.header)
            .field("position", &self.position)
            .finish()
    }
}

impl<R: AsyncRead + Unpin + Send> CarReader<R> {
    /// Read and validate the header.
    pub async fn new(mut reader: R) -> Result<Self, CarError> {
        let len = varint::read(&mut reader)
            .await?
            .ok_or_else(|| CarError::InvalidSection("empty archive".into()))?;
        if len == 0 || len > MAX_HEADER_LEN {
            return Err(CarError::InvalidSection(format!(
                "header length {len} out of range"
            )));
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        let header = CarHeader::decode_body(&body)?;
        let header_len = varint::encoded_len(len) as u64 + len;

        Ok(Self {
            reader,
            header,
            header_len,
            position: header_len,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Encoded header length, prefix included.
    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Read the next section, or `None` at the end of the archive.
    pub async fn next_section(&mut self) -> Result<Option<Section>, CarError> {
        let offset = self.position;
        let Some(len) = varint::read(&mut self.reader).await? else {
            return Ok(None);
        };
        if len == 0 || len > MAX_SECTION_LEN {
            return Err(CarError::InvalidSection(format!(
                "section at offset {offset} has length {len}"
            )));
        }
        let mut body = vec![0u8; len as usize];
        self.reader.read_exact(&mut body).await?;
        let block = parse_section_body(Bytes::from(body))?;

        let total = varint::encoded_len(len) as u64 + len;
        self.position += total;
        Ok(Some(Section {
            block,
            offset,
            len: total,
        }))
    }

    /// Read the next block, or `None` at the end of the archive.
    pub async fn next_block(&mut self) -> Result<Option<Block>, CarError> {
        Ok(self.next_section().await?.map(|section| section.block))
    }

    /// Drain the rest of the archive.
    pub async fn collect_blocks(mut self) -> Result<Vec<Block>, CarError> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block().await? {
            blocks.push(block);
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::{encode, section_len};
    use crate::linked_data::RAW_CODEC;

    #[tokio::test]
    async fn test_sections_report_offsets() {
        let a = Block::new(RAW_CODEC, vec![1u8; 10]);
        let b = Block::new(RAW_CODEC, vec![2u8; 200]);
        let bytes = encode(vec![*b.cid()], [&a, &b]).unwrap();

        let mut reader = CarReader::new(&bytes[..]).await.unwrap();
        let header_len = reader.header_len();
        assert_eq!(reader.roots(), &[*b.cid()]);

        let first = reader.next_section().await.unwrap().unwrap();
        assert_eq!(first.offset, header_len);
        assert_eq!(first.len, section_len(&a) as u64);
        assert_eq!(first.block, a);

        let second = reader.next_section().await.unwrap().unwrap();
        assert_eq!(second.offset, header_len + first.len);
        assert_eq!(second.block, b);
        assert_eq!(second.offset + second.len, bytes.len() as u64);

        assert!(reader.next_section().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_empty_input() {
        let empty: &[u8] = &[];
        assert!(CarReader::new(empty).await.is_err());
    }
}
