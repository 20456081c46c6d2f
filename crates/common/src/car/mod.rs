//! CARv1 archives
//!
//! A CAR file is a header followed by a flat sequence of sections:
//!
//! ```text
//! varint(len(header)) | dag-cbor { roots: [cid, ..], version: 1 }
//! varint(len(cid) + len(data)) | cid | data
//! varint(len(cid) + len(data)) | cid | data
//! ...
//! ```
//!
//! The writer here is two-phase. A file is opened with a placeholder root,
//!  blocks are appended while the DAG is built, and once the real root is
//!  known the file is closed and only the header bytes are patched in place.
//!  Because the placeholder and the real root encode to the same length,
//!  no block ever moves.

mod reader;
mod writer;

pub use reader::{CarReader, Section};
pub use writer::{replace_roots, CarWriter, FinalizedCar};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::linked_data::{varint, Block, BlockError, Cid};

/// The only CAR version we read or write.
pub const CAR_VERSION: u64 = 1;
/// Upper bound on a header we are willing to buffer.
pub const MAX_HEADER_LEN: u64 = 32 * 1024 * 1024;
/// Upper bound on a single section we are willing to buffer.
pub const MAX_SECTION_LEN: u64 = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CarError {
    #[error("car i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("car header codec error: {0}")]
    Header(String),
    #[error("unsupported car version: {0}")]
    UnsupportedVersion(u64),
    #[error("replacement header is {actual} bytes, existing header is {expected} bytes")]
    HeaderSizeMismatch { expected: usize, actual: usize },
    #[error("invalid car section: {0}")]
    InvalidSection(String),
    #[error("invalid cid in car section: {0}")]
    Cid(#[from] cid::Error),
    #[error("invalid block in car: {0}")]
    Block(#[from] BlockError),
}

/// The dag-cbor header at the front of every CARv1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    pub roots: Vec<Cid>,
    pub version: u64,
}

impl CarHeader {
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            roots,
            version: CAR_VERSION,
        }
    }

    /// Encode the header including its varint length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, CarError> {
        let body =
            serde_ipld_dagcbor::to_vec(self).map_err(|e| CarError::Header(e.to_string()))?;
        let mut out = varint::encode(body.len() as u64);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode the header body (without the length prefix).
    pub fn decode_body(body: &[u8]) -> Result<Self, CarError> {
        let header: CarHeader =
            serde_ipld_dagcbor::from_slice(body).map_err(|e| CarError::Header(e.to_string()))?;
        if header.version != CAR_VERSION {
            return Err(CarError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }

    /// Encoded length including the length prefix.
    pub fn encoded_len(&self) -> Result<usize, CarError> {
        Ok(self.encode()?.len())
    }
}

/// Append a full section (length prefix, cid, data) for `block` to `buf`.
pub fn encode_section(block: &Block, buf: &mut Vec<u8>) {
    varint::encode_into(block.section_body_len() as u64, buf);
    buf.extend_from_slice(&block.cid().to_bytes());
    buf.extend_from_slice(block.data());
}

/// Length of the full section for `block`, including the prefix.
pub fn section_len(block: &Block) -> usize {
    let body = block.section_body_len();
    varint::encoded_len(body as u64) + body
}

/// Split a section body (everything after the length prefix) into a
///  verified block.
pub(crate) fn parse_section_body(body: Bytes) -> Result<Block, CarError> {
    let mut cursor: &[u8] = &body;
    let cid = Cid::read_bytes(&mut cursor)?;
    let cid_len = body.len() - cursor.len();
    Ok(Block::verified(cid, body.slice(cid_len..))?)
}

/// Serialize a whole archive in memory.
pub fn encode<'a>(
    roots: Vec<Cid>,
    blocks: impl IntoIterator<Item = &'a Block>,
) -> Result<Vec<u8>, CarError> {
    let mut out = CarHeader::new(roots).encode()?;
    for block in blocks {
        encode_section(block, &mut out);
    }
    Ok(out)
}

/// Parse a whole archive held in memory.
pub fn decode(bytes: &[u8]) -> Result<(CarHeader, Vec<Block>), CarError> {
    let bytes = Bytes::copy_from_slice(bytes);
    let (header_len, consumed) = varint::decode(&bytes)
        .ok_or_else(|| CarError::InvalidSection("truncated header length".into()))?;
    let header_end = consumed
        .checked_add(header_len as usize)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| CarError::InvalidSection("truncated header".into()))?;
    let header = CarHeader::decode_body(&bytes[consumed..header_end])?;

    let mut blocks = Vec::new();
    let mut pos = header_end;
    while pos < bytes.len() {
        let (len, consumed) = varint::decode(&bytes[pos..])
            .ok_or_else(|| CarError::InvalidSection("truncated section length".into()))?;
        let start = pos + consumed;
        let end = start
            .checked_add(len as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| CarError::InvalidSection("truncated section".into()))?;
        blocks.push(parse_section_body(bytes.slice(start..end))?);
        pos = end;
    }
    Ok((header, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linked_data::{cid_for, placeholder_root, CAR_CODEC, DAG_CBOR_CODEC, RAW_CODEC};

    #[test]
    fn test_header_is_canonical_dag_cbor() {
        let root = cid_for(RAW_CODEC, b"Hello");
        let encoded = CarHeader::new(vec![root]).encode().unwrap();

        // map(2) "roots" array(1) tag(42) bytes(37) 0x00 cid "version" 1
        let mut expected = vec![0xa2, 0x65];
        expected.extend_from_slice(b"roots");
        expected.extend_from_slice(&[0x81, 0xd8, 0x2a, 0x58, 37, 0x00]);
        expected.extend_from_slice(&root.to_bytes());
        expected.push(0x67);
        expected.extend_from_slice(b"version");
        expected.push(0x01);

        assert_eq!(encoded[0] as usize, expected.len());
        assert_eq!(&encoded[1..], &expected[..]);
    }

    #[test]
    fn test_placeholder_header_same_length_as_real() {
        let placeholder = CarHeader::new(vec![placeholder_root()]);
        let real = CarHeader::new(vec![cid_for(DAG_CBOR_CODEC, b"root")]);
        assert_eq!(
            placeholder.encoded_len().unwrap(),
            real.encoded_len().unwrap()
        );
    }

    #[test]
    fn test_hello_archive_fixture() {
        let block = Block::new(RAW_CODEC, &b"Hello"[..]);
        let bytes = encode(vec![*block.cid()], [&block]).unwrap();
        assert_eq!(bytes.len(), 101);
        assert_eq!(
            cid_for(CAR_CODEC, &bytes).to_string(),
            "bagbaieraq55sw5shci4z27jv4fx3jds2aidy6zrumnzt3jpmez5b5zm6etdq"
        );
    }

    #[test]
    fn test_decode_in_memory() {
        let a = Block::new(RAW_CODEC, &b"a"[..]);
        let b = Block::new(DAG_CBOR_CODEC, vec![0xa0]);
        let bytes = encode(vec![*b.cid()], [&a, &b]).unwrap();

        let (header, blocks) = decode(&bytes).unwrap();
        assert_eq!(header.roots, vec![*b.cid()]);
        assert_eq!(blocks, vec![a, b]);
    }

    #[test]
    fn test_decode_rejects_tampered_block() {
        let a = Block::new(RAW_CODEC, &b"abc"[..]);
        let mut bytes = encode(vec![*a.cid()], [&a]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'x';
        assert!(matches!(decode(&bytes), Err(CarError::Block(_))));
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let a = Block::new(RAW_CODEC, &b"abc"[..]);
        let bytes = encode(vec![*a.cid()], [&a]).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_section_len_matches_encoding() {
        let a = Block::new(RAW_CODEC, vec![7u8; 300]);
        let mut buf = Vec::new();
        encode_section(&a, &mut buf);
        assert_eq!(buf.len(), section_len(&a));
    }
}
