use bytes::Bytes;

use super::{cid_for, Cid, IDENTITY_CODE, SHA2_256_CODE};

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("unsupported multihash code: {0:#x}")]
    UnsupportedHash(u64),
    #[error("block data does not match cid {0}")]
    HashMismatch(Cid),
}

/// An immutable, content-addressed unit of data.
///
/// The CID is always derived from the bytes. Blocks coming from
///  untrusted input go through [`Block::verified`], which recomputes
///  the hash and rejects a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Hash `data` under `codec` and wrap it as a block.
    pub fn new(codec: u64, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = cid_for(codec, &data);
        Self { cid, data }
    }

    /// Build a block from a claimed CID, checking the claim.
    pub fn verified(cid: Cid, data: impl Into<Bytes>) -> Result<Self, BlockError> {
        let data = data.into();
        let hash = cid.hash();
        match hash.code() {
            SHA2_256_CODE => {
                let expected = cid_for(cid.codec(), &data);
                if expected.hash() != hash {
                    return Err(BlockError::HashMismatch(cid));
                }
            }
            IDENTITY_CODE => {
                if hash.digest() != data.as_ref() {
                    return Err(BlockError::HashMismatch(cid));
                }
            }
            code => return Err(BlockError::UnsupportedHash(code)),
        }
        Ok(Self { cid, data })
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Cid, Bytes) {
        (self.cid, self.data)
    }

    /// Length of the CID bytes plus the payload, i.e. what a CAR
    ///  section length prefix counts.
    pub fn section_body_len(&self) -> usize {
        self.cid.encoded_len() + self.data.len()
    }
}
