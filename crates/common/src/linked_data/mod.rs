//! Content addressing primitives
//!
//! Everything the pipeline writes is a [`Block`]: a payload plus the CID
//! derived from hashing it. CIDs are always CIDv1 with a sha2-256 multihash;
//! the codec says how to interpret the payload:
//!
//! - [`RAW_CODEC`]: opaque bytes (UnixFS leaves)
//! - [`DAG_PB_CODEC`]: protobuf DAG nodes (UnixFS interior nodes)
//! - [`DAG_CBOR_CODEC`]: CBOR nodes (UCANs, receipts, ucanto messages)
//! - [`CAR_CODEC`]: a whole serialized archive (shards)
//!
//! Blocks are moved around through two small capabilities, [`BlockPut`] and
//! [`BlockGet`], so the DAG builder never touches storage directly.

mod block;
pub mod dag_json;
mod store;
pub mod varint;

pub use block::{Block, BlockError};
pub use cid::multibase;
pub use cid::Cid;
pub use store::{BlockGet, BlockPut, MemoryBlockStore, StoreError};

use multihash::Multihash;
use sha2::{Digest, Sha256};

/// Multicodec for raw bytes
pub const RAW_CODEC: u64 = 0x55;
/// Multicodec for DAG-PB
pub const DAG_PB_CODEC: u64 = 0x70;
/// Multicodec for DAG-CBOR
pub const DAG_CBOR_CODEC: u64 = 0x71;
/// Multicodec for a CAR archive
pub const CAR_CODEC: u64 = 0x0202;

/// Multihash code for sha2-256
pub const SHA2_256_CODE: u64 = 0x12;
/// Multihash code for the identity "hash"
pub const IDENTITY_CODE: u64 = 0x00;

/// Hash `data` with sha2-256 and wrap it as a multihash.
pub fn sha256_multihash(data: &[u8]) -> Multihash<64> {
    let digest = Sha256::digest(data);
    Multihash::wrap(SHA2_256_CODE, &digest).expect("sha2-256 digest fits in a 64 byte multihash")
}

/// Build a CIDv1 for `data` under `codec`.
pub fn cid_for(codec: u64, data: &[u8]) -> Cid {
    Cid::new_v1(codec, sha256_multihash(data))
}

/// Build a CIDv1 from an already computed sha2-256 digest.
pub fn cid_from_digest(codec: u64, digest: &[u8]) -> Cid {
    let mh = Multihash::wrap(SHA2_256_CODE, digest)
        .expect("sha2-256 digest fits in a 64 byte multihash");
    Cid::new_v1(codec, mh)
}

/// The CID the archive writer puts in the header before the real
///  root is known: dag-pb over the hash of nothing.
pub fn placeholder_root() -> Cid {
    cid_for(DAG_PB_CODEC, &[])
}
