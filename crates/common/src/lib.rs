/**
 * Content addressing primitives.
 *  CIDs, multihashes, varints, blocks and the
 *  two small storage capabilities (put / get) that
 *  everything else writes through.
 */
pub mod linked_data;
/**
 * CARv1 archives: a streaming two-phase writer
 *  (placeholder root, patch on finalize), a streaming
 *  reader, and in-memory encode / decode helpers.
 */
pub mod car;
/**
 * UnixFS file DAG builder and reader.
 *  Fixed-size chunking, raw leaves, balanced layout.
 */
pub mod unixfs;
/**
 * Splits a finalized archive into size-bounded,
 *  independently decodable sub-archives.
 */
pub mod shard;
/**
 * UCAN signing, delegation proofs, invocations,
 *  receipts, and the ucanto transport.
 */
pub mod ucan;
/**
 * web3.storage capabilities (`store/add`, `upload/add`)
 *  and the per-shard registration state machine.
 */
pub mod w3up;
/**
 * The upload pipeline: temp file lifecycle, DAG build,
 *  finalize, shard, register.
 */
pub mod uploader;

pub mod prelude {
    pub use crate::car::{CarError, CarReader, CarWriter};
    pub use crate::linked_data::{Block, BlockGet, BlockPut, Cid, MemoryBlockStore};
    pub use crate::shard::{OversizedBlockPolicy, Shard, ShardConfig, Sharder};
    pub use crate::ucan::{Delegation, Did, HttpConnection, Signer};
    pub use crate::unixfs::{build_file, read_file, ChunkerConfig, FileLink};
    pub use crate::uploader::{UploadError, UploadResult, Uploader, UploaderConfig};
    pub use crate::w3up::{ShardState, StorageClient, W3upError};
}
