//! UnixFS files
//!
//! A file is chunked into fixed-size raw leaves which are grouped under
//!  DAG-PB nodes until one root remains:
//!
//! ```text
//!                    root (dag-pb, File)
//!            +--------------+---------------+
//!         node             node           leaf
//!     +----+----+      +----+----+
//!   leaf leaf  leaf  leaf leaf  leaf
//! ```
//!
//! A file that fits in one chunk is just that raw leaf.

mod builder;
pub mod pb;
mod reader;

pub use builder::{
    build_file, BuildError, ChunkerConfig, FileLink, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS,
};
pub use reader::{read_file, ReadError};
