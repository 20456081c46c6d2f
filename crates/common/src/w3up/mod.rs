//! web3.storage capability client
//!
//! Two capabilities are used:
//!
//! - `store/add` registers one shard (an archive) with the space. The
//!   service either already has it (`done`) or answers with a presigned
//!   URL the bytes must be PUT to (`upload`).
//! - `upload/add` ties the content root to the ordered list of shards,
//!   once every shard is registered.
//!
//! Nothing here retries. A receipt error or a failed transfer ends the
//!  upload it belongs to.

mod capabilities;
mod client;
mod state;

pub use capabilities::{
    StoreAddCaveats, StoreAddOk, StoreStatus, UploadAddCaveats, UploadAddOk, STORE_ADD,
    UPLOAD_ADD,
};
pub use client::{StorageClient, DEFAULT_SERVICE_DID, DEFAULT_SERVICE_URL};
pub use state::ShardState;

use reqwest::StatusCode;

use crate::ucan::{ConnectionError, UcanError};

#[derive(Debug, thiserror::Error)]
pub enum W3upError {
    #[error("failed to build invocation: {0}")]
    Ucan(#[from] UcanError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("{capability} failed: {message}")]
    Receipt {
        capability: &'static str,
        message: String,
    },
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("invalid upload url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid upload header: {0}")]
    InvalidHeader(String),
    #[error("transfer failed: {0}")]
    Transfer(#[from] reqwest::Error),
    #[error("transfer rejected with HTTP status {0}: {1}")]
    TransferStatus(StatusCode, String),
    #[error("shard cannot go from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
}
