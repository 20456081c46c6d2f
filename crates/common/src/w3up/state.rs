use std::collections::BTreeMap;

use url::Url;

use super::{StoreAddOk, StoreStatus, W3upError};

/// Where a single shard is in its registration with the storage service.
///
/// ```text
/// Registering --"done"--> Done
///      |
///      +--"upload"--> AwaitingUpload --PUT ok--> Registered
/// ```
///
/// `Done` and `Registered` are terminal. The transitions are pure; the
///  network calls that drive them live in [`StorageClient`](super::StorageClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardState {
    Registering,
    AwaitingUpload {
        url: Url,
        headers: BTreeMap<String, String>,
    },
    Done,
    Registered,
}

impl ShardState {
    /// Apply the result of `store/add`.
    pub fn on_store_add(self, ok: StoreAddOk) -> Result<Self, W3upError> {
        match self {
            ShardState::Registering => match ok.status {
                StoreStatus::Done => Ok(ShardState::Done),
                StoreStatus::Upload => {
                    let url = ok.url.ok_or_else(|| {
                        W3upError::Protocol("store/add asked for an upload without a url".into())
                    })?;
                    Ok(ShardState::AwaitingUpload {
                        url: Url::parse(&url)?,
                        headers: ok.headers,
                    })
                }
            },
            other => Err(W3upError::InvalidTransition {
                from: other.name(),
                event: "store/add receipt",
            }),
        }
    }

    /// Record that the shard bytes reached the upload URL.
    pub fn on_transfer_complete(self) -> Result<Self, W3upError> {
        match self {
            ShardState::AwaitingUpload { .. } => Ok(ShardState::Registered),
            other => Err(W3upError::InvalidTransition {
                from: other.name(),
                event: "transfer complete",
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShardState::Done | ShardState::Registered)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ShardState::Registering => "registering",
            ShardState::AwaitingUpload { .. } => "awaiting-upload",
            ShardState::Done => "done",
            ShardState::Registered => "registered",
        }
    }
}
