//! UCAN invocations over ucanto
//!
//! The storage service authorizes every request with a UCAN: a token
//!  signed by the caller's key, naming a capability (`can`) on a resource
//!  (`with`), and carrying the delegation chain (`prf`) that proves the
//!  caller may use it.
//!
//! - **[`Signer`]**: ed25519 identity, rendered as a `did:key`
//! - **[`Delegation`]**: the proof chain handed to us out of band, loaded once
//! - **[`Invocation`]**: a freshly signed UCAN for a single capability
//! - **[`Receipt`]**: the service's answer, either `ok` or `error`
//! - **[`Connection`]**: how invocations reach the service; [`HttpConnection`]
//!   posts CAR-encoded ucanto messages
//!
//! Tokens and receipts are DAG-CBOR blocks. Tokens follow the dag-ucan
//!  layout: principals as tagged key bytes, varsig signatures over the
//!  JWT-style `header.payload` string. A request is a CAR whose root
//!  lists the invocations to execute; the response is a CAR whose root maps
//!  each invocation CID to its receipt.

mod connection;
mod delegation;
mod did;
mod invocation;
mod message;
mod receipt;
mod signer;
mod token;

pub use connection::{Connection, ConnectionError, HttpConnection, CAR_CONTENT_TYPE};
pub use delegation::Delegation;
pub use did::Did;
pub use invocation::{Invocation, INVOCATION_TTL};
pub use message::{decode_request, decode_response, encode_request, encode_response, MESSAGE_TAG};
pub use receipt::{Failure, Outcome, Receipt};
pub use signer::Signer;
pub use token::{Capability, Ucan, UCAN_VERSION};

use std::collections::BTreeMap;

use ipld_core::ipld::Ipld;

use crate::car::CarError;
use crate::linked_data::{BlockError, Cid};

#[derive(Debug, thiserror::Error)]
pub enum UcanError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid did: {0}")]
    InvalidDid(String),
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
    #[error("dag-cbor codec error: {0}")]
    Codec(String),
    #[error("signature verification failed: {0}")]
    Signature(#[from] ed25519_dalek::SignatureError),
    #[error("archive error: {0}")]
    Car(#[from] CarError),
    #[error("invalid block: {0}")]
    Block(#[from] BlockError),
    #[error("invalid cid: {0}")]
    Cid(#[from] cid::Error),
    #[error("block {0} referenced but not present")]
    MissingBlock(Cid),
}

pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> UcanError {
    UcanError::Malformed {
        what,
        reason: reason.into(),
    }
}

pub(crate) fn to_dag_cbor(ipld: &Ipld) -> Result<Vec<u8>, UcanError> {
    serde_ipld_dagcbor::to_vec(ipld).map_err(|e| UcanError::Codec(e.to_string()))
}

pub(crate) fn from_dag_cbor(bytes: &[u8]) -> Result<Ipld, UcanError> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| UcanError::Codec(e.to_string()))
}

/// Small accessors over IPLD maps, failing with a description of
///  what was being read.
pub(crate) struct Fields<'a> {
    what: &'static str,
    map: &'a BTreeMap<String, Ipld>,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(what: &'static str, ipld: &'a Ipld) -> Result<Self, UcanError> {
        match ipld {
            Ipld::Map(map) => Ok(Self { what, map }),
            _ => Err(malformed(what, "expected a map")),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Ipld> {
        match self.map.get(key) {
            None | Some(Ipld::Null) => None,
            Some(value) => Some(value),
        }
    }

    pub(crate) fn require(&self, key: &str) -> Result<&'a Ipld, UcanError> {
        self.get(key)
            .ok_or_else(|| malformed(self.what, format!("missing `{key}`")))
    }

    /// A DID held as principal bytes, or as a plain string.
    pub(crate) fn principal(&self, key: &str) -> Result<Did, UcanError> {
        match self.require(key)? {
            Ipld::Bytes(bytes) => Did::from_principal_bytes(bytes),
            Ipld::String(s) => s.parse(),
            _ => Err(malformed(self.what, format!("`{key}` is not a principal"))),
        }
    }

    pub(crate) fn string(&self, key: &str) -> Result<&'a str, UcanError> {
        match self.require(key)? {
            Ipld::String(s) => Ok(s),
            _ => Err(malformed(self.what, format!("`{key}` is not a string"))),
        }
    }

    pub(crate) fn bytes(&self, key: &str) -> Result<&'a [u8], UcanError> {
        match self.require(key)? {
            Ipld::Bytes(b) => Ok(b),
            _ => Err(malformed(self.what, format!("`{key}` is not bytes"))),
        }
    }

    pub(crate) fn link(&self, key: &str) -> Result<Cid, UcanError> {
        match self.require(key)? {
            Ipld::Link(cid) => Ok(*cid),
            _ => Err(malformed(self.what, format!("`{key}` is not a link"))),
        }
    }

    pub(crate) fn list(&self, key: &str) -> Result<&'a [Ipld], UcanError> {
        match self.get(key) {
            None => Ok(&[]),
            Some(Ipld::List(items)) => Ok(items),
            Some(_) => Err(malformed(self.what, format!("`{key}` is not a list"))),
        }
    }

    pub(crate) fn optional_u64(&self, key: &str) -> Result<Option<u64>, UcanError> {
        match self.get(key) {
            None => Ok(None),
            Some(Ipld::Integer(i)) => u64::try_from(*i)
                .map(Some)
                .map_err(|_| malformed(self.what, format!("`{key}` is out of range"))),
            Some(_) => Err(malformed(self.what, format!("`{key}` is not an integer"))),
        }
    }
}
