use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::linked_data::multibase::{self, Base};
use crate::linked_data::varint;

use super::UcanError;

/// Multicodec prefix for an ed25519 public key (0xed as a varint)
const ED25519_PUB_PREFIX: [u8; 2] = [0xed, 0x01];
const DID_KEY_PREFIX: &str = "did:key:";
const DID_PREFIX: &str = "did:";
/// Multicodec tagging a non-key DID in principal bytes
const DID_CORE_CODE: u64 = 0x0d1d;

/// A decentralized identifier, e.g. `did:key:z6Mk...` or `did:web:up.storacha.network`.
///
/// Only the `did:<method>:<id>` shape is checked. `did:key` identifiers
///  carrying an ed25519 key can additionally be turned back into a
///  verifying key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn from_ed25519(key: &VerifyingKey) -> Self {
        let mut bytes = Vec::with_capacity(ED25519_PUB_PREFIX.len() + 32);
        bytes.extend_from_slice(&ED25519_PUB_PREFIX);
        bytes.extend_from_slice(key.as_bytes());
        Did(format!(
            "{DID_KEY_PREFIX}{}",
            multibase::encode(Base::Base58Btc, bytes)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Binary principal form used inside UCANs.
    ///
    /// A `did:key` becomes its multicodec tagged public key. Anything else
    ///  becomes varint(0x0d1d) followed by the UTF-8 after `did:`.
    pub fn to_principal_bytes(&self) -> Result<Vec<u8>, UcanError> {
        if let Some(encoded) = self.0.strip_prefix(DID_KEY_PREFIX) {
            let (_, bytes) = multibase::decode(encoded)
                .map_err(|e| UcanError::InvalidDid(format!("{}: {e}", self.0)))?;
            return Ok(bytes);
        }
        let rest = self
            .0
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| UcanError::InvalidDid(self.0.clone()))?;
        let mut bytes = varint::encode(DID_CORE_CODE);
        bytes.extend_from_slice(rest.as_bytes());
        Ok(bytes)
    }

    /// Inverse of [`Did::to_principal_bytes`].
    pub fn from_principal_bytes(bytes: &[u8]) -> Result<Self, UcanError> {
        let (code, read) = varint::decode(bytes)
            .ok_or_else(|| UcanError::InvalidDid("truncated principal".into()))?;
        if code == DID_CORE_CODE {
            let rest = std::str::from_utf8(&bytes[read..])
                .map_err(|e| UcanError::InvalidDid(format!("principal is not UTF-8: {e}")))?;
            return format!("{DID_PREFIX}{rest}").parse();
        }
        Ok(Did(format!(
            "{DID_KEY_PREFIX}{}",
            multibase::encode(Base::Base58Btc, bytes)
        )))
    }

    /// The ed25519 key behind a `did:key`, if that is what this is.
    pub fn ed25519_key(&self) -> Result<VerifyingKey, UcanError> {
        let encoded = self
            .0
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| UcanError::InvalidDid(format!("{} is not a did:key", self.0)))?;
        let (_, bytes) = multibase::decode(encoded)
            .map_err(|e| UcanError::InvalidDid(format!("{}: {e}", self.0)))?;
        let key = bytes
            .strip_prefix(&ED25519_PUB_PREFIX[..])
            .ok_or_else(|| UcanError::InvalidDid(format!("{} is not an ed25519 key", self.0)))?;
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| UcanError::InvalidDid(format!("{} has a bad key length", self.0)))?;
        Ok(VerifyingKey::from_bytes(&key)?)
    }
}

impl FromStr for Did {
    type Err = UcanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Did(s.to_string()))
            }
            _ => Err(UcanError::InvalidDid(s.to_string())),
        }
    }
}

impl TryFrom<String> for Did {
    type Error = UcanError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
