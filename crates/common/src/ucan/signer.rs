use std::fmt;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};

use crate::linked_data::multibase::{self, Base};

use super::{malformed, Did, UcanError};

/// Size of an ed25519 secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Multicodec prefix for an ed25519 private key (0x1300 as a varint)
const ED25519_PRIV_PREFIX: [u8; 2] = [0x80, 0x26];
/// Multicodec prefix for an ed25519 public key (0xed as a varint)
const ED25519_PUB_PREFIX: [u8; 2] = [0xed, 0x01];
const ENCODED_LEN: usize = 2 + SECRET_KEY_SIZE + 2 + 32;
/// Varsig header of an ed25519 signature: varint(0xd0ed) then varint(64)
const EDDSA_VARSIG_HEADER: [u8; 4] = [0xed, 0xa1, 0x03, 0x40];

/// JWT `alg` matching the signatures this signer produces
pub const SIGNATURE_ALGORITHM: &str = "EdDSA";

/// An ed25519 signing identity.
///
/// Keys are exchanged in the format `w3 key create` prints: multibase
///  (usually base64pad, `M...`) over the tagged secret key followed by the
///  tagged public key.
///
/// ```ignore
/// let signer = Signer::parse("MgCY...")?;
/// println!("{}", signer.did()); // did:key:z6Mk...
/// ```
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    did: Did,
}

impl Signer {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_bytes(&rand::random())
    }

    pub fn from_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        let key = SigningKey::from_bytes(secret);
        let did = Did::from_ed25519(&key.verifying_key());
        Self { key, did }
    }

    /// Parse a multibase encoded private key.
    ///
    /// The embedded public key must match the one derived from the secret.
    pub fn parse(encoded: &str) -> Result<Self, UcanError> {
        let (_, bytes) = multibase::decode(encoded.trim())
            .map_err(|e| UcanError::InvalidKey(format!("multibase decode error: {e}")))?;
        if bytes.len() != ENCODED_LEN {
            return Err(UcanError::InvalidKey(format!(
                "invalid key size, expected {}, got {}",
                ENCODED_LEN,
                bytes.len()
            )));
        }
        let (secret, public) = bytes.split_at(2 + SECRET_KEY_SIZE);
        let secret = secret
            .strip_prefix(&ED25519_PRIV_PREFIX[..])
            .ok_or_else(|| UcanError::InvalidKey("not an ed25519 private key".into()))?;
        let public = public
            .strip_prefix(&ED25519_PUB_PREFIX[..])
            .ok_or_else(|| UcanError::InvalidKey("not an ed25519 public key".into()))?;

        let mut buff = [0; SECRET_KEY_SIZE];
        buff.copy_from_slice(secret);
        let signer = Self::from_bytes(&buff);
        if signer.key.verifying_key().as_bytes() != public {
            return Err(UcanError::InvalidKey(
                "public key does not match private key".into(),
            ));
        }
        Ok(signer)
    }

    /// Inverse of [`Signer::parse`], base64pad encoded.
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(ENCODED_LEN);
        bytes.extend_from_slice(&ED25519_PRIV_PREFIX);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes.extend_from_slice(&ED25519_PUB_PREFIX);
        bytes.extend_from_slice(self.key.verifying_key().as_bytes());
        multibase::encode(Base::Base64Pad, bytes)
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `message`, returning the signature as a varsig.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut varsig = Vec::with_capacity(EDDSA_VARSIG_HEADER.len() + 64);
        varsig.extend_from_slice(&EDDSA_VARSIG_HEADER);
        varsig.extend_from_slice(&self.key.sign(message).to_bytes());
        varsig
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("did", &self.did).finish()
    }
}

/// Check an ed25519 varsig `signature` over `message` by the holder of `did`.
pub(crate) fn verify(did: &Did, message: &[u8], signature: &[u8]) -> Result<(), UcanError> {
    let key = did.ed25519_key()?;
    let raw = signature
        .strip_prefix(&EDDSA_VARSIG_HEADER[..])
        .ok_or_else(|| malformed("signature", "not an ed25519 varsig"))?;
    let signature = Signature::from_slice(raw)?;
    key.verify(message, &signature)?;
    Ok(())
}
