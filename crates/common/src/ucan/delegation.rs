use std::collections::BTreeMap;

use ipld_core::ipld::Ipld;

use crate::car;
use crate::linked_data::multibase;
use crate::linked_data::{varint, Block, Cid, DAG_CBOR_CODEC, IDENTITY_CODE};

use super::{from_dag_cbor, malformed, to_dag_cbor, Capability, Did, Ucan, UcanError};

/// Key prefix of the archive root naming the token version
const ARCHIVE_VARIANT_PREFIX: &str = "ucan@";

/// A delegation chain loaded from an archive.
///
/// The archive root is the delegation handed to us; every other block is
///  a proof further up the chain. All blocks travel with each invocation
///  that cites the delegation.
#[derive(Debug, Clone)]
pub struct Delegation {
    root: Cid,
    ucan: Ucan,
    blocks: Vec<Block>,
}

impl Delegation {
    /// Load a delegation from either a CAR archive, or the textual form
    ///  `w3 delegation create --base64` prints: a CID with an identity
    ///  multihash whose digest is that archive.
    pub fn extract(bytes: &[u8]) -> Result<Self, UcanError> {
        match Self::from_car(bytes) {
            Ok(delegation) => Ok(delegation),
            Err(car_err) => {
                let Ok(text) = std::str::from_utf8(bytes) else {
                    return Err(car_err);
                };
                Self::from_car(&inlined_archive(text.trim())?)
            }
        }
    }

    /// Load a delegation from hex encoded bytes, as it appears in config.
    pub fn from_hex(hex: &str) -> Result<Self, UcanError> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes =
            hex::decode(hex).map_err(|e| malformed("delegation", format!("hex decode: {e}")))?;
        Self::extract(&bytes)
    }

    /// Load a delegation archive.
    ///
    /// The root is normally the `{"ucan@<version>": <link>}` variant that
    ///  `w3 delegation create` writes; a root that is the token itself is
    ///  accepted too.
    pub fn from_car(bytes: &[u8]) -> Result<Self, UcanError> {
        let (header, mut blocks) = car::decode(bytes)?;
        let archive_root = *header
            .roots
            .first()
            .ok_or_else(|| malformed("delegation", "archive has no root"))?;
        let find = |blocks: &[Block], cid: Cid| {
            blocks
                .iter()
                .position(|b| *b.cid() == cid)
                .ok_or(UcanError::MissingBlock(cid))
        };

        let index = find(&blocks[..], archive_root)?;
        let root = match variant_link(&blocks[index])? {
            Some(link) => {
                blocks.remove(index);
                link
            }
            None => archive_root,
        };
        let ucan = Ucan::from_block(&blocks[find(&blocks[..], root)?])?;
        Ok(Self { root, ucan, blocks })
    }

    /// Serialize as a delegation archive, rooted at the version variant.
    pub fn to_car(&self) -> Result<Vec<u8>, UcanError> {
        let variant = BTreeMap::from([(
            format!("{ARCHIVE_VARIANT_PREFIX}{}", self.ucan.version),
            Ipld::Link(self.root),
        )]);
        let variant = Block::new(DAG_CBOR_CODEC, to_dag_cbor(&Ipld::Map(variant))?);
        let blocks: Vec<Block> = self
            .blocks
            .iter()
            .cloned()
            .chain(std::iter::once(variant.clone()))
            .collect();
        Ok(car::encode(vec![*variant.cid()], &blocks)?)
    }

    pub fn cid(&self) -> &Cid {
        &self.root
    }

    pub fn ucan(&self) -> &Ucan {
        &self.ucan
    }

    /// Every block of the chain, root included.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn issuer(&self) -> &Did {
        &self.ucan.issuer
    }

    pub fn audience(&self) -> &Did {
        &self.ucan.audience
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.ucan.capabilities
    }

    /// Issue a delegation of `capabilities` from `issuer` to `audience`,
    ///  optionally backed by `proofs`.
    pub fn delegate(
        issuer: &super::Signer,
        audience: Did,
        capabilities: Vec<Capability>,
        proofs: &[&Delegation],
        expiration: Option<u64>,
    ) -> Result<Self, UcanError> {
        let ucan = Ucan::issue(
            issuer,
            audience,
            capabilities,
            proofs.iter().map(|p| p.root).collect(),
            expiration,
        )?;
        let block = ucan.to_block()?;
        let root = *block.cid();
        let mut blocks: Vec<Block> = Vec::new();
        for proof in proofs {
            for b in &proof.blocks {
                if !blocks.iter().any(|seen| seen.cid() == b.cid()) {
                    blocks.push(b.clone());
                }
            }
        }
        blocks.push(block);
        Ok(Self { root, ucan, blocks })
    }
}

/// The token link, if `block` is an archive variant.
fn variant_link(block: &Block) -> Result<Option<Cid>, UcanError> {
    if block.cid().codec() != DAG_CBOR_CODEC {
        return Ok(None);
    }
    let Ipld::Map(map) = from_dag_cbor(block.data())? else {
        return Ok(None);
    };
    if map.len() != 1 {
        return Ok(None);
    }
    match map.into_iter().next() {
        Some((key, Ipld::Link(link))) if key.starts_with(ARCHIVE_VARIANT_PREFIX) => Ok(Some(link)),
        Some((key, _)) if key.starts_with(ARCHIVE_VARIANT_PREFIX) => {
            Err(malformed("delegation", format!("`{key}` is not a link")))
        }
        _ => Ok(None),
    }
}

/// Pull the digest out of an identity-hashed CID string.
///
/// Parsed by hand since the digest is a whole archive, far longer than
///  the multihashes [`Cid`] can hold.
fn inlined_archive(text: &str) -> Result<Vec<u8>, UcanError> {
    let (_, bytes) = multibase::decode(text)
        .map_err(|e| malformed("delegation", format!("multibase decode: {e}")))?;
    let mut rest = &bytes[..];
    let mut next = || -> Result<u64, UcanError> {
        let (value, used) = varint::decode(rest)
            .ok_or_else(|| malformed("delegation", "truncated cid"))?;
        rest = &rest[used..];
        Ok(value)
    };
    let version = next()?;
    let _codec = next()?;
    let code = next()?;
    let len = next()?;
    if version != 1 {
        return Err(malformed("delegation", format!("unsupported cid version {version}")));
    }
    if code != IDENTITY_CODE {
        return Err(malformed("delegation", "cid does not inline its archive"));
    }
    if rest.len() as u64 != len {
        return Err(malformed("delegation", "inlined digest length mismatch"));
    }
    Ok(rest.to_vec())
}
