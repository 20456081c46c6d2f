use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::linked_data::{Block, Cid};

use super::{Capability, Delegation, Did, Signer, Ucan, UcanError};

/// How long an invocation stays valid after it is signed
pub const INVOCATION_TTL: Duration = Duration::from_secs(30);

/// A signed request to exercise one capability, together with every
///  proof block needed to check it.
#[derive(Debug, Clone)]
pub struct Invocation {
    ucan: Ucan,
    block: Block,
    proofs: Vec<Block>,
}

impl Invocation {
    pub fn issue(
        issuer: &Signer,
        audience: &Did,
        capability: Capability,
        proofs: &[&Delegation],
    ) -> Result<Self, UcanError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let expiration = (now + INVOCATION_TTL).as_secs();

        let mut ucan = Ucan::issue(
            issuer,
            audience.clone(),
            vec![capability],
            proofs.iter().map(|p| *p.cid()).collect(),
            Some(expiration),
        )?;
        // two identical invocations within the same second must still differ
        ucan.nonce = Some(hex::encode(rand::random::<[u8; 8]>()));
        ucan.sign(issuer)?;

        let block = ucan.to_block()?;
        let mut blocks: Vec<Block> = Vec::new();
        for proof in proofs {
            for b in proof.blocks() {
                if !blocks.iter().any(|seen| seen.cid() == b.cid()) {
                    blocks.push(b.clone());
                }
            }
        }
        Ok(Self {
            ucan,
            block,
            proofs: blocks,
        })
    }

    /// Reassemble an invocation received on the wire.
    pub fn from_blocks(block: Block, proofs: Vec<Block>) -> Result<Self, UcanError> {
        let ucan = Ucan::from_block(&block)?;
        Ok(Self {
            ucan,
            block,
            proofs,
        })
    }

    pub fn cid(&self) -> &Cid {
        self.block.cid()
    }

    pub fn ucan(&self) -> &Ucan {
        &self.ucan
    }

    /// The single capability being invoked
    pub fn capability(&self) -> Option<&Capability> {
        self.ucan.capabilities.first()
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Proof blocks first, then the invocation itself.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.proofs.iter().chain(std::iter::once(&self.block))
    }
}
