use std::collections::{BTreeMap, HashMap};

use ipld_core::ipld::Ipld;

use crate::car;
use crate::linked_data::{Block, Cid, DAG_CBOR_CODEC};

use super::{from_dag_cbor, malformed, to_dag_cbor, Fields, Invocation, Receipt, Ucan, UcanError};

/// Tag of the message envelope both directions of the transport use
pub const MESSAGE_TAG: &str = "ucanto/message@7.1.0";

fn envelope(body: BTreeMap<String, Ipld>) -> Result<Block, UcanError> {
    let root = Ipld::Map(BTreeMap::from([(
        MESSAGE_TAG.to_string(),
        Ipld::Map(body),
    )]));
    Ok(Block::new(DAG_CBOR_CODEC, to_dag_cbor(&root)?))
}

/// Open an archive and return the body of its message envelope, plus
///  every block by CID.
fn open_envelope(bytes: &[u8]) -> Result<(Ipld, HashMap<Cid, Block>), UcanError> {
    let (header, blocks) = car::decode(bytes)?;
    let root = *header
        .roots
        .first()
        .ok_or_else(|| malformed("message", "archive has no root"))?;
    let blocks: HashMap<Cid, Block> = blocks.into_iter().map(|b| (*b.cid(), b)).collect();
    let root_block = blocks.get(&root).ok_or(UcanError::MissingBlock(root))?;

    let ipld = from_dag_cbor(root_block.data())?;
    let body = Fields::new("message", &ipld)?.require(MESSAGE_TAG)?.clone();
    Ok((body, blocks))
}

/// Encode invocations as a request archive.
pub fn encode_request(invocations: &[Invocation]) -> Result<Vec<u8>, UcanError> {
    let execute = invocations
        .iter()
        .map(|i| Ipld::Link(*i.cid()))
        .collect();
    let root = envelope(BTreeMap::from([("execute".to_string(), Ipld::List(execute))]))?;

    let mut blocks: Vec<&Block> = Vec::new();
    for block in invocations.iter().flat_map(|i| i.blocks()) {
        if !blocks.iter().any(|seen| seen.cid() == block.cid()) {
            blocks.push(block);
        }
    }
    blocks.push(&root);
    Ok(car::encode(vec![*root.cid()], blocks)?)
}

/// Decode a request archive back into its invocations.
pub fn decode_request(bytes: &[u8]) -> Result<Vec<Invocation>, UcanError> {
    let (body, blocks) = open_envelope(bytes)?;
    let execute = Fields::new("message", &body)?.list("execute")?.to_vec();

    execute
        .iter()
        .map(|link| {
            let Ipld::Link(cid) = link else {
                return Err(malformed("message", "execute entry is not a link"));
            };
            let block = blocks.get(cid).ok_or(UcanError::MissingBlock(*cid))?.clone();
            let proofs = proof_blocks(&Ucan::from_block(&block)?, &blocks)?;
            Invocation::from_blocks(block, proofs)
        })
        .collect()
}

/// Every block reachable through `prf`, depth first.
fn proof_blocks(ucan: &Ucan, blocks: &HashMap<Cid, Block>) -> Result<Vec<Block>, UcanError> {
    let mut out: Vec<Block> = Vec::new();
    let mut stack: Vec<Cid> = ucan.proofs.iter().rev().copied().collect();
    while let Some(cid) = stack.pop() {
        if out.iter().any(|b| *b.cid() == cid) {
            continue;
        }
        let block = blocks.get(&cid).ok_or(UcanError::MissingBlock(cid))?;
        let proof = Ucan::from_block(block)?;
        out.push(block.clone());
        stack.extend(proof.proofs.iter().rev().copied());
    }
    Ok(out)
}

/// Encode receipts as a response archive, reported by the invocation
///  each one ran.
pub fn encode_response(receipts: &[Receipt]) -> Result<Vec<u8>, UcanError> {
    let mut report = BTreeMap::new();
    let mut blocks = Vec::with_capacity(receipts.len() + 1);
    for receipt in receipts {
        let block = receipt.to_block()?;
        report.insert(receipt.ran.to_string(), Ipld::Link(*block.cid()));
        blocks.push(block);
    }
    let root = envelope(BTreeMap::from([("report".to_string(), Ipld::Map(report))]))?;
    blocks.push(root.clone());
    Ok(car::encode(vec![*root.cid()], &blocks)?)
}

/// Decode a response archive into receipts keyed by the invocation
///  they answer.
pub fn decode_response(bytes: &[u8]) -> Result<HashMap<Cid, Receipt>, UcanError> {
    let (body, blocks) = open_envelope(bytes)?;
    let fields = Fields::new("message", &body)?;
    let Ipld::Map(report) = fields.require("report")? else {
        return Err(malformed("message", "report is not a map"));
    };

    let mut receipts = HashMap::with_capacity(report.len());
    for (ran, link) in report {
        let Ipld::Link(cid) = link else {
            return Err(malformed("message", "report entry is not a link"));
        };
        let block = blocks.get(cid).ok_or(UcanError::MissingBlock(*cid))?;
        let receipt = Receipt::from_block(block)?;
        let ran = Cid::try_from(ran.as_str())?;
        if receipt.ran != ran {
            return Err(malformed(
                "message",
                format!("receipt for {} reported under {ran}", receipt.ran),
            ));
        }
        receipts.insert(ran, receipt);
    }
    Ok(receipts)
}
