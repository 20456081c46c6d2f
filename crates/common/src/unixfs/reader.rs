use crate::linked_data::{BlockGet, Cid, StoreError, DAG_PB_CODEC, RAW_CODEC};

use super::pb::{DataType, PbError, PbNode, UnixFsData};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("block {0} is missing")]
    MissingBlock(Cid),
    #[error("malformed node: {0}")]
    Pb(#[from] PbError),
    #[error("unsupported codec {0:#x} in file dag")]
    UnsupportedCodec(u64),
    #[error("node {0} is not a file")]
    NotAFile(Cid),
}

/// Walk a UnixFS file DAG depth first and return its bytes.
pub async fn read_file<S: BlockGet + ?Sized>(root: &Cid, store: &mut S) -> Result<Vec<u8>, ReadError> {
    let mut out = Vec::new();
    let mut stack = vec![*root];

    while let Some(cid) = stack.pop() {
        let block = store
            .get(&cid)
            .await?
            .ok_or(ReadError::MissingBlock(cid))?;
        match cid.codec() {
            RAW_CODEC => out.extend_from_slice(block.data()),
            DAG_PB_CODEC => {
                let node = PbNode::decode(block.data())?;
                let data = node
                    .data
                    .as_ref()
                    .map(|d| UnixFsData::decode(d))
                    .transpose()?
                    .ok_or(ReadError::NotAFile(cid))?;
                if !matches!(data.kind, DataType::File | DataType::Raw) {
                    return Err(ReadError::NotAFile(cid));
                }
                if let Some(inline) = &data.data {
                    out.extend_from_slice(inline);
                }
                stack.extend(node.links.iter().rev().map(|l| l.cid));
            }
            codec => return Err(ReadError::UnsupportedCodec(codec)),
        }
    }
    Ok(out)
}
