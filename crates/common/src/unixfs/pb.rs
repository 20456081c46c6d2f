//! Just enough protobuf for DAG-PB nodes and UnixFS data messages.
//!
//! Encoding follows the DAG-PB canonical form: links are written before
//!  the data field, link fields in Hash / Name / Tsize order.

use bytes::Bytes;

use crate::linked_data::{varint, Cid};

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum PbError {
    #[error("truncated protobuf message")]
    Truncated,
    #[error("unexpected wire type {wire} for field {field}")]
    WireType { field: u64, wire: u64 },
    #[error("invalid link hash: {0}")]
    Cid(#[from] cid::Error),
    #[error("invalid utf-8 in link name")]
    Utf8,
    #[error("link is missing its hash")]
    MissingHash,
    #[error("unknown unixfs data type {0}")]
    UnknownType(u64),
    #[error("unixfs data message is missing its type")]
    MissingType,
}

enum Value {
    Varint(u64),
    Len(std::ops::Range<usize>),
}

struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, PbError> {
        let (value, consumed) = varint::decode(&self.buf[self.pos..]).ok_or(PbError::Truncated)?;
        self.pos += consumed;
        Ok(value)
    }

    fn skip(&mut self, n: usize) -> Result<(), PbError> {
        if self.buf.len() - self.pos < n {
            return Err(PbError::Truncated);
        }
        self.pos += n;
        Ok(())
    }

    /// Next known field, skipping fixed-width ones we never use.
    fn next_field(&mut self) -> Result<Option<(u64, Value)>, PbError> {
        loop {
            if self.pos >= self.buf.len() {
                return Ok(None);
            }
            let key = self.varint()?;
            let (field, wire) = (key >> 3, key & 0x7);
            match wire {
                WIRE_VARINT => return Ok(Some((field, Value::Varint(self.varint()?)))),
                WIRE_LEN => {
                    let len = self.varint()? as usize;
                    let start = self.pos;
                    self.skip(len)?;
                    return Ok(Some((field, Value::Len(start..start + len))));
                }
                WIRE_FIXED64 => self.skip(8)?,
                WIRE_FIXED32 => self.skip(4)?,
                wire => return Err(PbError::WireType { field, wire }),
            }
        }
    }
}

fn put_key(field: u64, wire: u64, buf: &mut Vec<u8>) {
    varint::encode_into((field << 3) | wire, buf);
}

fn put_varint_field(field: u64, value: u64, buf: &mut Vec<u8>) {
    put_key(field, WIRE_VARINT, buf);
    varint::encode_into(value, buf);
}

fn put_bytes_field(field: u64, value: &[u8], buf: &mut Vec<u8>) {
    put_key(field, WIRE_LEN, buf);
    varint::encode_into(value.len() as u64, buf);
    buf.extend_from_slice(value);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbLink {
    pub cid: Cid,
    pub name: Option<String>,
    pub tsize: Option<u64>,
}

impl PbLink {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(1, &self.cid.to_bytes(), &mut buf);
        if let Some(name) = &self.name {
            put_bytes_field(2, name.as_bytes(), &mut buf);
        }
        if let Some(tsize) = self.tsize {
            put_varint_field(3, tsize, &mut buf);
        }
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, PbError> {
        let mut fields = Fields::new(buf);
        let mut cid = None;
        let mut name = None;
        let mut tsize = None;
        while let Some((field, value)) = fields.next_field()? {
            match (field, value) {
                (1, Value::Len(range)) => cid = Some(Cid::try_from(&buf[range])?),
                (2, Value::Len(range)) => {
                    name = Some(
                        std::str::from_utf8(&buf[range])
                            .map_err(|_| PbError::Utf8)?
                            .to_string(),
                    )
                }
                (3, Value::Varint(v)) => tsize = Some(v),
                (field @ 1..=3, _) => {
                    return Err(PbError::WireType {
                        field,
                        wire: WIRE_LEN,
                    })
                }
                _ => {}
            }
        }
        Ok(Self {
            cid: cid.ok_or(PbError::MissingHash)?,
            name,
            tsize,
        })
    }
}

/// A DAG-PB node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PbNode {
    pub links: Vec<PbLink>,
    pub data: Option<Bytes>,
}

impl PbNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for link in &self.links {
            put_bytes_field(2, &link.encode(), &mut buf);
        }
        if let Some(data) = &self.data {
            put_bytes_field(1, data, &mut buf);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PbError> {
        let mut fields = Fields::new(buf);
        let mut node = PbNode::default();
        while let Some((field, value)) = fields.next_field()? {
            match (field, value) {
                (1, Value::Len(range)) => node.data = Some(Bytes::copy_from_slice(&buf[range])),
                (2, Value::Len(range)) => node.links.push(PbLink::decode(&buf[range])?),
                (field @ 1..=2, Value::Varint(_)) => {
                    return Err(PbError::WireType {
                        field,
                        wire: WIRE_VARINT,
                    })
                }
                _ => {}
            }
        }
        Ok(node)
    }
}

/// UnixFS `Data.DataType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Raw = 0,
    Directory = 1,
    File = 2,
    Metadata = 3,
    Symlink = 4,
    HamtShard = 5,
}

impl TryFrom<u64> for DataType {
    type Error = PbError;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => DataType::Raw,
            1 => DataType::Directory,
            2 => DataType::File,
            3 => DataType::Metadata,
            4 => DataType::Symlink,
            5 => DataType::HamtShard,
            other => return Err(PbError::UnknownType(other)),
        })
    }
}

/// UnixFS data message, carried in a DAG-PB node's data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixFsData {
    pub kind: DataType,
    pub data: Option<Bytes>,
    pub filesize: Option<u64>,
    pub blocksizes: Vec<u64>,
}

impl UnixFsData {
    /// An interior file node over children of the given file sizes.
    pub fn file(blocksizes: Vec<u64>) -> Self {
        Self {
            kind: DataType::File,
            data: None,
            filesize: Some(blocksizes.iter().sum()),
            blocksizes,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint_field(1, self.kind as u64, &mut buf);
        if let Some(data) = &self.data {
            put_bytes_field(2, data, &mut buf);
        }
        if let Some(filesize) = self.filesize {
            put_varint_field(3, filesize, &mut buf);
        }
        for size in &self.blocksizes {
            put_varint_field(4, *size, &mut buf);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PbError> {
        let mut fields = Fields::new(buf);
        let mut kind = None;
        let mut data = None;
        let mut filesize = None;
        let mut blocksizes = Vec::new();
        while let Some((field, value)) = fields.next_field()? {
            match (field, value) {
                (1, Value::Varint(v)) => kind = Some(DataType::try_from(v)?),
                (2, Value::Len(range)) => data = Some(Bytes::copy_from_slice(&buf[range])),
                (3, Value::Varint(v)) => filesize = Some(v),
                (4, Value::Varint(v)) => blocksizes.push(v),
                // packed repeated encoding of blocksizes
                (4, Value::Len(range)) => {
                    let mut packed = &buf[range];
                    while !packed.is_empty() {
                        let (v, consumed) = varint::decode(packed).ok_or(PbError::Truncated)?;
                        blocksizes.push(v);
                        packed = &packed[consumed..];
                    }
                }
                _ => {}
            }
        }
        Ok(Self {
            kind: kind.ok_or(PbError::MissingType)?,
            data,
            filesize,
            blocksizes,
        })
    }
}
