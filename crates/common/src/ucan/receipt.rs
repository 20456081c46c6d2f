use std::collections::BTreeMap;
use std::fmt;

use ipld_core::ipld::Ipld;
use serde::de::DeserializeOwned;

use crate::linked_data::{Block, Cid, DAG_CBOR_CODEC};

use super::signer::verify;
use super::{from_dag_cbor, malformed, to_dag_cbor, Did, Fields, Signer, UcanError};

/// What the service reported for an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Ipld),
    Error(Failure),
}

/// An `error` outcome. `message` is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub name: Option<String>,
    pub message: String,
    pub raw: Ipld,
}

impl Failure {
    pub fn new(name: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut map = BTreeMap::new();
        if let Some(name) = name {
            map.insert("name".to_string(), Ipld::String(name.to_string()));
        }
        map.insert("message".to_string(), Ipld::String(message.clone()));
        Self {
            name: name.map(str::to_string),
            message,
            raw: Ipld::Map(map),
        }
    }

    fn from_ipld(raw: Ipld) -> Self {
        let (name, message) = match Fields::new("error", &raw) {
            Ok(fields) => (
                fields.string("name").ok().map(str::to_string),
                fields.string("message").ok().map(str::to_string),
            ),
            Err(_) => (None, None),
        };
        Self {
            name,
            message: message.unwrap_or_else(|| format!("{raw:?}")),
            raw,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The result of running an invocation, signed by whoever ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// CID of the invocation this answers
    pub ran: Cid,
    pub out: Outcome,
    pub issuer: Option<Did>,
    pub signature: Vec<u8>,
}

impl Receipt {
    /// An unsigned receipt.
    pub fn new(ran: Cid, out: Outcome) -> Self {
        Self {
            ran,
            out,
            issuer: None,
            signature: Vec::new(),
        }
    }

    pub fn issue(signer: &Signer, ran: Cid, out: Outcome) -> Result<Self, UcanError> {
        let mut receipt = Self::new(ran, out);
        receipt.issuer = Some(signer.did().clone());
        receipt.signature = signer.sign(&to_dag_cbor(&receipt.outcome_ipld())?);
        Ok(receipt)
    }

    fn outcome_ipld(&self) -> Ipld {
        let out = match &self.out {
            Outcome::Ok(value) => ("ok", value.clone()),
            Outcome::Error(failure) => ("error", failure.raw.clone()),
        };
        let mut fx = BTreeMap::new();
        fx.insert("fork".to_string(), Ipld::List(Vec::new()));

        let mut ocm = BTreeMap::new();
        ocm.insert("ran".to_string(), Ipld::Link(self.ran));
        ocm.insert(
            "out".to_string(),
            Ipld::Map(BTreeMap::from([(out.0.to_string(), out.1)])),
        );
        ocm.insert("fx".to_string(), Ipld::Map(fx));
        ocm.insert("meta".to_string(), Ipld::Map(BTreeMap::new()));
        if let Some(issuer) = &self.issuer {
            ocm.insert("iss".to_string(), Ipld::String(issuer.to_string()));
        }
        ocm.insert("prf".to_string(), Ipld::List(Vec::new()));
        Ipld::Map(ocm)
    }

    pub fn to_block(&self) -> Result<Block, UcanError> {
        let mut map = BTreeMap::new();
        map.insert("ocm".to_string(), self.outcome_ipld());
        map.insert("sig".to_string(), Ipld::Bytes(self.signature.clone()));
        Ok(Block::new(DAG_CBOR_CODEC, to_dag_cbor(&Ipld::Map(map))?))
    }

    pub fn from_block(block: &Block) -> Result<Self, UcanError> {
        let ipld = from_dag_cbor(block.data())?;
        let fields = Fields::new("receipt", &ipld)?;
        let ocm = Fields::new("receipt outcome", fields.require("ocm")?)?;
        let out = Fields::new("receipt result", ocm.require("out")?)?;

        let out = if let Some(ok) = out.get("ok") {
            Outcome::Ok(ok.clone())
        } else if let Some(error) = out.get("error") {
            Outcome::Error(Failure::from_ipld(error.clone()))
        } else {
            return Err(malformed("receipt", "result is neither ok nor error"));
        };

        Ok(Self {
            ran: ocm.link("ran")?,
            out,
            issuer: match ocm.get("iss") {
                Some(_) => Some(ocm.principal("iss")?),
                None => None,
            },
            signature: fields
                .get("sig")
                .and_then(|sig| match sig {
                    Ipld::Bytes(b) => Some(b.clone()),
                    _ => None,
                })
                .unwrap_or_default(),
        })
    }

    /// Check the signature, when the receipt names a `did:key` issuer.
    pub fn verify(&self) -> Result<(), UcanError> {
        match &self.issuer {
            Some(issuer) => verify(issuer, &to_dag_cbor(&self.outcome_ipld())?, &self.signature),
            None => Err(malformed("receipt", "no issuer to verify against")),
        }
    }

    /// Decode an `ok` outcome into `T`, or hand back the failure.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<Result<T, UcanError>, Failure> {
        match self.out {
            Outcome::Ok(value) => Ok(ipld_core::serde::from_ipld(value)
                .map_err(|e| malformed("receipt result", e.to_string()))),
            Outcome::Error(failure) => Err(failure),
        }
    }
}
