use std::collections::BTreeMap;

use ipld_core::ipld::Ipld;
use serde::Serialize;

use crate::linked_data::dag_json::{self, base_encode};
use crate::linked_data::multibase::Base;
use crate::linked_data::{Block, Cid, DAG_CBOR_CODEC};

use super::signer::{verify, SIGNATURE_ALGORITHM};
use super::{from_dag_cbor, malformed, to_dag_cbor, Did, Fields, Signer, UcanError};

pub const UCAN_VERSION: &str = "0.9.1";

/// `can` applied to the resource `with`, constrained by caveats `nb`.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub can: String,
    pub with: String,
    pub nb: Ipld,
}

impl Capability {
    /// Build a capability from typed caveats.
    pub fn new<N: Serialize>(
        can: impl Into<String>,
        with: impl Into<String>,
        nb: &N,
    ) -> Result<Self, UcanError> {
        let nb = ipld_core::serde::to_ipld(nb).map_err(|e| UcanError::Codec(e.to_string()))?;
        Ok(Self {
            can: can.into(),
            with: with.into(),
            nb,
        })
    }

    fn to_ipld(&self) -> Ipld {
        let mut map = BTreeMap::new();
        map.insert("can".to_string(), Ipld::String(self.can.clone()));
        map.insert("with".to_string(), Ipld::String(self.with.clone()));
        if !matches!(self.nb, Ipld::Null) {
            map.insert("nb".to_string(), self.nb.clone());
        }
        Ipld::Map(map)
    }

    fn from_ipld(ipld: &Ipld) -> Result<Self, UcanError> {
        let fields = Fields::new("capability", ipld)?;
        Ok(Self {
            can: fields.string("can")?.to_string(),
            with: fields.string("with")?.to_string(),
            nb: fields.get("nb").cloned().unwrap_or(Ipld::Null),
        })
    }
}

/// A signed UCAN in its dag-ucan IPLD form.
///
/// The block keeps `iss`/`aud` as principal bytes and `s` as a varsig. The
///  signature covers `base64url(header).base64url(payload)`, where both
///  halves are DAG-JSON and the payload names principals by DID string and
///  proofs by CID string. Empty `fct` and unset `nnc`/`nbf` are left out of
///  both forms.
#[derive(Debug, Clone, PartialEq)]
pub struct Ucan {
    pub version: String,
    pub issuer: Did,
    pub audience: Did,
    pub capabilities: Vec<Capability>,
    /// Seconds since the epoch; `None` never expires
    pub expiration: Option<u64>,
    pub not_before: Option<u64>,
    pub nonce: Option<String>,
    pub facts: Vec<Ipld>,
    pub proofs: Vec<Cid>,
    pub signature: Vec<u8>,
}

impl Ucan {
    /// Sign a new token as `issuer`.
    pub fn issue(
        issuer: &Signer,
        audience: Did,
        capabilities: Vec<Capability>,
        proofs: Vec<Cid>,
        expiration: Option<u64>,
    ) -> Result<Self, UcanError> {
        let mut ucan = Self {
            version: UCAN_VERSION.to_string(),
            issuer: issuer.did().clone(),
            audience,
            capabilities,
            expiration,
            not_before: None,
            nonce: None,
            facts: Vec::new(),
            proofs,
            signature: Vec::new(),
        };
        ucan.sign(issuer)?;
        Ok(ucan)
    }

    /// Re-sign as `issuer`, e.g. after setting a nonce.
    pub fn sign(&mut self, issuer: &Signer) -> Result<(), UcanError> {
        self.issuer = issuer.did().clone();
        self.signature = issuer.sign(&self.signed_bytes()?);
        Ok(())
    }

    /// Fields written the same way in the block and the signing payload.
    fn claims(&self) -> BTreeMap<String, Ipld> {
        let mut map = BTreeMap::new();
        map.insert(
            "att".to_string(),
            Ipld::List(self.capabilities.iter().map(Capability::to_ipld).collect()),
        );
        map.insert(
            "exp".to_string(),
            self.expiration
                .map(|exp| Ipld::Integer(exp.into()))
                .unwrap_or(Ipld::Null),
        );
        if let Some(nbf) = self.not_before {
            map.insert("nbf".to_string(), Ipld::Integer(nbf.into()));
        }
        if let Some(nonce) = &self.nonce {
            map.insert("nnc".to_string(), Ipld::String(nonce.clone()));
        }
        if !self.facts.is_empty() {
            map.insert("fct".to_string(), Ipld::List(self.facts.clone()));
        }
        map
    }

    /// The bytes the issuer signs: `base64url(header).base64url(payload)`.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, UcanError> {
        let header = BTreeMap::from([
            ("alg".to_string(), Ipld::String(SIGNATURE_ALGORITHM.to_string())),
            ("typ".to_string(), Ipld::String("JWT".to_string())),
            ("ucv".to_string(), Ipld::String(self.version.clone())),
        ]);

        let mut payload = self.claims();
        payload.insert("iss".to_string(), Ipld::String(self.issuer.to_string()));
        payload.insert("aud".to_string(), Ipld::String(self.audience.to_string()));
        payload.insert(
            "prf".to_string(),
            Ipld::List(
                self.proofs
                    .iter()
                    .map(|p| Ipld::String(p.to_string()))
                    .collect(),
            ),
        );

        let codec = |e: serde_json::Error| UcanError::Codec(e.to_string());
        let header = dag_json::encode(&Ipld::Map(header)).map_err(codec)?;
        let payload = dag_json::encode(&Ipld::Map(payload)).map_err(codec)?;
        Ok(format!(
            "{}.{}",
            base_encode(Base::Base64Url, header.as_bytes()),
            base_encode(Base::Base64Url, payload.as_bytes())
        )
        .into_bytes())
    }

    pub fn to_ipld(&self) -> Result<Ipld, UcanError> {
        let mut map = self.claims();
        map.insert("v".to_string(), Ipld::String(self.version.clone()));
        map.insert(
            "iss".to_string(),
            Ipld::Bytes(self.issuer.to_principal_bytes()?),
        );
        map.insert(
            "aud".to_string(),
            Ipld::Bytes(self.audience.to_principal_bytes()?),
        );
        map.insert(
            "prf".to_string(),
            Ipld::List(self.proofs.iter().copied().map(Ipld::Link).collect()),
        );
        map.insert("s".to_string(), Ipld::Bytes(self.signature.clone()));
        Ok(Ipld::Map(map))
    }

    pub fn from_ipld(ipld: &Ipld) -> Result<Self, UcanError> {
        let fields = Fields::new("ucan", ipld)?;
        let capabilities = fields
            .list("att")?
            .iter()
            .map(Capability::from_ipld)
            .collect::<Result<Vec<_>, _>>()?;
        let proofs = fields
            .list("prf")?
            .iter()
            .map(|p| match p {
                Ipld::Link(cid) => Ok(*cid),
                _ => Err(malformed("ucan", "proof is not a link")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: fields.string("v")?.to_string(),
            issuer: fields.principal("iss")?,
            audience: fields.principal("aud")?,
            capabilities,
            expiration: fields.optional_u64("exp")?,
            not_before: fields.optional_u64("nbf")?,
            nonce: fields.get("nnc").and_then(|n| match n {
                Ipld::String(s) => Some(s.clone()),
                _ => None,
            }),
            facts: fields.list("fct")?.to_vec(),
            proofs,
            signature: fields.bytes("s")?.to_vec(),
        })
    }

    pub fn to_block(&self) -> Result<Block, UcanError> {
        Ok(Block::new(DAG_CBOR_CODEC, to_dag_cbor(&self.to_ipld()?)?))
    }

    pub fn from_block(block: &Block) -> Result<Self, UcanError> {
        if block.cid().codec() != DAG_CBOR_CODEC {
            return Err(malformed("ucan", "block is not dag-cbor"));
        }
        Self::from_ipld(&from_dag_cbor(block.data())?)
    }

    /// Check the signature against the issuer's `did:key`.
    pub fn verify(&self) -> Result<(), UcanError> {
        verify(&self.issuer, &self.signed_bytes()?, &self.signature)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }
}
