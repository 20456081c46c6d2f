//! Shared test utilities for upload pipeline integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use ipld_core::ipld::Ipld;
use tempfile::TempDir;
use wiremock::MockServer;

use common::linked_data::Cid;
use common::prelude::*;
use common::ucan::{Capability, Connection, ConnectionError, Failure, Invocation, Outcome, Receipt};
use common::w3up::{StoreAddOk, UploadAddOk, STORE_ADD, UPLOAD_ADD};

/// Root of the UnixFS DAG for the literal content "Hello"
pub const HELLO_ROOT: &str = "bafkreiayl6g3gitr7ys7kyng7sjywlrgimdoymco3jiyab6rozecmoazne";
/// The single shard holding "Hello"
pub const HELLO_SHARD: &str = "bagbaieraq55sw5shci4z27jv4fx3jds2aidy6zrumnzt3jpmez5b5zm6etdq";
/// Byte length of that shard
pub const HELLO_SHARD_SIZE: u64 = 101;

/// How the mock service answers `store/add`
#[derive(Debug, Clone)]
pub enum StoreBehavior {
    /// Report every shard as already stored
    Done,
    /// Ask for every shard to be PUT to `url`
    Upload {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// Fail with this message
    Fail(String),
    /// Never answer
    Hang,
}

/// One invocation as the mock service saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub can: String,
    pub with: String,
    pub nb: Ipld,
    pub proofs: Vec<Cid>,
    /// Requests the transfer target had received when this call arrived
    pub transfers_before: usize,
}

impl Call {
    pub fn link(&self, key: &str) -> Cid {
        nb_link(&self.nb, key)
    }

    pub fn links(&self, key: &str) -> Vec<Cid> {
        nb_links(&self.nb, key)
    }

    pub fn size(&self) -> u64 {
        match nb_field(&self.nb, "size") {
            Ipld::Integer(i) => *i as u64,
            other => panic!("size is not an integer: {other:?}"),
        }
    }
}

fn nb_field<'a>(nb: &'a Ipld, key: &str) -> &'a Ipld {
    match nb {
        Ipld::Map(map) => map
            .get(key)
            .unwrap_or_else(|| panic!("caveats have no {key}")),
        _ => panic!("caveats are not a map"),
    }
}

fn nb_link(nb: &Ipld, key: &str) -> Cid {
    match nb_field(nb, key) {
        Ipld::Link(cid) => *cid,
        other => panic!("{key} is not a link: {other:?}"),
    }
}

fn nb_links(nb: &Ipld, key: &str) -> Vec<Cid> {
    match nb_field(nb, key) {
        Ipld::List(items) => items
            .iter()
            .map(|i| match i {
                Ipld::Link(cid) => *cid,
                other => panic!("{other:?} is not a link"),
            })
            .collect(),
        other => panic!("{key} is not a list: {other:?}"),
    }
}

/// An in-process stand-in for the w3up service.
pub struct MockService {
    store: StoreBehavior,
    upload_error: Option<String>,
    transfer_target: Option<Arc<MockServer>>,
    calls: Mutex<Vec<Call>>,
}

impl fmt::Debug for MockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockService")
            .field("store", &self.store)
            .field("upload_error", &self.upload_error)
            .finish()
    }
}

impl MockService {
    pub fn new(store: StoreBehavior) -> Self {
        Self {
            store,
            upload_error: None,
            transfer_target: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_upload_add(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    /// Watch `server` so each call records how many transfers preceded it.
    pub fn watching(mut self, server: Arc<MockServer>) -> Self {
        self.transfer_target = Some(server);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, can: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.can == can).collect()
    }
}

fn ok<T: serde::Serialize>(value: &T) -> Outcome {
    Outcome::Ok(ipld_core::serde::to_ipld(value).unwrap())
}

#[async_trait]
impl Connection for MockService {
    async fn execute(&self, invocation: &Invocation) -> Result<Receipt, ConnectionError> {
        invocation.ucan().verify().unwrap();
        let capability: Capability = invocation.capability().unwrap().clone();

        let transfers_before = match &self.transfer_target {
            Some(server) => server.received_requests().await.unwrap_or_default().len(),
            None => 0,
        };
        self.calls.lock().unwrap().push(Call {
            can: capability.can.clone(),
            with: capability.with.clone(),
            nb: capability.nb.clone(),
            proofs: invocation.ucan().proofs.clone(),
            transfers_before,
        });

        let out = match capability.can.as_str() {
            STORE_ADD => match &self.store {
                StoreBehavior::Done => ok(&StoreAddOk::done()),
                StoreBehavior::Upload { url, headers } => {
                    ok(&StoreAddOk::upload(url.clone(), headers.clone()))
                }
                StoreBehavior::Fail(message) => {
                    Outcome::Error(Failure::new(Some("StoreAddFailure"), message.clone()))
                }
                StoreBehavior::Hang => std::future::pending().await,
            },
            UPLOAD_ADD => match &self.upload_error {
                Some(message) => Outcome::Error(Failure::new(None, message.clone())),
                None => ok(&UploadAddOk {
                    root: nb_link(&capability.nb, "root"),
                    shards: nb_links(&capability.nb, "shards"),
                }),
            },
            other => Outcome::Error(Failure::new(None, format!("unknown capability {other}"))),
        };
        Ok(Receipt::new(*invocation.cid(), out))
    }
}

/// A space, an agent holding a delegation for it, and the service DID.
pub struct Identities {
    pub space: Signer,
    pub agent: Arc<Signer>,
    pub proof: Arc<Delegation>,
    pub service: Did,
}

pub fn identities() -> Identities {
    let space = Signer::generate();
    let agent = Arc::new(Signer::generate());
    let capabilities = ["store/*", "upload/*"]
        .into_iter()
        .map(|can| Capability {
            can: can.to_string(),
            with: space.did().to_string(),
            nb: Ipld::Null,
        })
        .collect();
    let proof =
        Delegation::delegate(&space, agent.did().clone(), capabilities, &[], None).unwrap();
    Identities {
        space,
        agent,
        proof: Arc::new(proof),
        service: "did:web:web3.storage".parse().unwrap(),
    }
}

pub fn storage_client(ids: &Identities, connection: Arc<dyn Connection>) -> StorageClient {
    StorageClient::new(
        ids.agent.clone(),
        ids.proof.clone(),
        ids.space.did().clone(),
        ids.service.clone(),
        connection,
    )
}

/// Set up an uploader writing temp files into a fresh directory.
pub fn setup_uploader(
    connection: Arc<dyn Connection>,
    configure: impl FnOnce(&mut UploaderConfig),
) -> (Uploader, Identities, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let ids = identities();
    let mut config = UploaderConfig {
        tmp_dir: temp_dir.path().to_path_buf(),
        ..UploaderConfig::default()
    };
    configure(&mut config);
    let uploader = Uploader::new(storage_client(&ids, connection), config);
    (uploader, ids, temp_dir)
}

/// Feed `data` to the pipeline in `chunk`-sized pieces.
pub fn byte_stream(data: &[u8], chunk: usize) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let pieces: Vec<io::Result<Bytes>> = data
        .chunks(chunk.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(pieces)
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

/// Deterministic pseudo-random bytes
pub fn test_data(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64).wrapping_mul(2_654_435_761).wrapping_add(seed as u64) >> 7) as u8)
        .collect()
}
