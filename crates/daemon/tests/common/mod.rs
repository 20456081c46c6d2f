//! Shared helpers for driving the HTTP API against an in-process service
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use http::{header, Request};
use ipld_core::ipld::Ipld;
use tempfile::TempDir;

use common::prelude::*;
use common::ucan::{Capability, Connection, ConnectionError, Failure, Invocation, Outcome, Receipt};
use common::w3up::{StoreAddOk, UploadAddOk, STORE_ADD, UPLOAD_ADD};
use w3s_uploader::ServiceState;

pub const HELLO_ROOT: &str = "bafkreiayl6g3gitr7ys7kyng7sjywlrgimdoymco3jiyab6rozecmoazne";
pub const HELLO_SHARD: &str = "bagbaieraq55sw5shci4z27jv4fx3jds2aidy6zrumnzt3jpmez5b5zm6etdq";

pub const BOUNDARY: &str = "w3s-uploader-test-boundary";

/// Answers every `store/add` as already stored, or fails it.
#[derive(Debug, Default)]
pub struct MockService {
    store_error: Option<String>,
}

impl MockService {
    pub fn failing_store_add(message: &str) -> Self {
        Self {
            store_error: Some(message.to_string()),
        }
    }
}

fn ok<T: serde::Serialize>(value: &T) -> Outcome {
    Outcome::Ok(ipld_core::serde::to_ipld(value).unwrap())
}

fn links(nb: &Ipld, key: &str) -> Vec<Cid> {
    let Ipld::Map(map) = nb else {
        panic!("caveats are not a map")
    };
    match map.get(key) {
        Some(Ipld::List(items)) => items
            .iter()
            .map(|i| match i {
                Ipld::Link(cid) => *cid,
                other => panic!("{other:?} is not a link"),
            })
            .collect(),
        Some(Ipld::Link(cid)) => vec![*cid],
        other => panic!("{key} is not a link: {other:?}"),
    }
}

#[async_trait]
impl Connection for MockService {
    async fn execute(&self, invocation: &Invocation) -> Result<Receipt, ConnectionError> {
        let capability = invocation.capability().unwrap().clone();
        let out = match capability.can.as_str() {
            STORE_ADD => match &self.store_error {
                Some(message) => Outcome::Error(Failure::new(None, message.clone())),
                None => ok(&StoreAddOk::done()),
            },
            UPLOAD_ADD => ok(&UploadAddOk {
                root: links(&capability.nb, "root")[0],
                shards: links(&capability.nb, "shards"),
            }),
            other => Outcome::Error(Failure::new(None, format!("unknown capability {other}"))),
        };
        Ok(Receipt::new(*invocation.cid(), out))
    }
}

/// A router backed by `service`, staging temp files in a fresh directory.
pub fn setup_router(service: MockService) -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let space = Signer::generate();
    let agent = Signer::generate();
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

    let client = StorageClient::new(
        Arc::new(agent),
        Arc::new(proof),
        space.did().clone(),
        "did:web:web3.storage".parse().unwrap(),
        Arc::new(service),
    );
    let config = UploaderConfig {
        tmp_dir: temp_dir.path().to_path_buf(),
        ..UploaderConfig::default()
    };
    let state = ServiceState::new(Uploader::new(client, config));
    (
        w3s_uploader::http_server::router(state, tracing::Level::DEBUG),
        temp_dir,
    )
}

/// A multipart form with one field per `(name, filename, content)`.
pub fn multipart_request(fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, content) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match filename {
            Some(filename) => {
                format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n")
            }
            None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n"),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(body: Body) -> Vec<u8> {
    axum::body::to_bytes(body, usize::MAX).await.unwrap().to_vec()
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}
