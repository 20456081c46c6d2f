//! Integration tests for the upload pipeline against a mock service

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ::common::car;
use ::common::linked_data::{Cid, MemoryBlockStore};
use ::common::prelude::*;
use ::common::w3up::{W3upError, STORE_ADD, UPLOAD_ADD};

use crate::common::{MockService, StoreBehavior};

#[tokio::test]
async fn test_hello_already_stored() {
    let service = Arc::new(MockService::new(StoreBehavior::Done));
    let (uploader, ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let result = uploader
        .upload(common::byte_stream(b"Hello", 2))
        .await
        .unwrap();

    assert_eq!(result.root.to_string(), common::HELLO_ROOT);
    assert_eq!(result.shard().unwrap().to_string(), common::HELLO_SHARD);
    assert_eq!(result.shards.len(), 1);

    let calls = service.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].can, STORE_ADD);
    assert_eq!(calls[0].with, ids.space.did().to_string());
    assert_eq!(calls[0].link("link").to_string(), common::HELLO_SHARD);
    assert_eq!(calls[0].size(), common::HELLO_SHARD_SIZE);
    assert_eq!(calls[0].proofs, vec![*ids.proof.cid()]);

    assert_eq!(calls[1].can, UPLOAD_ADD);
    assert_eq!(calls[1].link("root"), result.root);
    assert_eq!(calls[1].links("shards"), result.shards);

    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_already_stored_never_transfers() {
    let target = Arc::new(MockServer::start().await);
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&target)
        .await;

    let service = Arc::new(MockService::new(StoreBehavior::Done).watching(target.clone()));
    let (uploader, _ids, _temp) = common::setup_uploader(service.clone(), |_| {});

    uploader
        .upload(common::byte_stream(&common::test_data(10_000, 1), 1024))
        .await
        .unwrap();

    assert!(target.received_requests().await.unwrap().is_empty());
    assert_eq!(service.calls_to(UPLOAD_ADD).len(), 1);
}

#[tokio::test]
async fn test_upload_status_transfers_once_before_upload_add() {
    let target = Arc::new(MockServer::start().await);
    let expected = car::encode(
        vec![common::HELLO_ROOT.parse().unwrap()],
        &[Block::new(::common::linked_data::RAW_CODEC, &b"Hello"[..])],
    )
    .unwrap();
    Mock::given(method("PUT"))
        .and(path("/shard"))
        .and(header("x-amz-checksum-sha256", "abc="))
        .and(header("content-length", "101"))
        .and(body_bytes(expected.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&target)
        .await;

    let headers = BTreeMap::from([
        ("x-amz-checksum-sha256".to_string(), "abc=".to_string()),
        // must not be forwarded as is
        ("Content-Length".to_string(), "7".to_string()),
    ]);
    let service = Arc::new(
        MockService::new(StoreBehavior::Upload {
            url: format!("{}/shard", target.uri()),
            headers,
        })
        .watching(target.clone()),
    );
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let result = uploader
        .upload(common::byte_stream(b"Hello", 5))
        .await
        .unwrap();
    assert_eq!(result.shard().unwrap().to_string(), common::HELLO_SHARD);

    let store = service.calls_to(STORE_ADD);
    let upload = service.calls_to(UPLOAD_ADD);
    assert_eq!(store[0].transfers_before, 0);
    assert_eq!(upload[0].transfers_before, 1);

    let received = target.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, expected);
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_failed_transfer_is_fatal() {
    let target = Arc::new(MockServer::start().await);
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
        .expect(1)
        .mount(&target)
        .await;

    let service = Arc::new(MockService::new(StoreBehavior::Upload {
        url: format!("{}/shard", target.uri()),
        headers: BTreeMap::new(),
    }));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let err = uploader
        .upload(common::byte_stream(b"Hello", 5))
        .await
        .unwrap_err();

    match err {
        UploadError::StoreAdd {
            source: W3upError::TransferStatus(status, body),
            ..
        } => {
            assert_eq!(status.as_u16(), 403);
            assert_eq!(body, "signature expired");
        }
        other => panic!("unexpected error: {other}"),
    }
    // no retry and no upload/add
    assert!(service.calls_to(UPLOAD_ADD).is_empty());
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_store_add_error_is_verbatim() {
    let message = "Space did:key:z6Mk... has no storage provider";
    let service = Arc::new(MockService::new(StoreBehavior::Fail(message.to_string())));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let err = uploader
        .upload(common::byte_stream(b"Hello", 5))
        .await
        .unwrap_err();

    match &err {
        UploadError::StoreAdd {
            source: W3upError::Receipt { capability, message: got },
            shard,
        } => {
            assert_eq!(*capability, STORE_ADD);
            assert_eq!(got, message);
            assert_eq!(shard.to_string(), common::HELLO_SHARD);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains(message));
    assert!(service.calls_to(UPLOAD_ADD).is_empty());
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_upload_add_error_is_verbatim() {
    let service =
        Arc::new(MockService::new(StoreBehavior::Done).failing_upload_add("upload quota exceeded"));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let err = uploader
        .upload(common::byte_stream(b"Hello", 5))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        UploadError::UploadAdd(W3upError::Receipt { message, .. }) if message == "upload quota exceeded"
    ));
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_multi_shard_round_trip() {
    let target = Arc::new(MockServer::start().await);
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&target)
        .await;

    let service = Arc::new(MockService::new(StoreBehavior::Upload {
        url: format!("{}/shard", target.uri()),
        headers: BTreeMap::new(),
    }));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |config| {
        config.chunker = ChunkerConfig {
            chunk_size: 1024,
            max_links: 4,
        };
        config.shard = ShardConfig {
            size_limit: 4096,
            ..ShardConfig::default()
        };
    });

    let data = common::test_data(40_000, 7);
    let result = uploader
        .upload(common::byte_stream(&data, 3000))
        .await
        .unwrap();
    assert!(result.shards.len() > 1);

    // one store/add per shard, in order, then one upload/add listing them
    let store = service.calls_to(STORE_ADD);
    let stored: Vec<Cid> = store.iter().map(|c| c.link("link")).collect();
    assert_eq!(stored, result.shards);
    assert_eq!(service.calls_to(UPLOAD_ADD)[0].links("shards"), result.shards);

    // every transferred shard is a standalone archive; together they hold the file
    let received = target.received_requests().await.unwrap();
    assert_eq!(received.len(), result.shards.len());
    let mut blocks = MemoryBlockStore::new();
    for (i, request) in received.iter().enumerate() {
        assert!(request.body.len() as u64 <= 4096);
        assert_eq!(request.body.len() as u64, store[i].size());
        let (header, shard_blocks) = car::decode(&request.body).unwrap();
        if i + 1 == received.len() {
            assert_eq!(header.roots, vec![result.root]);
        } else {
            assert!(header.roots.is_empty());
        }
        for block in shard_blocks {
            blocks.put(block).await.unwrap();
        }
    }
    let rebuilt = read_file(&result.root, &mut blocks).await.unwrap();
    assert_eq!(rebuilt, data);
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_empty_input() {
    let service = Arc::new(MockService::new(StoreBehavior::Done));
    let (uploader, _ids, _temp) = common::setup_uploader(service, |_| {});

    let result = uploader
        .upload(common::byte_stream(b"", 1))
        .await
        .unwrap();
    // raw leaf over zero bytes
    assert_eq!(
        result.root.to_string(),
        "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
    );
    assert_eq!(result.shards.len(), 1);
}

#[tokio::test]
async fn test_stream_error_leaves_nothing_behind() {
    let service = Arc::new(MockService::new(StoreBehavior::Done));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let stream = futures::stream::iter(vec![
        Ok(bytes::Bytes::from_static(b"partial")),
        Err(std::io::Error::other("connection reset")),
    ]);
    let err = uploader.upload(stream).await.unwrap_err();

    assert!(matches!(err, UploadError::Materialize(_)));
    assert!(service.calls().is_empty());
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_timeout_cleans_up() {
    let service = Arc::new(MockService::new(StoreBehavior::Hang));
    let (uploader, _ids, temp) = common::setup_uploader(service, |config| {
        config.upload_timeout = Some(Duration::from_millis(200));
    });

    let err = uploader
        .upload(common::byte_stream(b"Hello", 5))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::TimedOut(_)));
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_cancel_cleans_up() {
    let service = Arc::new(MockService::new(StoreBehavior::Hang));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |_| {});

    let err = uploader
        .upload_until(
            common::byte_stream(b"Hello", 5),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    // the pipeline got as far as registering before it was cut off
    assert_eq!(service.calls_to(STORE_ADD).len(), 1);
    assert!(common::dir_is_empty(temp.path()));
}

#[tokio::test]
async fn test_concurrent_uploads_do_not_interfere() {
    let service = Arc::new(MockService::new(StoreBehavior::Done));
    let (uploader, _ids, temp) = common::setup_uploader(service.clone(), |config| {
        config.chunker = ChunkerConfig {
            chunk_size: 512,
            max_links: 8,
        };
    });
    let uploader = Arc::new(uploader);

    let mut handles = Vec::new();
    for seed in 0..8u8 {
        let uploader = uploader.clone();
        handles.push(tokio::spawn(async move {
            let data = common::test_data(5_000 + seed as usize * 10, seed);
            let result = uploader
                .upload(common::byte_stream(&data, 700))
                .await
                .unwrap();
            (data, result)
        }));
    }

    let mut roots = Vec::new();
    for handle in handles {
        let (data, result) = handle.await.unwrap();
        // same root as building the content on its own
        let mut store = MemoryBlockStore::new();
        let expected = build_file(
            &data[..],
            &mut store,
            &ChunkerConfig {
                chunk_size: 512,
                max_links: 8,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.root, expected.cid);
        roots.push(result.root);
    }
    roots.sort();
    roots.dedup();
    assert_eq!(roots.len(), 8);
    assert_eq!(service.calls_to(UPLOAD_ADD).len(), 8);
    assert!(common::dir_is_empty(temp.path()));
}
