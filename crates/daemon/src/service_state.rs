use std::sync::Arc;

use common::prelude::{HttpConnection, ShardConfig, StorageClient, Uploader, UploaderConfig};
use common::ucan::ConnectionError;

use crate::ServiceConfig;

/// Everything request handlers share. Cheap to clone.
#[derive(Debug, Clone)]
pub struct State {
    uploader: Arc<Uploader>,
}

impl State {
    pub fn new(uploader: Uploader) -> Self {
        Self {
            uploader: Arc::new(uploader),
        }
    }

    pub async fn from_config(config: &ServiceConfig) -> Result<Self, StateError> {
        tokio::fs::create_dir_all(&config.tmp_dir)
            .await
            .map_err(StateError::TmpDir)?;

        let connection = HttpConnection::new(&config.service_url)?;
        tracing::info!(
            service = %config.service_did,
            url = %config.service_url,
            space = %config.space,
            agent = %config.signer.did(),
            "connecting to storage service"
        );

        let client = StorageClient::new(
            Arc::new(config.signer.clone()),
            Arc::new(config.proof.clone()),
            config.space.clone(),
            config.service_did.clone(),
            Arc::new(connection),
        );
        let uploader_config = UploaderConfig {
            tmp_dir: config.tmp_dir.clone(),
            shard: ShardConfig {
                size_limit: config.shard_size,
                ..ShardConfig::default()
            },
            upload_timeout: config.upload_timeout,
            ..UploaderConfig::default()
        };

        Ok(Self::new(Uploader::new(client, uploader_config)))
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to prepare tmp dir: {0}")]
    TmpDir(#[source] std::io::Error),
    #[error("failed to set up service connection: {0}")]
    Connection(#[from] ConnectionError),
}
