//! The upload pipeline
//!
//! One call to [`Uploader::upload`] runs every stage for one input:
//!
//! 1. materialize the stream into `<tmp_dir>/<random>`
//! 2. build the UnixFS DAG into `<tmp_dir>/<random>.car`, then finalize
//!    the archive with the real root
//! 3. shard the archive lazily and register each shard (`store/add`,
//!    plus a PUT when the service asks for the bytes)
//! 4. `upload/add` the root with every shard
//!
//! Both temp files are removed on every exit path, including when the
//!  upload future is dropped part way through.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};

use crate::car::{CarError, CarWriter};
use crate::linked_data::{placeholder_root, Cid};
use crate::shard::{ShardConfig, ShardError, Sharder};
use crate::unixfs::{build_file, BuildError, ChunkerConfig};
use crate::w3up::{StorageClient, W3upError};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed saving into tmp: {0}")]
    Materialize(#[source] io::Error),
    #[error("failed creating archive: {0}")]
    CreateArchive(#[source] CarError),
    #[error("failed generating dag: {0}")]
    Build(#[from] BuildError),
    #[error("failed finalizing archive: {0}")]
    Finalize(#[source] CarError),
    #[error("failed sharding archive: {0}")]
    Shard(#[from] ShardError),
    #[error("failed registering shard {shard}: {source}")]
    StoreAdd {
        shard: Cid,
        #[source]
        source: W3upError,
    },
    #[error("failed registering upload: {0}")]
    UploadAdd(#[source] W3upError),
    #[error("upload timed out after {0:?}")]
    TimedOut(Duration),
    #[error("upload cancelled")]
    Cancelled,
    #[error("failed removing tmp files: {0}")]
    Cleanup(#[source] io::Error),
}

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Where per-upload temp files are created
    pub tmp_dir: PathBuf,
    pub chunker: ChunkerConfig,
    pub shard: ShardConfig,
    /// Deadline for a whole upload, if any
    pub upload_timeout: Option<Duration>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            chunker: ChunkerConfig::default(),
            shard: ShardConfig::default(),
            upload_timeout: None,
        }
    }
}

/// Content root of an upload and the shards holding it, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub root: Cid,
    pub shards: Vec<Cid>,
}

impl UploadResult {
    /// The first shard; the only one for anything under the shard size.
    pub fn shard(&self) -> Option<&Cid> {
        self.shards.first()
    }
}

#[derive(Debug, Clone)]
pub struct Uploader {
    client: StorageClient,
    config: UploaderConfig,
}

impl Uploader {
    pub fn new(client: StorageClient, config: UploaderConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Upload everything `stream` yields, honoring the configured timeout.
    pub async fn upload<S>(&self, stream: S) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        match self.config.upload_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run(stream))
                .await
                .map_err(|_| UploadError::TimedOut(timeout))?,
            None => self.run(stream).await,
        }
    }

    /// Like [`Uploader::upload`], but abandon the upload as soon as
    ///  `cancel` completes. Temp files are still removed.
    pub async fn upload_until<S, C>(&self, stream: S, cancel: C) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
        C: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.upload(stream) => result,
            _ = cancel => {
                tracing::info!("upload cancelled");
                Err(UploadError::Cancelled)
            }
        }
    }

    async fn run<S>(&self, stream: S) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let artifacts = TempArtifacts::new(&self.config.tmp_dir);
        let result = self.pipeline(&artifacts, stream).await;
        settle(result, artifacts.cleanup().await)
    }

    async fn pipeline<S>(
        &self,
        artifacts: &TempArtifacts,
        stream: S,
    ) -> Result<UploadResult, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let size = materialize(&artifacts.data, stream)
            .await
            .map_err(UploadError::Materialize)?;
        tracing::info!(path = %artifacts.data.display(), size, "saved upload to tmp");

        let root = self.create_car(artifacts).await?;
        tracing::info!(%root, "generated archive");

        let mut sharder = Sharder::open(&artifacts.car, self.config.shard).await?;
        let mut shards = Vec::new();
        while let Some(shard) = sharder.next_shard().await? {
            let state = self
                .client
                .register_shard(&shard)
                .await
                .map_err(|source| UploadError::StoreAdd {
                    shard: *shard.cid(),
                    source,
                })?;
            tracing::info!(
                shard = %shard.cid(),
                index = shard.index(),
                size = shard.size(),
                state = state.name(),
                "registered shard"
            );
            shards.push(*shard.cid());
        }

        self.client
            .upload_add(&root, &shards)
            .await
            .map_err(UploadError::UploadAdd)?;
        tracing::info!(%root, shards = shards.len(), "upload added");

        Ok(UploadResult { root, shards })
    }

    /// Build the DAG from the materialized input straight into an archive
    ///  opened with a placeholder root, then patch in the real root.
    async fn create_car(&self, artifacts: &TempArtifacts) -> Result<Cid, UploadError> {
        let input = File::open(&artifacts.data)
            .await
            .map_err(UploadError::Materialize)?;
        let mut writer = CarWriter::create(&artifacts.car, vec![placeholder_root()])
            .await
            .map_err(UploadError::CreateArchive)?;

        let root = build_file(BufReader::new(input), &mut writer, &self.config.chunker).await?;
        let finalized = writer
            .finalize(root.cid)
            .await
            .map_err(UploadError::Finalize)?;
        tracing::debug!(
            root = %finalized.root,
            size = finalized.size,
            blocks = finalized.blocks,
            "finalized archive"
        );
        Ok(root.cid)
    }
}

/// A cleanup failure is only reported when the upload itself succeeded;
///  otherwise the pipeline error wins and the cleanup failure is just logged.
fn settle(
    result: Result<UploadResult, UploadError>,
    cleanup: io::Result<()>,
) -> Result<UploadResult, UploadError> {
    match (result, cleanup) {
        (Ok(_), Err(e)) => Err(UploadError::Cleanup(e)),
        (result, _) => result,
    }
}

/// Copy `stream` into a new file at `path`, returning the byte count.
async fn materialize<S>(path: &Path, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(size)
}

/// The two temp files of one upload.
///
/// [`TempArtifacts::cleanup`] removes them on normal exit; `Drop` covers an
///  upload future dropped mid-flight.
#[derive(Debug)]
struct TempArtifacts {
    data: PathBuf,
    car: PathBuf,
    cleaned: bool,
}

impl TempArtifacts {
    fn new(tmp_dir: &Path) -> Self {
        let name = hex::encode(rand::random::<[u8; 16]>());
        let data = tmp_dir.join(&name);
        let car = tmp_dir.join(format!("{name}.car"));
        Self {
            data,
            car,
            cleaned: false,
        }
    }

    /// Remove both files, returning the first failure other than a
    ///  missing file.
    async fn cleanup(mut self) -> io::Result<()> {
        self.cleaned = true;
        let mut result = Ok(());
        for path in [&self.data, &self.car] {
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "failed to remove tmp file");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        for path in [&self.data, &self.car] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "failed to remove tmp file");
                }
            }
        }
    }
}
