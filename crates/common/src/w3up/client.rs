use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::linked_data::Cid;
use crate::shard::Shard;
use crate::ucan::{Capability, Connection, Delegation, Did, Invocation, Signer};

use super::{
    ShardState, StoreAddCaveats, StoreAddOk, UploadAddCaveats, UploadAddOk, W3upError, STORE_ADD,
    UPLOAD_ADD,
};

/// Endpoint of the public w3up service
pub const DEFAULT_SERVICE_URL: &str = "https://up.web3.storage";
/// Identity of the public w3up service
pub const DEFAULT_SERVICE_DID: &str = "did:web:web3.storage";

/// Invokes storage capabilities on a space, on behalf of a signer that
///  holds a delegation for it.
///
/// Everything inside is read-only and shared, so one client serves any
///  number of concurrent uploads.
#[derive(Debug, Clone)]
pub struct StorageClient {
    signer: Arc<Signer>,
    proof: Arc<Delegation>,
    space: Did,
    service: Did,
    connection: Arc<dyn Connection>,
    http: Client,
}

impl StorageClient {
    pub fn new(
        signer: Arc<Signer>,
        proof: Arc<Delegation>,
        space: Did,
        service: Did,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            signer,
            proof,
            space,
            service,
            connection,
            http: Client::new(),
        }
    }

    /// Use a specific client for shard transfers.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn space(&self) -> &Did {
        &self.space
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Drive one shard from `Registering` to a terminal state.
    pub async fn register_shard(&self, shard: &Shard) -> Result<ShardState, W3upError> {
        let mut state = ShardState::Registering;
        loop {
            tracing::debug!(shard = %shard.cid(), state = state.name(), "shard state");
            state = match state {
                ShardState::Registering => {
                    let ok = self.store_add(shard.cid(), shard.size()).await?;
                    ShardState::Registering.on_store_add(ok)?
                }
                ShardState::AwaitingUpload { ref url, ref headers } => {
                    self.transfer(url, headers, shard.bytes().clone()).await?;
                    state.on_transfer_complete()?
                }
                terminal => return Ok(terminal),
            };
        }
    }

    /// Invoke `store/add` for an archive of `size` bytes.
    pub async fn store_add(&self, link: &Cid, size: u64) -> Result<StoreAddOk, W3upError> {
        self.invoke(STORE_ADD, &StoreAddCaveats { link: *link, size })
            .await
    }

    /// Invoke `upload/add`, tying `root` to its shards in order.
    pub async fn upload_add(&self, root: &Cid, shards: &[Cid]) -> Result<UploadAddOk, W3upError> {
        self.invoke(
            UPLOAD_ADD,
            &UploadAddCaveats {
                root: *root,
                shards: shards.to_vec(),
            },
        )
        .await
    }

    /// PUT `body` to `url` with the headers the service asked for.
    ///
    /// `content-length` is always computed from `body`, whatever the
    ///  service sent. Any non-2xx status fails the transfer.
    pub async fn transfer(
        &self,
        url: &Url,
        headers: &BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<(), W3upError> {
        let size = body.len();
        let response = self
            .http
            .put(url.clone())
            .headers(transfer_headers(headers)?)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(W3upError::TransferStatus(status, text));
        }
        tracing::debug!(%url, size, "shard transferred");
        Ok(())
    }

    async fn invoke<N, T>(&self, can: &'static str, nb: &N) -> Result<T, W3upError>
    where
        N: Serialize + Sync,
        T: DeserializeOwned,
    {
        let capability = Capability::new(can, self.space.as_str(), nb)?;
        let invocation =
            Invocation::issue(&self.signer, &self.service, capability, &[self.proof.as_ref()])?;
        let receipt = self.connection.execute(&invocation).await?;

        match receipt.into_result::<T>() {
            Ok(ok) => Ok(ok?),
            Err(failure) => Err(W3upError::Receipt {
                capability: can,
                message: failure.message,
            }),
        }
    }
}

fn transfer_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, W3upError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| W3upError::InvalidHeader(format!("{name}: {e}")))?;
        if name == CONTENT_LENGTH {
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| W3upError::InvalidHeader(format!("{name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
