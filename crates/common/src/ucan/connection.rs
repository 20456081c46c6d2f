use std::fmt::Debug;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::linked_data::Cid;

use super::{decode_response, encode_request, Invocation, Receipt, UcanError};

/// Content type of ucanto messages on the wire
pub const CAR_CONTENT_TYPE: &str = "application/vnd.ipld.car";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
    #[error("invalid message: {0}")]
    Message(#[from] UcanError),
    #[error("no receipt for invocation {0}")]
    MissingReceipt(Cid),
}

/// Somewhere invocations can be executed.
#[async_trait]
pub trait Connection: Debug + Send + Sync {
    /// Execute one invocation and return its receipt. Whether the receipt
    ///  is `ok` or `error` is for the caller to interpret.
    async fn execute(&self, invocation: &Invocation) -> Result<Receipt, ConnectionError>;
}

/// Posts ucanto messages to a service endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConnection {
    pub remote: Url,
    client: Client,
}

impl HttpConnection {
    pub fn new(remote: &Url) -> Result<Self, ConnectionError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static(CAR_CONTENT_TYPE));
        default_headers.insert(ACCEPT, HeaderValue::from_static(CAR_CONTENT_TYPE));
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn execute(&self, invocation: &Invocation) -> Result<Receipt, ConnectionError> {
        let body = encode_request(std::slice::from_ref(invocation))?;
        let response = self
            .client
            .post(self.remote.clone())
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ConnectionError::HttpStatus(
                response.status(),
                response.text().await?,
            ));
        }

        let bytes = response.bytes().await?;
        let mut receipts = decode_response(&bytes)?;
        receipts
            .remove(invocation.cid())
            .ok_or(ConnectionError::MissingReceipt(*invocation.cid()))
    }
}
