use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use common::prelude::{Delegation, Did, Signer};

#[derive(Debug, Clone)]
pub struct Config {
    // identity
    /// key our invocations are signed with
    pub signer: Signer,
    /// delegation from the space to `signer`,
    ///  attached to every invocation as its proof
    pub proof: Delegation,
    /// the space uploads are stored in
    pub space: Did,

    // remote service
    /// endpoint ucanto messages are posted to
    pub service_url: Url,
    /// audience of every invocation
    pub service_did: Did,

    // http server configuration
    pub listen_addr: SocketAddr,

    // pipeline configuration
    /// directory holding per-upload temp files,
    ///  created on startup if missing
    pub tmp_dir: PathBuf,
    /// largest archive sent as a single shard
    pub shard_size: u64,
    /// deadline for a whole upload, none if not set
    pub upload_timeout: Option<Duration>,

    // logging
    pub log_level: tracing::Level,
}

impl Config {
    /// Ways the proof does not fit the signer or the space.
    ///
    /// Not fatal: the service rejects whatever the proof fails to cover.
    pub fn proof_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.proof.audience() != self.signer.did() {
            warnings.push(format!(
                "proof is delegated to {}, not to the signing key {}",
                self.proof.audience(),
                self.signer.did()
            ));
        }
        if !self
            .proof
            .capabilities()
            .iter()
            .any(|c| c.with == self.space.as_str())
        {
            warnings.push(format!(
                "proof grants no capability on space {}",
                self.space
            ));
        }
        warnings
    }
}
