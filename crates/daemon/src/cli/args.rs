pub use clap::Parser;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use common::prelude::{Delegation, Did, Signer};
use common::shard::DEFAULT_SHARD_SIZE;
use common::w3up::{DEFAULT_SERVICE_DID, DEFAULT_SERVICE_URL};
use w3s_uploader::ServiceConfig;

/// Space uploads land in unless told otherwise
pub const DEFAULT_SPACE_DID: &str = "did:key:z6Mkv4YhtLqTKWis8KfLWGhUEcHFPYgH97BrCZia7xsUxMWj";

#[derive(Parser, Debug)]
#[command(name = "w3s-uploader", version)]
#[command(about = "Archive HTTP uploads to web3.storage")]
pub struct Args {
    /// Agent signing key, multibase encoded (as printed by `w3 key create`)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Delegation from the space to the agent, as hex encoded archive bytes
    #[arg(long, env = "PROOF", hide_env_values = true)]
    pub proof: String,

    /// Space to store uploads in
    #[arg(long = "space", env = "SPACE_DID", default_value = DEFAULT_SPACE_DID)]
    pub space: Did,

    #[arg(long, env = "SERVICE_URL", default_value = DEFAULT_SERVICE_URL)]
    pub service_url: Url,

    #[arg(long, env = "SERVICE_DID", default_value = DEFAULT_SERVICE_DID)]
    pub service_did: Did,

    /// Port the upload API listens on
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory for per-upload temp files (defaults to the system temp dir)
    #[arg(long, env = "TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Largest archive, in bytes, sent as a single shard
    #[arg(long, env = "SHARD_SIZE", default_value_t = DEFAULT_SHARD_SIZE)]
    pub shard_size: u64,

    /// Abandon uploads that take longer than this many seconds
    #[arg(long, env = "UPLOAD_TIMEOUT_SECS")]
    pub upload_timeout_secs: Option<u64>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Args {
    pub fn into_config(self) -> anyhow::Result<ServiceConfig> {
        let signer = Signer::parse(self.private_key.trim()).context("invalid private key")?;
        let proof = Delegation::from_hex(self.proof.trim()).context("invalid proof")?;
        anyhow::ensure!(self.shard_size > 0, "shard size must be positive");

        Ok(ServiceConfig {
            signer,
            proof,
            space: self.space,
            service_url: self.service_url,
            service_did: self.service_did,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            tmp_dir: self.tmp_dir.unwrap_or_else(std::env::temp_dir),
            shard_size: self.shard_size,
            upload_timeout: self.upload_timeout_secs.map(Duration::from_secs),
            log_level: self.log_level,
        })
    }
}
