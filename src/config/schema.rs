use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::content::{DEFAULT_COPY_CHUNK, DEFAULT_MAX_BODY_BYTES};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The external worker's well-known identity: the command line the gateway
/// spawns one instance of per message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_copy_chunk_bytes")]
    pub copy_chunk_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// Where processed messages are written; rewritten in place when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            copy_chunk_bytes: default_copy_chunk_bytes(),
            max_body_bytes: default_max_body_bytes(),
            spool_dir: default_spool_dir(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log file path; stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_copy_chunk_bytes() -> usize {
    DEFAULT_COPY_CHUNK
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}
