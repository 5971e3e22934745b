use std::path::PathBuf;

use envconfig::Envconfig;

use crate::address::{KeyParseError, ProgramId};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";
pub const DEFAULT_PROGRAM_ID: &str =
    "66756e646c65646765722d63726f776466756e64696e672d70726f6772616d31";
const APP_DIR: &str = "fundledger";
const KEYPAIR_FILE: &str = "id.hex";

#[derive(Envconfig, Debug, Clone, Default)]
pub struct EnvConfig {
    #[envconfig(from = "FUNDLEDGER_RPC_URL")]
    pub rpc_url: Option<String>,
    #[envconfig(from = "FUNDLEDGER_PROGRAM_ID")]
    pub program_id: Option<String>,
    #[envconfig(from = "FUNDLEDGER_KEYPAIR")]
    pub keypair: Option<PathBuf>,
    #[envconfig(from = "FUNDLEDGER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

/// Command-line values; each one beats its environment counterpart.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub rpc_url: Option<String>,
    pub program_id: Option<String>,
    pub keypair: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub local_ledger: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid program id: {0}")]
    InvalidProgramId(#[from] KeyParseError),
    #[error("cannot locate a configuration directory; set FUNDLEDGER_STATE_DIR")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub rpc_url: String,
    pub program_id: ProgramId,
    pub keypair_path: PathBuf,
    /// Directory holding the fallback snapshot.
    pub state_dir: PathBuf,
    /// Run against a file-backed in-process ledger instead of `rpc_url`.
    pub local_ledger: Option<PathBuf>,
}

impl Config {
    pub fn resolve(env: EnvConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let program_id = overrides
            .program_id
            .or(env.program_id)
            .unwrap_or_else(|| DEFAULT_PROGRAM_ID.to_string())
            .parse()?;

        let state_dir = match overrides.state_dir.or(env.state_dir) {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or(ConfigError::NoConfigDir)?
                .join(APP_DIR),
        };
        let keypair_path = overrides
            .keypair
            .or(env.keypair)
            .unwrap_or_else(|| state_dir.join(KEYPAIR_FILE));

        Ok(Self {
            rpc_url: overrides
                .rpc_url
                .or(env.rpc_url)
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            program_id,
            keypair_path,
            state_dir,
            local_ledger: overrides.local_ledger,
        })
    }
}
