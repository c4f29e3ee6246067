use std::fmt;
use std::path::{Path, PathBuf};

use azblob::BlobError;
use serde::Deserialize;

/// Contents of `credentials.json`
#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub azure_storage_account_name: String,
    #[serde(default)]
    pub azure_storage_access_key: String,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, BlobError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BlobError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        let credentials: Self = serde_json::from_str(raw)
            .map_err(|e| BlobError::config(format!("credentials are not valid JSON: {}", e)))?;

        if credentials.azure_storage_account_name.trim().is_empty()
            || credentials.azure_storage_access_key.trim().is_empty()
        {
            return Err(BlobError::config(
                "Either azure_storage_account_name or azure_storage_access_key is empty",
            ));
        }
        Ok(credentials)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("azure_storage_account_name", &self.azure_storage_account_name)
            .field("azure_storage_access_key", &"<redacted>")
            .finish()
    }
}

/// Run settings, each overridable from the environment
#[derive(Debug, Clone)]
pub struct QuickstartConfig {
    pub credentials_file: PathBuf,
    /// Explicit service endpoint, e.g. a local emulator
    pub endpoint: Option<String>,
    /// Directory the sample file is written to
    pub work_dir: PathBuf,
    pub block_size: u64,
    pub parallelism: usize,
    pub max_retry_requests: u32,
}

impl QuickstartConfig {
    pub fn from_env() -> Self {
        Self {
            credentials_file: env_var_or("AZBLOB_CREDENTIALS_FILE", "credentials.json".to_string())
                .into(),
            endpoint: std::env::var("AZBLOB_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            work_dir: env_var_or("AZBLOB_WORK_DIR", ".".to_string()).into(),
            block_size: env_var_or("AZBLOB_BLOCK_SIZE", 4 * 1024 * 1024),
            parallelism: env_var_or("AZBLOB_PARALLELISM", 16),
            max_retry_requests: env_var_or("AZBLOB_MAX_RETRY_REQUESTS", 20),
        }
    }
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Debug,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}
