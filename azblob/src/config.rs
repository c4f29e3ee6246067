use std::time::Duration;

use crate::{BlobError, BlobResult, RetryPolicy};

/// Largest block the service accepts in a single Put Block.
pub const MAX_BLOCK_SIZE: u64 = 4000 * 1024 * 1024;

/// Largest payload the service accepts in one Put Blob request.
pub const MAX_SINGLE_PUT_SIZE: u64 = 5000 * 1024 * 1024;

/// Largest number of blocks a committed block list may reference.
pub const MAX_BLOCKS: usize = 50_000;

/// Configuration for the storage client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Host suffix appended to the account name (`{account}.{suffix}`)
    pub endpoint_suffix: String,

    /// Value sent in `x-ms-version`
    pub api_version: String,

    /// Per-request timeout of the HTTP client
    pub request_timeout: Duration,

    /// Retry policy for every service request issued through the client
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint_suffix: "blob.core.windows.net".to_string(),
            api_version: "2020-10-02".to_string(),
            request_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.endpoint_suffix = suffix.into();
        self
    }

    pub fn with_api_version<S: Into<String>>(mut self, version: S) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Tuning knobs for the block upload workflow
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Size of each staged block (bytes). The final block may be shorter.
    pub block_size: u64,

    /// Number of blocks staged concurrently
    pub parallelism: usize,

    /// Payloads up to this size are written with a single Put Blob
    pub single_put_threshold: u64,

    /// Upper bound on blocks per blob
    pub max_blocks: usize,

    /// Content type recorded on the committed blob
    pub content_type: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024 * 1024,              // 4MB
            parallelism: 16,
            single_put_threshold: 256 * 1024 * 1024, // 256MB
            max_blocks: MAX_BLOCKS,
            content_type: None,
        }
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    pub fn with_single_put_threshold(mut self, bytes: u64) -> Self {
        self.single_put_threshold = bytes;
        self
    }

    pub fn with_max_blocks(mut self, max: usize) -> Self {
        self.max_blocks = max;
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub(crate) fn validate(&self) -> BlobResult<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(BlobError::invalid(format!(
                "Block size {} must be between 1 and {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.parallelism == 0 {
            return Err(BlobError::invalid("Parallelism must be at least 1"));
        }
        if self.single_put_threshold > MAX_SINGLE_PUT_SIZE {
            return Err(BlobError::invalid(format!(
                "Single put threshold {} exceeds {}",
                self.single_put_threshold, MAX_SINGLE_PUT_SIZE
            )));
        }
        if self.max_blocks == 0 || self.max_blocks > MAX_BLOCKS {
            return Err(BlobError::invalid(format!(
                "Max blocks {} must be between 1 and {}",
                self.max_blocks, MAX_BLOCKS
            )));
        }
        Ok(())
    }
}

/// Options for the self-healing download body
#[derive(Debug, Clone)]
pub struct RetryReaderOptions {
    /// How many times a dropped body stream may be re-requested
    pub max_retry_requests: u32,
}

impl Default for RetryReaderOptions {
    fn default() -> Self {
        Self {
            max_retry_requests: 20,
        }
    }
}

impl RetryReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retry_requests(mut self, retries: u32) -> Self {
        self.max_retry_requests = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_defaults_match_quickstart_tuning() {
        let options = UploadOptions::default();
        assert_eq!(options.block_size, 4 * 1024 * 1024);
        assert_eq!(options.parallelism, 16);
        assert_eq!(options.single_put_threshold, 256 * 1024 * 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn invalid_upload_knobs_are_rejected() {
        assert!(UploadOptions::new().with_block_size(0).validate().is_err());
        assert!(UploadOptions::new().with_parallelism(0).validate().is_err());
        assert!(UploadOptions::new()
            .with_block_size(MAX_BLOCK_SIZE + 1)
            .validate()
            .is_err());
        assert!(UploadOptions::new().with_max_blocks(0).validate().is_err());
        assert!(UploadOptions::new()
            .with_single_put_threshold(MAX_SINGLE_PUT_SIZE + 1)
            .validate()
            .is_err());
    }
}
