use std::fmt;
use std::future::Future;
use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, instrument};

use crate::{
    BlobCtx, BlobError, BlobProperties, BlobResult, BlobTransport, ClientOptions, ContainerName,
    HttpTransport, RetryPolicy, SharedKeyCredential,
};

/// Longest blob name the service accepts.
const MAX_BLOB_NAME_LEN: usize = 1024;

/// Entry point: holds the transport and retry policy shared by every handle.
///
/// Construction performs no I/O. Credentials are validated when the
/// [`SharedKeyCredential`] is built, before a client can exist.
#[derive(Clone)]
pub struct StorageClient {
    transport: Arc<dyn BlobTransport>,
    retry: RetryPolicy,
}

impl StorageClient {
    /// Client for `https://{account}.{endpoint_suffix}`.
    pub fn new(credential: SharedKeyCredential, options: ClientOptions) -> BlobResult<Self> {
        let endpoint = format!(
            "https://{}.{}",
            credential.account(),
            options.endpoint_suffix
        );
        Self::with_endpoint(&endpoint, credential, options)
    }

    /// Client for an explicit endpoint, e.g. a local emulator.
    pub fn with_endpoint(
        endpoint: &str,
        credential: SharedKeyCredential,
        options: ClientOptions,
    ) -> BlobResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| BlobError::config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BlobError::config(format!(
                "endpoint '{}' must use http or https",
                endpoint
            )));
        }

        debug!(endpoint, account = credential.account(), "creating storage client");
        let transport = HttpTransport::new(url, credential, &options)?;
        Ok(Self {
            transport: Arc::new(transport),
            retry: options.retry,
        })
    }

    /// Client over any transport, with the default retry policy.
    pub fn with_transport(transport: Arc<dyn BlobTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Handle for a container; validates the name, sends nothing.
    pub fn container(&self, name: &str) -> BlobResult<ContainerClient> {
        Ok(ContainerClient {
            transport: self.transport.clone(),
            retry: self.retry.clone(),
            name: ContainerName::parse(name)?,
        })
    }
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Handle for one container
#[derive(Clone)]
pub struct ContainerClient {
    pub(crate) transport: Arc<dyn BlobTransport>,
    pub(crate) retry: RetryPolicy,
    pub(crate) name: ContainerName,
}

impl ContainerClient {
    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Handle for a blob in this container.
    pub fn blob(&self, name: &str) -> BlobResult<BlobClient> {
        if name.is_empty() || name.len() > MAX_BLOB_NAME_LEN {
            return Err(BlobError::invalid(format!(
                "Blob name must be 1-{} characters, got {}",
                MAX_BLOB_NAME_LEN,
                name.len()
            )));
        }
        Ok(BlobClient {
            transport: self.transport.clone(),
            retry: self.retry.clone(),
            container: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Run one service request under the retry policy and the caller's scope.
    pub(crate) async fn call<T, F, Fut>(&self, ctx: &BlobCtx, operation: &str, op: F) -> BlobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BlobResult<T>>,
    {
        ctx.run(self.retry.run(operation, op)).await
    }
}

impl fmt::Debug for ContainerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerClient")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handle for one blob
#[derive(Clone)]
pub struct BlobClient {
    pub(crate) transport: Arc<dyn BlobTransport>,
    pub(crate) retry: RetryPolicy,
    pub(crate) container: ContainerName,
    pub(crate) name: String,
}

impl BlobClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> &ContainerName {
        &self.container
    }

    /// `{container}/{blob}`, for logs and error messages.
    pub fn path(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }

    pub(crate) async fn call<T, F, Fut>(&self, ctx: &BlobCtx, operation: &str, op: F) -> BlobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BlobResult<T>>,
    {
        ctx.run(self.retry.run(operation, op)).await
    }

    #[instrument(skip(self, ctx), fields(blob = %self.path(), request_id = %ctx.request_id))]
    pub async fn get_properties(&self, ctx: &BlobCtx) -> BlobResult<BlobProperties> {
        self.call(ctx, "get_properties", || {
            self.transport.get_properties(&self.container, &self.name)
        })
        .await
        .map_err(|e| not_found_as(e, || self.path()))
    }

    #[instrument(skip(self, ctx), fields(blob = %self.path(), request_id = %ctx.request_id))]
    pub async fn delete(&self, ctx: &BlobCtx) -> BlobResult<()> {
        self.call(ctx, "delete_blob", || {
            self.transport.delete_blob(&self.container, &self.name)
        })
        .await
        .map_err(|e| not_found_as(e, || self.path()))?;
        debug!("blob deleted");
        Ok(())
    }
}

impl fmt::Debug for BlobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobClient")
            .field("container", &self.container)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Report a 404 from the service as `NotFound` for `resource`.
pub(crate) fn not_found_as(err: BlobError, resource: impl FnOnce() -> String) -> BlobError {
    match err {
        BlobError::Service {
            status: 404, code, ..
        } => BlobError::not_found(format!("{} ({})", resource(), code)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, MemoryTransport};

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    #[test]
    fn construction_does_not_touch_the_network() {
        let credential = SharedKeyCredential::new("myaccount", KEY).unwrap();
        let client = StorageClient::new(credential, ClientOptions::default()).unwrap();
        let container = client.container("quickstart-42").unwrap();
        assert_eq!(container.name().as_str(), "quickstart-42");
    }

    #[test]
    fn bad_endpoints_are_configuration_errors() {
        let credential = SharedKeyCredential::new("myaccount", KEY).unwrap();
        let err = StorageClient::with_endpoint("ftp://example", credential, ClientOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn handles_validate_names() {
        let client = StorageClient::with_transport(Arc::new(MemoryTransport::new()));
        assert_eq!(
            client.container("Not_Valid").unwrap_err().kind(),
            ErrorKind::Invalid
        );

        let container = client.container("media").unwrap();
        assert!(container.blob("").is_err());
        assert_eq!(container.blob("a/b.txt").unwrap().path(), "media/a/b.txt");
    }

    #[tokio::test]
    async fn missing_blobs_are_not_found() {
        let memory = Arc::new(MemoryTransport::new());
        let client = StorageClient::with_transport(memory.clone());
        let container = client.container("media").unwrap();
        let ctx = BlobCtx::new();
        container.create(&ctx, Default::default()).await.unwrap();

        let err = container
            .blob("ghost")
            .unwrap()
            .get_properties(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
