use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    BlobProperties, BlobResult, BlockId, ByteRange, ByteStream, ContainerName, ListBlobsOptions,
    ListBlobsSegment, Marker, PublicAccess,
};

/// Wire-level blob service operations - implemented by every transport
///
/// Each method maps to exactly one service request. Retries, cancellation
/// and error classification live in the client layer above.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Create Container
    async fn create_container(
        &self,
        container: &ContainerName,
        access: PublicAccess,
    ) -> BlobResult<()>;

    /// Delete Container, including every blob in it
    async fn delete_container(&self, container: &ContainerName) -> BlobResult<()>;

    /// List Blobs, one segment starting at `marker`
    async fn list_blobs(
        &self,
        container: &ContainerName,
        marker: &Marker,
        options: &ListBlobsOptions,
    ) -> BlobResult<ListBlobsSegment>;

    /// Put Blob: write a whole block blob in one request
    async fn put_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> BlobResult<PutResult>;

    /// Put Block: stage an uncommitted block
    async fn put_block(
        &self,
        container: &ContainerName,
        blob: &str,
        block_id: &BlockId,
        body: Bytes,
    ) -> BlobResult<()>;

    /// Put Block List: commit staged blocks in the given order
    async fn put_block_list(
        &self,
        container: &ContainerName,
        blob: &str,
        blocks: &[BlockId],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult>;

    /// Get Blob for a byte range, optionally pinned to an ETag
    async fn get_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        range: &ByteRange,
        if_match: Option<&str>,
    ) -> BlobResult<GetResult>;

    /// Get Blob Properties
    async fn get_properties(
        &self,
        container: &ContainerName,
        blob: &str,
    ) -> BlobResult<BlobProperties>;

    /// Delete Blob
    async fn delete_blob(&self, container: &ContainerName, blob: &str) -> BlobResult<()>;
}

/// Result of a successful write that produced a committed blob
#[derive(Debug, Clone, Default)]
pub struct PutResult {
    pub etag: Option<String>,
}

/// Result of a get operation
pub struct GetResult {
    pub stream: ByteStream,
    /// Bytes in this response body
    pub content_length: u64,
    /// Size of the whole blob
    pub total_size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl std::fmt::Debug for GetResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetResult")
            .field("content_length", &self.content_length)
            .field("total_size", &self.total_size)
            .field("content_type", &self.content_type)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}
