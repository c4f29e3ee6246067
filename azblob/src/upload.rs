//! Block blob upload workflow.
//!
//! Small payloads go up in a single Put Blob. Larger ones are split into
//! ordered blocks, staged concurrently by a bounded worker pool, and made
//! visible by one Put Block List carrying the ids in byte order. Nothing is
//! committed unless every block was staged.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    block_count, plan_blocks, BlobClient, BlobCtx, BlobError, BlobResult, BlockId, BlockSpan,
    UploadOptions,
};

/// Outcome of a committed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub container: String,
    pub blob: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
    /// Number of committed blocks; zero for a single Put Blob
    pub blocks: u32,
}

/// Externally observable state of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    InFlight,
    Committed,
    Failed,
}

struct Progress<'a> {
    blob: &'a BlobClient,
    state: UploadState,
}

impl<'a> Progress<'a> {
    fn new(blob: &'a BlobClient) -> Self {
        Self {
            blob,
            state: UploadState::Idle,
        }
    }

    fn advance(&mut self, next: UploadState) {
        debug!(blob = %self.blob.path(), from = ?self.state, to = ?next, "upload state");
        self.state = next;
    }

    /// Record the failure and normalize it: cancellation stays `Cancelled`,
    /// anything else becomes `UploadFailed`.
    fn fail(&mut self, err: BlobError) -> BlobError {
        self.advance(UploadState::Failed);
        match err {
            BlobError::Cancelled => {
                warn!(blob = %self.blob.path(), "upload cancelled, nothing committed");
                BlobError::Cancelled
            }
            err @ BlobError::UploadFailed { .. } => err,
            err @ BlobError::Invalid { .. } => err,
            other => BlobError::upload_failed(format!("upload of {} failed", self.blob.path()), other),
        }
    }
}

impl BlobClient {
    /// Upload an in-memory payload.
    pub async fn upload_bytes(
        &self,
        ctx: &BlobCtx,
        data: Bytes,
        options: &UploadOptions,
    ) -> BlobResult<UploadReceipt> {
        let size = data.len() as u64;
        self.upload_reader(ctx, std::io::Cursor::new(data), size, options)
            .await
    }

    /// Upload the remaining contents of a file the caller opened.
    ///
    /// The file is read from its current position to its end; the caller
    /// keeps ownership of the path and closes nothing here beyond the handle.
    pub async fn upload_file(
        &self,
        ctx: &BlobCtx,
        mut file: tokio::fs::File,
        options: &UploadOptions,
    ) -> BlobResult<UploadReceipt> {
        use tokio::io::AsyncSeekExt;

        let len = file.metadata().await?.len();
        let position = file.stream_position().await?;
        let size = len.saturating_sub(position);
        self.upload_reader(ctx, file, size, options).await
    }

    /// Upload exactly `size` bytes read from `reader`.
    #[instrument(skip(self, ctx, reader, options), fields(blob = %self.path(), request_id = %ctx.request_id))]
    pub async fn upload_reader<R>(
        &self,
        ctx: &BlobCtx,
        mut reader: R,
        size: u64,
        options: &UploadOptions,
    ) -> BlobResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send,
    {
        options.validate()?;
        let mut progress = Progress::new(self);

        if size <= options.single_put_threshold {
            let body = read_span(&mut reader, size)
                .await
                .map_err(|e| progress.fail(e))?;

            progress.advance(UploadState::InFlight);
            let content_type = options.content_type.as_deref();
            let put = self
                .call(ctx, "put_blob", || {
                    self.transport
                        .put_blob(&self.container, &self.name, body.clone(), content_type)
                })
                .await
                .map_err(|e| progress.fail(e))?;

            progress.advance(UploadState::Committed);
            info!(size, "blob uploaded in a single request");
            return Ok(self.receipt(size, put.etag, 0));
        }

        let count = block_count(size, options.block_size);
        if count > options.max_blocks as u64 {
            return Err(BlobError::invalid(format!(
                "{} bytes in blocks of {} needs {} blocks, more than the limit of {}",
                size, options.block_size, count, options.max_blocks
            )));
        }
        let spans = plan_blocks(size, options.block_size);

        let upload_id = Uuid::new_v4().simple().to_string();
        let ids: Vec<BlockId> = spans
            .iter()
            .map(|span| BlockId::new(&upload_id, span.index))
            .collect();

        progress.advance(UploadState::InFlight);
        info!(
            size,
            blocks = spans.len(),
            block_size = options.block_size,
            parallelism = options.parallelism,
            "staging blocks"
        );

        ctx.run(self.stage_blocks(&mut reader, &spans, &ids, options.parallelism))
            .await
            .map_err(|e| progress.fail(e))?;

        let content_type = options.content_type.as_deref();
        let put = self
            .call(ctx, "put_block_list", || {
                self.transport
                    .put_block_list(&self.container, &self.name, &ids, content_type)
            })
            .await
            .map_err(|e| progress.fail(e))?;

        progress.advance(UploadState::Committed);
        info!(size, blocks = ids.len(), "block list committed");
        Ok(self.receipt(size, put.etag, ids.len() as u32))
    }

    /// Stage every block with at most `parallelism` requests in flight.
    ///
    /// Blocks are read from `reader` in order, one permit ahead of the
    /// workers. The first failed block ends staging; dropping the task set
    /// aborts the blocks still in flight.
    async fn stage_blocks<R>(
        &self,
        reader: &mut R,
        spans: &[BlockSpan],
        ids: &[BlockId],
        parallelism: usize,
    ) -> BlobResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut tasks = JoinSet::new();

        for (span, id) in spans.iter().zip(ids) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BlobError::upload_failed("worker pool closed", BlobError::transport(e)))?;

            while let Some(done) = tasks.try_join_next() {
                block_finished(done)?;
            }

            let data = read_span(reader, span.len).await?;
            let transport = self.transport.clone();
            let retry = self.retry.clone();
            let container = self.container.clone();
            let name = self.name.clone();
            let id = id.clone();
            let index = span.index;

            tasks.spawn(async move {
                let _permit = permit;
                let result = retry
                    .run("put_block", || {
                        transport.put_block(&container, &name, &id, data.clone())
                    })
                    .await;
                (index, result)
            });
        }

        while let Some(done) = tasks.join_next().await {
            block_finished(done)?;
        }
        Ok(())
    }

    fn receipt(&self, size_bytes: u64, etag: Option<String>, blocks: u32) -> UploadReceipt {
        UploadReceipt {
            container: self.container.to_string(),
            blob: self.name.clone(),
            size_bytes,
            etag,
            blocks,
        }
    }
}

fn block_finished(done: Result<(u32, BlobResult<()>), JoinError>) -> BlobResult<()> {
    match done {
        Ok((index, Ok(()))) => {
            debug!(index, "block staged");
            Ok(())
        }
        Ok((_, Err(BlobError::Cancelled))) => Err(BlobError::Cancelled),
        Ok((index, Err(err))) => {
            warn!(index, error = %err, "block failed");
            Err(BlobError::upload_failed(format!("block {} failed", index), err))
        }
        Err(join) => Err(BlobError::upload_failed(
            "block task did not complete",
            BlobError::transport(join),
        )),
    }
}

/// Read exactly `len` bytes; a short source is an upload failure.
async fn read_span<R>(reader: &mut R, len: u64) -> BlobResult<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(|e| {
        BlobError::upload_failed("could not read upload source", BlobError::from(e))
    })?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{ErrorKind, Failure, MemoryTransport, PublicAccess, RetryPolicy, StorageClient};

    async fn blob(memory: Arc<MemoryTransport>) -> BlobClient {
        let client = StorageClient::with_transport(memory)
            .with_retry(RetryPolicy::new().with_base_delay(Duration::from_millis(1)));
        let container = client.container("uploads").unwrap();
        container
            .create(&BlobCtx::new(), PublicAccess::None)
            .await
            .unwrap();
        container.blob("payload.bin").unwrap()
    }

    fn chunked(block_size: u64, parallelism: usize) -> UploadOptions {
        UploadOptions::new()
            .with_block_size(block_size)
            .with_parallelism(parallelism)
            .with_single_put_threshold(0)
    }

    #[tokio::test]
    async fn small_payloads_use_a_single_put() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;

        let receipt = blob
            .upload_bytes(&BlobCtx::new(), Bytes::from_static(b"hello"), &UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.blocks, 0);
        assert_eq!(receipt.size_bytes, 5);
        assert_eq!(memory.put_block_calls(), 0);
        assert_eq!(memory.blob_data("uploads", "payload.bin").unwrap(), "hello");
    }

    #[tokio::test]
    async fn large_payloads_are_committed_in_byte_order() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let receipt = blob
            .upload_bytes(&BlobCtx::new(), Bytes::from(data.clone()), &chunked(128, 3))
            .await
            .unwrap();

        assert_eq!(receipt.blocks, 8);
        let commits = memory.committed_block_lists();
        assert_eq!(commits.len(), 1);
        let order: Vec<Option<u32>> = commits[0].iter().map(BlockId::index).collect();
        assert_eq!(order, (0..8).map(Some).collect::<Vec<_>>());
        assert_eq!(memory.blob_data("uploads", "payload.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn too_many_blocks_is_rejected_before_any_request() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;

        let err = blob
            .upload_bytes(
                &BlobCtx::new(),
                Bytes::from(vec![0u8; 100]),
                &chunked(10, 2).with_max_blocks(5),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(memory.put_block_calls(), 0);
    }

    #[tokio::test]
    async fn block_limit_is_checked_before_planning() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;

        // One span per byte of 64 GiB would not fit in memory.
        let err = blob
            .upload_reader(&BlobCtx::new(), tokio::io::empty(), 1 << 36, &chunked(1, 4))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(memory.put_block_calls(), 0);
        assert!(memory.committed_block_lists().is_empty());
    }

    #[tokio::test]
    async fn rejected_single_put_is_upload_failed() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;
        memory.fail_put_blob(Failure::Permanent);

        let err = blob
            .upload_bytes(&BlobCtx::new(), Bytes::from_static(b"hello"), &UploadOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UploadFailed);
        assert_eq!(memory.put_blob_calls(), 1);
        assert!(memory.blob_data("uploads", "payload.bin").is_none());
    }

    #[tokio::test]
    async fn rejected_commit_leaves_no_blob() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;
        memory.fail_commit(Failure::Permanent);

        let err = blob
            .upload_bytes(&BlobCtx::new(), Bytes::from(vec![7u8; 100]), &chunked(32, 2))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UploadFailed);
        assert_eq!(memory.put_block_calls(), 4);
        assert_eq!(memory.commit_calls(), 1);
        assert!(memory.committed_block_lists().is_empty());
        assert!(memory.blob_data("uploads", "payload.bin").is_none());
    }

    #[tokio::test]
    async fn throttled_commit_is_retried() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;
        memory.fail_commit(Failure::Transient { times: 2 });

        let receipt = blob
            .upload_bytes(&BlobCtx::new(), Bytes::from(vec![7u8; 100]), &chunked(32, 2))
            .await
            .unwrap();

        assert_eq!(receipt.blocks, 4);
        assert_eq!(memory.commit_calls(), 3);
        assert_eq!(memory.committed_block_lists().len(), 1);
    }

    #[tokio::test]
    async fn short_sources_fail_without_commit() {
        let memory = Arc::new(MemoryTransport::new());
        let blob = blob(memory.clone()).await;

        let err = blob
            .upload_reader(
                &BlobCtx::new(),
                std::io::Cursor::new(vec![1u8; 10]),
                40,
                &chunked(16, 2),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UploadFailed);
        assert!(memory.committed_block_lists().is_empty());
        assert!(memory.blob_data("uploads", "payload.bin").is_none());
    }
}
