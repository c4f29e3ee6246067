//! Ranged downloads with a self-healing body.
//!
//! The body stream remembers how many bytes it has handed out. When the
//! connection drops it asks for the rest of the range again, pinned to the
//! ETag of the first response, until the retry budget is spent.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use crate::client::not_found_as;
use crate::{
    BlobClient, BlobCtx, BlobError, BlobResult, ByteRange, ByteStream, RetryReaderOptions,
};

/// Largest buffer pre-allocated by [`DownloadResponse::read_to_end`].
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// An opened download: response metadata plus the not yet consumed body
pub struct DownloadResponse {
    blob: BlobClient,
    ctx: BlobCtx,
    range: ByteRange,
    content_length: u64,
    total_size: u64,
    content_type: Option<String>,
    etag: Option<String>,
    initial: ByteStream,
}

enum Step {
    Cancelled,
    Next(Option<Result<Bytes, io::Error>>),
}

impl BlobClient {
    /// Open `count` bytes starting at `offset`; `None` reads to the end.
    #[instrument(skip(self, ctx), fields(blob = %self.path(), request_id = %ctx.request_id))]
    pub async fn download(
        &self,
        ctx: &BlobCtx,
        offset: u64,
        count: Option<u64>,
    ) -> BlobResult<DownloadResponse> {
        if count == Some(0) {
            return Err(BlobError::invalid("Download count must be at least 1"));
        }
        if let Some(count) = count {
            if offset.checked_add(count).is_none() {
                return Err(BlobError::invalid(format!(
                    "Range of {} bytes at offset {} is past the largest addressable byte",
                    count, offset
                )));
            }
        }
        let range = ByteRange::new(offset, count);

        let get = self
            .call(ctx, "get_blob", || {
                self.transport
                    .get_blob(&self.container, &self.name, &range, None)
            })
            .await
            .map_err(|e| not_found_as(e, || self.path()))?;

        debug!(
            content_length = get.content_length,
            total_size = get.total_size,
            "download opened"
        );

        Ok(DownloadResponse {
            blob: self.clone(),
            ctx: ctx.clone(),
            range,
            content_length: get.content_length,
            total_size: get.total_size,
            content_type: get.content_type,
            etag: get.etag,
            initial: get.stream,
        })
    }
}

impl DownloadResponse {
    /// Bytes the body will deliver.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Size of the whole blob.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// The body as a stream that resumes after dropped connections.
    ///
    /// Errors surface as `io::Error`s wrapping a [`BlobError`]; recover it
    /// with [`BlobError::from_io`]. Running out of retries yields
    /// `DownloadFailed`, a cancelled scope yields `Cancelled`.
    pub fn body(self, options: RetryReaderOptions) -> ByteStream {
        let DownloadResponse {
            blob,
            ctx,
            range,
            content_length,
            etag,
            initial,
            ..
        } = self;

        Box::pin(async_stream::stream! {
            let mut current = initial;
            let mut delivered: u64 = 0;
            let mut retries: u32 = 0;

            loop {
                let step = tokio::select! {
                    biased;
                    _ = ctx.done() => Step::Cancelled,
                    next = current.next() => Step::Next(next),
                };

                let mut failure = match step {
                    Step::Cancelled => {
                        yield Err(io::Error::from(BlobError::Cancelled));
                        return;
                    }
                    Step::Next(Some(Ok(chunk))) => {
                        delivered += chunk.len() as u64;
                        yield Ok(chunk);
                        continue;
                    }
                    Step::Next(None) if delivered >= content_length => return,
                    Step::Next(Some(Err(_))) if delivered >= content_length => return,
                    Step::Next(Some(Err(err))) => BlobError::from_io(err),
                    Step::Next(None) => BlobError::from(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("body ended after {} of {} bytes", delivered, content_length),
                    )),
                };

                if failure.is_cancelled() {
                    yield Err(io::Error::from(failure));
                    return;
                }
                if !failure.is_retryable() {
                    yield Err(BlobError::download_failed("body stream failed", Some(failure)).into());
                    return;
                }

                loop {
                    if retries >= options.max_retry_requests {
                        yield Err(BlobError::download_failed(
                            format!("gave up after {} retry requests", retries),
                            Some(failure),
                        )
                        .into());
                        return;
                    }
                    retries += 1;

                    let resume = range.remaining_after(delivered, content_length);
                    let delay = blob.retry.next_delay(retries);
                    warn!(
                        blob = %blob.path(),
                        retry = retries,
                        offset = resume.offset,
                        error = %failure,
                        "resuming interrupted download"
                    );

                    let reissued = ctx
                        .run(async {
                            tokio::time::sleep(delay).await;
                            blob.transport
                                .get_blob(&blob.container, &blob.name, &resume, etag.as_deref())
                                .await
                        })
                        .await;

                    match reissued {
                        Ok(get) => {
                            current = get.stream;
                            break;
                        }
                        Err(BlobError::Cancelled) => {
                            yield Err(io::Error::from(BlobError::Cancelled));
                            return;
                        }
                        Err(err) if err.is_retryable() => failure = err,
                        Err(err) => {
                            yield Err(BlobError::download_failed("resume request failed", Some(err)).into());
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Read the whole body into memory.
    pub async fn read_to_end(self, options: RetryReaderOptions) -> BlobResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.content_length.min(MAX_PREALLOC) as usize);
        let mut body = self.body(options);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(BlobError::from_io)?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadResponse")
            .field("blob", &self.blob.path())
            .field("range", &self.range)
            .field("content_length", &self.content_length)
            .field("total_size", &self.total_size)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}
