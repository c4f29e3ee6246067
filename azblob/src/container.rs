//! Container lifecycle and blob listing.

use async_stream::try_stream;
use futures_core::Stream;
use tracing::{debug, info, instrument};

use crate::client::not_found_as;
use crate::{
    BlobCtx, BlobError, BlobItem, BlobResult, ContainerClient, ListBlobsOptions, ListBlobsSegment,
    Marker, PublicAccess, ServiceCode,
};

impl ContainerClient {
    /// Create the container.
    ///
    /// A name collision is reported as [`BlobError::AlreadyExists`] and
    /// leaves the existing container untouched.
    #[instrument(skip(self, ctx), fields(container = %self.name, request_id = %ctx.request_id))]
    pub async fn create(&self, ctx: &BlobCtx, access: PublicAccess) -> BlobResult<()> {
        let result = self
            .call(ctx, "create_container", || {
                self.transport.create_container(&self.name, access)
            })
            .await;

        match result {
            Ok(()) => {
                info!("container created");
                Ok(())
            }
            Err(BlobError::Service {
                code: ServiceCode::ContainerAlreadyExists,
                ..
            }) => Err(BlobError::AlreadyExists {
                container: self.name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Delete the container and every blob in it.
    #[instrument(skip(self, ctx), fields(container = %self.name, request_id = %ctx.request_id))]
    pub async fn delete(&self, ctx: &BlobCtx) -> BlobResult<()> {
        self.call(ctx, "delete_container", || {
            self.transport.delete_container(&self.name)
        })
        .await
        .map_err(|e| not_found_as(e, || self.name.to_string()))?;

        info!("container deleted");
        Ok(())
    }

    /// Fetch one page of the listing, starting at `marker`.
    pub async fn list_blobs_segment(
        &self,
        ctx: &BlobCtx,
        marker: &Marker,
        options: &ListBlobsOptions,
    ) -> BlobResult<ListBlobsSegment> {
        let segment = self
            .call(ctx, "list_blobs", || {
                self.transport.list_blobs(&self.name, marker, options)
            })
            .await
            .map_err(|e| not_found_as(e, || self.name.to_string()))?;

        debug!(
            container = %self.name,
            items = segment.items.len(),
            more = segment.next_marker.not_done(),
            "listed blob segment"
        );
        Ok(segment)
    }

    /// Every blob in the container, fetched lazily page by page.
    ///
    /// Pages are requested sequentially, each with the marker returned by
    /// the previous one. Each call starts a fresh listing.
    pub fn list_blobs<'a>(
        &'a self,
        ctx: &'a BlobCtx,
        options: ListBlobsOptions,
    ) -> impl Stream<Item = BlobResult<BlobItem>> + Send + 'a {
        try_stream! {
            let mut marker = Marker::default();
            while marker.not_done() {
                let segment = self.list_blobs_segment(ctx, &marker, &options).await?;
                for item in segment.items {
                    yield item;
                }
                marker = segment.next_marker;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use futures_util::{pin_mut, StreamExt, TryStreamExt};

    use super::*;
    use crate::{BlobTransport, ErrorKind, MemoryTransport, StorageClient};

    async fn setup() -> (Arc<MemoryTransport>, ContainerClient) {
        let memory = Arc::new(MemoryTransport::new());
        let client = StorageClient::with_transport(memory.clone());
        let container = client.container("listing").unwrap();
        container
            .create(&BlobCtx::new(), PublicAccess::None)
            .await
            .unwrap();
        (memory, container)
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let (memory, container) = setup().await;
        memory
            .put_blob(container.name(), "keep", Bytes::from_static(b"data"), None)
            .await
            .unwrap();

        let err = container
            .create(&BlobCtx::new(), PublicAccess::Container)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(memory.blob_data("listing", "keep").unwrap(), "data");
        assert_eq!(memory.container_access("listing"), Some(PublicAccess::None));
    }

    #[tokio::test]
    async fn stream_follows_markers_across_pages() {
        let (memory, container) = setup().await;
        for i in 0..7 {
            memory
                .put_blob(container.name(), &format!("blob-{i}"), Bytes::new(), None)
                .await
                .unwrap();
        }

        let ctx = BlobCtx::new();
        let stream = container.list_blobs(&ctx, ListBlobsOptions::new().with_max_results(3));
        pin_mut!(stream);
        let names: Vec<String> = stream
            .map_ok(|item| item.name)
            .try_collect()
            .await
            .unwrap();

        let expected: Vec<String> = (0..7).map(|i| format!("blob-{i}")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn prefix_filters_listing() {
        let (memory, container) = setup().await;
        for name in ["logs/a", "logs/b", "media/c"] {
            memory
                .put_blob(container.name(), name, Bytes::new(), None)
                .await
                .unwrap();
        }

        let ctx = BlobCtx::new();
        let segment = container
            .list_blobs_segment(&ctx, &Marker::default(), &ListBlobsOptions::new().with_prefix("logs/"))
            .await
            .unwrap();
        assert_eq!(segment.items.len(), 2);
        assert!(!segment.next_marker.not_done());
    }

    #[tokio::test]
    async fn deleting_a_missing_container_is_not_found() {
        let (_memory, container) = setup().await;
        let ctx = BlobCtx::new();
        container.delete(&ctx).await.unwrap();
        assert_eq!(container.delete(&ctx).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn listing_a_missing_container_fails_the_stream() {
        let memory = Arc::new(MemoryTransport::new());
        let client = StorageClient::with_transport(memory);
        let container = client.container("absent").unwrap();
        let ctx = BlobCtx::new();

        let stream = container.list_blobs(&ctx, ListBlobsOptions::new());
        pin_mut!(stream);
        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
