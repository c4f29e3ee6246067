//! # azblob: block blob client workflows
//!
//! `azblob` talks to an Azure-style blob service: it signs requests with an
//! account's shared key, manages containers, uploads payloads as parallel
//! blocks and downloads them through a body stream that resumes after
//! dropped connections.
//!
//! ## Key Features
//!
//! - **Eager validation**: malformed credentials and names fail at construction, not on first request
//! - **Chunked parallel uploads**: bounded worker pool, per-block retry, a single ordered commit
//! - **Self-healing downloads**: interrupted bodies are re-requested from the last delivered byte
//! - **Lazy pagination**: listings are streams that follow continuation markers
//! - **Explicit scopes**: every operation runs under a [`BlobCtx`] carrying cancellation and deadline
//! - **Pluggable transport**: HTTPS in production, [`MemoryTransport`] for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use azblob::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let client = StorageClient::with_transport(Arc::new(MemoryTransport::new()));
//! let ctx = BlobCtx::new();
//!
//! let container = client.container("quickstart-1")?;
//! container.create(&ctx, PublicAccess::None).await?;
//!
//! let blob = container.blob("hello.txt")?;
//! blob.upload_bytes(&ctx, "hello world".into(), &UploadOptions::default()).await?;
//!
//! let body = blob
//!     .download(&ctx, 0, None)
//!     .await?
//!     .read_to_end(RetryReaderOptions::default())
//!     .await?;
//! assert_eq!(body, "hello world");
//!
//! container.delete(&ctx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ StorageClient / Container /  │  ← workflows, retry, cancellation
//! │ BlobClient                   │
//! ├──────────────────────────────┤
//! │ BlobTransport                │  ← one method per service request
//! ├───────────────┬──────────────┤
//! │ HttpTransport │ Memory       │
//! └───────────────┴──────────────┘
//! ```

mod client;
mod config;
mod container;
mod context;
mod credential;
mod download;
mod error;
mod http;
mod memory;
mod retry;
mod signing;
pub mod transport;
mod types;
mod upload;
mod xml;

pub use client::{BlobClient, ContainerClient, StorageClient};
pub use config::{
    ClientOptions, RetryReaderOptions, UploadOptions, MAX_BLOCKS, MAX_BLOCK_SIZE,
    MAX_SINGLE_PUT_SIZE,
};
pub use context::BlobCtx;
pub use credential::SharedKeyCredential;
pub use download::DownloadResponse;
pub use error::{BlobError, BlobResult, ErrorKind, ServiceCode};
pub use http::HttpTransport;
pub use memory::{Failure, MemoryTransport};
pub use retry::RetryPolicy;
pub use transport::BlobTransport;
pub use types::{
    block_count, plan_blocks, BlobItem, BlobProperties, BlockId, BlockSpan, ByteRange, ByteStream,
    ContainerName, ListBlobsOptions, ListBlobsSegment, Marker, PublicAccess,
};
pub use upload::{UploadReceipt, UploadState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobClient, BlobCtx, BlobError, BlobResult, ClientOptions, ContainerClient, ErrorKind,
        ListBlobsOptions, MemoryTransport, PublicAccess, RetryReaderOptions, SharedKeyCredential,
        StorageClient, UploadOptions,
    };
}
