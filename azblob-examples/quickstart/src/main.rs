mod config;
mod names;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use azblob::{
    BlobCtx, ClientOptions, ContainerClient, ErrorKind, ListBlobsOptions, Marker, PublicAccess,
    RetryReaderOptions, SharedKeyCredential, StorageClient, UploadOptions,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use config::{Credentials, QuickstartConfig};
use names::NameGenerator;

const SAMPLE_DATA: &[u8] = b"hello world this is a blob\n";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    println!("Azure Blob Storage quick start sample");

    let config = QuickstartConfig::from_env();
    let credentials = Credentials::load(&config.credentials_file)?;
    println!("Successfully loading {}", config.credentials_file.display());

    let credential = SharedKeyCredential::new(
        credentials.azure_storage_account_name.as_str(),
        &credentials.azure_storage_access_key,
    )
    .context("Invalid credentials")?;

    let client = match config.endpoint.as_deref() {
        Some(endpoint) => StorageClient::with_endpoint(endpoint, credential, ClientOptions::default())?,
        None => StorageClient::new(credential, ClientOptions::default())?,
    };

    let ctx = BlobCtx::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight requests");
            interrupt.cancel();
        }
    });

    let mut names = NameGenerator::from_entropy();
    let container_name = names.container_name();
    let container = client.container(&container_name)?;

    println!("Creating a container named {}", container_name);
    match container.create(&ctx, PublicAccess::None).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            println!("Received 409. Container already exists");
        }
        Err(err) => return Err(err).context("creating container"),
    }

    println!("Creating a dummy file to test the upload and download");
    let file_name = names.next_token();
    let path = config.work_dir.join(&file_name);
    tokio::fs::write(&path, SAMPLE_DATA)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    transfer(&ctx, &config, &container, &file_name, &path).await?;

    println!("Press enter key to delete the sample files, example container, and exit the application.");
    wait_for_enter(&ctx).await?;

    println!("Cleaning up.");
    let cleanup = BlobCtx::new()
        .with_request_id(ctx.request_id.clone())
        .with_timeout(Duration::from_secs(60));
    clean_up(&cleanup, &container, &path).await
}

/// Delete the container and the local sample file.
///
/// The file is removed even when the container delete fails.
async fn clean_up(ctx: &BlobCtx, container: &ContainerClient, path: &Path) -> Result<()> {
    let deleted = container.delete(ctx).await.context("deleting container");
    let removed = tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("removing {}", path.display()));

    deleted?;
    removed
}

/// Upload the sample file, list the container, and read the blob back.
async fn transfer(
    ctx: &BlobCtx,
    config: &QuickstartConfig,
    container: &ContainerClient,
    file_name: &str,
    path: &Path,
) -> Result<()> {
    let blob = container.blob(file_name)?;

    println!("Uploading the file with blob name: {}", file_name);
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let options = UploadOptions::new()
        .with_block_size(config.block_size)
        .with_parallelism(config.parallelism);
    let receipt = blob
        .upload_file(ctx, file, &options)
        .await
        .context("uploading blob")?;
    info!(blob = %receipt.blob, size = receipt.size_bytes, blocks = receipt.blocks, "upload committed");

    println!("Listing the blobs in the container:");
    let mut marker = Marker::default();
    while marker.not_done() {
        let segment = container
            .list_blobs_segment(ctx, &marker, &ListBlobsOptions::default())
            .await
            .context("listing blobs")?;
        marker = segment.next_marker;

        for item in segment.items {
            println!(" Blob name: {}", item.name);
        }
    }

    let downloaded = blob
        .download(ctx, 0, None)
        .await
        .context("starting download")?
        .read_to_end(RetryReaderOptions::new().with_max_retry_requests(config.max_retry_requests))
        .await
        .context("downloading blob")?;

    if downloaded.as_ref() == SAMPLE_DATA {
        info!(bytes = downloaded.len(), "downloaded blob matches the sample file");
    } else {
        warn!(bytes = downloaded.len(), "downloaded blob differs from the sample file");
    }
    Ok(())
}

/// Block until a line arrives on stdin. Ctrl-C also releases the prompt.
async fn wait_for_enter(ctx: &BlobCtx) -> Result<()> {
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = stdin.read_line(&mut line) => {
            read.context("reading from stdin")?;
        }
        _ = ctx.done() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use azblob::MemoryTransport;

    use super::*;

    #[tokio::test]
    async fn sample_file_is_removed_when_container_delete_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        tokio::fs::write(&path, SAMPLE_DATA).await.unwrap();

        // Never created, so the delete is rejected.
        let container = StorageClient::with_transport(Arc::new(MemoryTransport::new()))
            .container("quickstart-1")
            .unwrap();

        let result = clean_up(&BlobCtx::new(), &container, &path).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn clean_up_deletes_container_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample");
        tokio::fs::write(&path, SAMPLE_DATA).await.unwrap();

        let memory = Arc::new(MemoryTransport::new());
        let container = StorageClient::with_transport(memory.clone())
            .container("quickstart-2")
            .unwrap();
        container.create(&BlobCtx::new(), PublicAccess::None).await.unwrap();

        clean_up(&BlobCtx::new(), &container, &path).await.unwrap();

        assert!(!memory.container_exists("quickstart-2"));
        assert!(!path.exists());
    }
}
