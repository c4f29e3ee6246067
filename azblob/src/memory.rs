//! In-memory blob service.
//!
//! Mirrors the service's observable behavior (status codes, error codes,
//! staged vs committed blocks, marker pagination) and adds fault injection
//! so retry, failure and cancellation paths can be driven deterministically.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::transport::{GetResult, PutResult};
use crate::{
    BlobError, BlobItem, BlobProperties, BlobResult, BlobTransport, BlockId, ByteRange,
    ContainerName, ListBlobsOptions, ListBlobsSegment, Marker, PublicAccess, ServiceCode,
};

const DEFAULT_PAGE_SIZE: usize = 5000;

/// Injected failure for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 503 ServerBusy for the next `times` requests, then success
    Transient { times: u32 },
    /// 400 on every request
    Permanent,
}

impl Failure {
    /// Consume one injection, producing the error to return if any.
    fn trigger(&mut self) -> Option<BlobError> {
        match self {
            Failure::Transient { times } if *times > 0 => {
                *times -= 1;
                Some(BlobError::service(
                    503,
                    ServiceCode::ServerBusy,
                    "The server is currently unable to receive requests.",
                ))
            }
            Failure::Transient { .. } => None,
            Failure::Permanent => Some(BlobError::service(
                400,
                ServiceCode::Other("InjectedFault".to_string()),
                "Injected permanent failure",
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
struct ContainerState {
    access: PublicAccess,
    blobs: BTreeMap<String, StoredBlob>,
    /// blob name -> block id -> staged bytes
    staged: HashMap<String, HashMap<String, Bytes>>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, ContainerState>,
    etag_counter: u64,

    block_faults: HashMap<u32, Failure>,
    put_blob_fault: Option<Failure>,
    commit_fault: Option<Failure>,
    block_latency: HashMap<u32, Duration>,
    download_drop: Option<(u64, u32)>,
    conditional_get_fault: Option<Failure>,

    put_blob_calls: u64,
    put_block_calls: u64,
    commit_calls: u64,
    get_blob_calls: u64,
    commits: Vec<Vec<BlockId>>,
}

impl State {
    fn container(&self, name: &ContainerName) -> BlobResult<&ContainerState> {
        self.containers
            .get(name.as_str())
            .ok_or_else(|| container_not_found(name))
    }

    fn container_mut(&mut self, name: &ContainerName) -> BlobResult<&mut ContainerState> {
        self.containers
            .get_mut(name.as_str())
            .ok_or_else(|| container_not_found(name))
    }

    fn next_etag(&mut self) -> String {
        self.etag_counter += 1;
        format!("\"0x8D{:012X}\"", self.etag_counter)
    }
}

/// Blob service held entirely in process memory
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<State>,
    read_chunk_size: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            read_chunk_size: 64 * 1024,
        }
    }

    /// Size of the chunks download bodies are delivered in.
    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes.max(1);
        self
    }

    /// Make Put Block fail for the block with this index.
    pub fn fail_block(&self, index: u32, failure: Failure) {
        self.state.lock().block_faults.insert(index, failure);
    }

    /// Make Put Blob fail.
    pub fn fail_put_blob(&self, failure: Failure) {
        self.state.lock().put_blob_fault = Some(failure);
    }

    /// Make Put Block List fail, leaving staged blocks in place.
    pub fn fail_commit(&self, failure: Failure) {
        self.state.lock().commit_fault = Some(failure);
    }

    /// Delay Put Block for the block with this index.
    pub fn set_block_latency(&self, index: u32, latency: Duration) {
        self.state.lock().block_latency.insert(index, latency);
    }

    /// Cut the next `times` download bodies after `after_bytes` bytes.
    pub fn drop_downloads(&self, after_bytes: u64, times: u32) {
        self.state.lock().download_drop = Some((after_bytes, times));
    }

    /// Fail Get Blob requests that carry `If-Match`, i.e. resumed reads.
    pub fn fail_conditional_gets(&self, failure: Failure) {
        self.state.lock().conditional_get_fault = Some(failure);
    }

    /// Block lists committed so far, in commit order.
    pub fn committed_block_lists(&self) -> Vec<Vec<BlockId>> {
        self.state.lock().commits.clone()
    }

    pub fn put_blob_calls(&self) -> u64 {
        self.state.lock().put_blob_calls
    }

    pub fn put_block_calls(&self) -> u64 {
        self.state.lock().put_block_calls
    }

    /// Put Block List requests received, including failed ones.
    pub fn commit_calls(&self) -> u64 {
        self.state.lock().commit_calls
    }

    pub fn get_blob_calls(&self) -> u64 {
        self.state.lock().get_blob_calls
    }

    /// Blocks staged for a blob but not committed.
    pub fn uncommitted_blocks(&self, container: &str, blob: &str) -> usize {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|c| c.staged.get(blob))
            .map_or(0, HashMap::len)
    }

    /// Committed content of a blob.
    pub fn blob_data(&self, container: &str, blob: &str) -> Option<Bytes> {
        self.state
            .lock()
            .containers
            .get(container)
            .and_then(|c| c.blobs.get(blob))
            .map(|b| b.data.clone())
    }

    pub fn container_exists(&self, container: &str) -> bool {
        self.state.lock().containers.contains_key(container)
    }

    pub fn container_access(&self, container: &str) -> Option<PublicAccess> {
        self.state.lock().containers.get(container).map(|c| c.access)
    }

    fn body_chunks(&self, data: Bytes) -> Vec<Result<Bytes, io::Error>> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.read_chunk_size).min(data.len());
            chunks.push(Ok(data.slice(offset..end)));
            offset = end;
        }
        chunks
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    async fn create_container(
        &self,
        container: &ContainerName,
        access: PublicAccess,
    ) -> BlobResult<()> {
        let mut state = self.state.lock();
        if state.containers.contains_key(container.as_str()) {
            return Err(BlobError::service(
                409,
                ServiceCode::ContainerAlreadyExists,
                "The specified container already exists.",
            ));
        }
        state.containers.insert(
            container.as_str().to_string(),
            ContainerState {
                access,
                ..ContainerState::default()
            },
        );
        Ok(())
    }

    async fn delete_container(&self, container: &ContainerName) -> BlobResult<()> {
        let mut state = self.state.lock();
        match state.containers.remove(container.as_str()) {
            Some(_) => Ok(()),
            None => Err(container_not_found(container)),
        }
    }

    async fn list_blobs(
        &self,
        container: &ContainerName,
        marker: &Marker,
        options: &ListBlobsOptions,
    ) -> BlobResult<ListBlobsSegment> {
        let state = self.state.lock();
        let container = state.container(container)?;

        let start = marker.as_query().unwrap_or("");
        let limit = options
            .max_results
            .map_or(DEFAULT_PAGE_SIZE, |m| (m as usize).max(1));
        let prefix = options.prefix.as_deref().unwrap_or("");

        let mut matching = container
            .blobs
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
            .filter(|(name, _)| name.starts_with(prefix));

        let items: Vec<BlobItem> = matching
            .by_ref()
            .take(limit)
            .map(|(name, blob)| BlobItem {
                name: name.clone(),
                content_length: blob.data.len() as u64,
                content_type: blob.content_type.clone(),
                etag: Some(blob.etag.clone()),
            })
            .collect();
        let next = matching.next().map(|(name, _)| name.clone());

        Ok(ListBlobsSegment {
            items,
            next_marker: Marker::from_next(next),
        })
    }

    async fn put_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        let mut state = self.state.lock();
        state.put_blob_calls += 1;
        if let Some(err) = state.put_blob_fault.as_mut().and_then(Failure::trigger) {
            return Err(err);
        }
        state.container(container)?;
        let etag = state.next_etag();

        let entry = state.container_mut(container)?;
        entry.staged.remove(blob);
        entry.blobs.insert(
            blob.to_string(),
            StoredBlob {
                data: body,
                etag: etag.clone(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(PutResult { etag: Some(etag) })
    }

    async fn put_block(
        &self,
        container: &ContainerName,
        blob: &str,
        block_id: &BlockId,
        body: Bytes,
    ) -> BlobResult<()> {
        let index = block_id.index();
        let latency = index.and_then(|i| self.state.lock().block_latency.get(&i).copied());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.put_block_calls += 1;
        if let Some(index) = index {
            if let Some(err) = state.block_faults.get_mut(&index).and_then(Failure::trigger) {
                return Err(err);
            }
        }

        state
            .container_mut(container)?
            .staged
            .entry(blob.to_string())
            .or_default()
            .insert(block_id.as_str().to_string(), body);
        Ok(())
    }

    async fn put_block_list(
        &self,
        container: &ContainerName,
        blob: &str,
        blocks: &[BlockId],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        let mut state = self.state.lock();
        state.commit_calls += 1;
        if let Some(err) = state.commit_fault.as_mut().and_then(Failure::trigger) {
            return Err(err);
        }
        let data = {
            let entry = state.container_mut(container)?;
            let staged = entry.staged.get(blob);
            let mut data = Vec::new();
            for id in blocks {
                match staged.and_then(|s| s.get(id.as_str())) {
                    Some(bytes) => data.extend_from_slice(bytes),
                    None => {
                        return Err(BlobError::service(
                            400,
                            ServiceCode::InvalidBlockList,
                            "The specified block list is invalid.",
                        ))
                    }
                }
            }
            entry.staged.remove(blob);
            Bytes::from(data)
        };

        let etag = state.next_etag();
        state.container_mut(container)?.blobs.insert(
            blob.to_string(),
            StoredBlob {
                data,
                etag: etag.clone(),
                content_type: content_type.map(str::to_string),
            },
        );
        state.commits.push(blocks.to_vec());
        Ok(PutResult { etag: Some(etag) })
    }

    async fn get_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        range: &ByteRange,
        if_match: Option<&str>,
    ) -> BlobResult<GetResult> {
        let mut state = self.state.lock();
        state.get_blob_calls += 1;

        if if_match.is_some() {
            if let Some(err) = state.conditional_get_fault.as_mut().and_then(Failure::trigger) {
                return Err(err);
            }
        }

        let stored = state
            .container(container)?
            .blobs
            .get(blob)
            .cloned()
            .ok_or_else(|| blob_not_found(blob))?;

        if let Some(expected) = if_match {
            if expected != stored.etag {
                return Err(BlobError::service(
                    412,
                    ServiceCode::ConditionNotMet,
                    "The condition specified using HTTP conditional header(s) is not met.",
                ));
            }
        }

        let total = stored.data.len() as u64;
        if !range.is_full() && range.offset >= total {
            return Err(BlobError::service(
                416,
                ServiceCode::InvalidRange,
                "The range specified is invalid for the current size of the resource.",
            ));
        }
        let end = range
            .count
            .map_or(total, |count| range.offset.saturating_add(count).min(total));
        let body = stored.data.slice(range.offset as usize..end as usize);
        let content_length = body.len() as u64;

        let cut = state.download_drop;
        let chunks = match cut {
            Some((after, times)) if times > 0 && content_length > after => {
                state.download_drop = Some((after, times - 1));
                let mut chunks = self.body_chunks(body.slice(..after as usize));
                chunks.push(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
                chunks
            }
            _ => self.body_chunks(body),
        };

        Ok(GetResult {
            stream: Box::pin(futures_util::stream::iter(chunks)),
            content_length,
            total_size: total,
            content_type: stored.content_type,
            etag: Some(stored.etag),
        })
    }

    async fn get_properties(
        &self,
        container: &ContainerName,
        blob: &str,
    ) -> BlobResult<BlobProperties> {
        let state = self.state.lock();
        let stored = state
            .container(container)?
            .blobs
            .get(blob)
            .ok_or_else(|| blob_not_found(blob))?;

        Ok(BlobProperties {
            content_length: stored.data.len() as u64,
            content_type: stored.content_type.clone(),
            etag: Some(stored.etag.clone()),
            last_modified: None,
        })
    }

    async fn delete_blob(&self, container: &ContainerName, blob: &str) -> BlobResult<()> {
        let mut state = self.state.lock();
        let entry = state.container_mut(container)?;
        entry.staged.remove(blob);
        match entry.blobs.remove(blob) {
            Some(_) => Ok(()),
            None => Err(blob_not_found(blob)),
        }
    }
}

fn container_not_found(container: &ContainerName) -> BlobError {
    BlobError::service(
        404,
        ServiceCode::ContainerNotFound,
        format!("The specified container does not exist: {}", container),
    )
}

fn blob_not_found(blob: &str) -> BlobError {
    BlobError::service(
        404,
        ServiceCode::BlobNotFound,
        format!("The specified blob does not exist: {}", blob),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn container() -> ContainerName {
        ContainerName::parse("memtest").unwrap()
    }

    async fn seeded(names: &[&str]) -> MemoryTransport {
        let memory = MemoryTransport::new();
        memory
            .create_container(&container(), PublicAccess::None)
            .await
            .unwrap();
        for name in names {
            memory
                .put_blob(&container(), name, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }
        memory
    }

    #[tokio::test]
    async fn duplicate_container_is_a_409() {
        let memory = seeded(&[]).await;
        let err = memory
            .create_container(&container(), PublicAccess::Blob)
            .await
            .unwrap_err();
        assert_eq!(err.service_code(), Some(&ServiceCode::ContainerAlreadyExists));
    }

    #[tokio::test]
    async fn listing_pages_with_markers() {
        let memory = seeded(&["a", "b", "c"]).await;
        let options = ListBlobsOptions::new().with_max_results(2);

        let first = memory
            .list_blobs(&container(), &Marker::default(), &options)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.next_marker.not_done());

        let second = memory
            .list_blobs(&container(), &first.next_marker, &options)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "c");
        assert!(!second.next_marker.not_done());
    }

    #[tokio::test]
    async fn unknown_block_ids_are_rejected_on_commit() {
        let memory = seeded(&[]).await;
        let err = memory
            .put_block_list(&container(), "blob", &[BlockId::new("u", 0)], None)
            .await
            .unwrap_err();
        assert_eq!(err.service_code(), Some(&ServiceCode::InvalidBlockList));
    }

    #[tokio::test]
    async fn failed_commits_keep_staged_blocks() {
        let memory = seeded(&[]).await;
        let id = BlockId::new("u", 0);
        memory
            .put_block(&container(), "blob", &id, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        memory.fail_commit(Failure::Permanent);

        let err = memory
            .put_block_list(&container(), "blob", &[id], None)
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(memory.commit_calls(), 1);
        assert_eq!(memory.uncommitted_blocks("memtest", "blob"), 1);
        assert!(memory.blob_data("memtest", "blob").is_none());
    }

    #[tokio::test]
    async fn transient_block_faults_wear_off() {
        let memory = seeded(&[]).await;
        memory.fail_block(0, Failure::Transient { times: 1 });
        let id = BlockId::new("u", 0);

        let first = memory
            .put_block(&container(), "blob", &id, Bytes::from_static(b"abc"))
            .await;
        assert!(first.unwrap_err().is_retryable());
        memory
            .put_block(&container(), "blob", &id, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(memory.uncommitted_blocks("memtest", "blob"), 1);
    }

    #[tokio::test]
    async fn dropped_downloads_end_in_an_error() {
        let memory = MemoryTransport::new().with_read_chunk_size(2);
        memory
            .create_container(&container(), PublicAccess::None)
            .await
            .unwrap();
        memory
            .put_blob(&container(), "blob", Bytes::from_static(b"abcdef"), None)
            .await
            .unwrap();
        memory.drop_downloads(3, 1);

        let get = memory
            .get_blob(&container(), "blob", &ByteRange::full(), None)
            .await
            .unwrap();
        let parts: Vec<_> = get.stream.collect().await;
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_err());
    }

    #[tokio::test]
    async fn reads_past_the_end_are_invalid_ranges() {
        let memory = seeded(&["blob"]).await;
        let err = memory
            .get_blob(&container(), "blob", &ByteRange::new(5, None), None)
            .await
            .unwrap_err();
        assert_eq!(err.service_code(), Some(&ServiceCode::InvalidRange));
    }
}
