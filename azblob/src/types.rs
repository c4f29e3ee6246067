use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::{BlobError, BlobResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Validated container name: 3-63 characters of lowercase letters, digits
/// and single hyphens, starting and ending with a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn parse<S: Into<String>>(name: S) -> BlobResult<Self> {
        let name = name.into();
        if !(3..=63).contains(&name.len()) {
            return Err(BlobError::invalid(format!(
                "Container name '{}' must be 3-63 characters",
                name
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(BlobError::invalid(format!(
                "Container name '{}' may only contain lowercase letters, digits and hyphens",
                name
            )));
        }
        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(BlobError::invalid(format!(
                "Container name '{}' must start and end with a letter or digit and not repeat hyphens",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anonymous read access granted on a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicAccess {
    /// Private: every request must be signed
    #[default]
    None,
    /// Anonymous reads of blob data
    Blob,
    /// Anonymous reads of blob data and container listings
    Container,
}

impl PublicAccess {
    /// Value of the `x-ms-blob-public-access` header; private sends none.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            PublicAccess::None => None,
            PublicAccess::Blob => Some("blob"),
            PublicAccess::Container => Some("container"),
        }
    }
}

/// Continuation token of a paginated listing.
///
/// `Marker::default()` starts a listing. The marker taken from a segment is
/// finished when the service returned no (or an empty) continuation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marker(Option<String>);

impl Marker {
    /// Marker carried by a listing response.
    pub fn from_next(next: Option<String>) -> Self {
        Self(Some(next.unwrap_or_default()))
    }

    /// True until a segment without continuation has been seen.
    pub fn not_done(&self) -> bool {
        self.0.as_deref().map_or(true, |m| !m.is_empty())
    }

    /// Value to send as the `marker` query parameter, if any.
    pub fn as_query(&self) -> Option<&str> {
        self.0.as_deref().filter(|m| !m.is_empty())
    }
}

/// Options for listing blobs
#[derive(Debug, Clone, Default)]
pub struct ListBlobsOptions {
    pub prefix: Option<String>,
    /// Page size; the service default applies when unset
    pub max_results: Option<u32>,
}

impl ListBlobsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_max_results(mut self, max: u32) -> Self {
        self.max_results = Some(max);
        self
    }
}

/// A blob entry of a listing segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobItem {
    pub name: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// One page of a listing plus the marker for the next page
#[derive(Debug, Clone)]
pub struct ListBlobsSegment {
    pub items: Vec<BlobItem>,
    pub next_marker: Marker,
}

/// Blob metadata without content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Byte range for partial reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub count: Option<u64>, // None means "to end of blob"
}

impl ByteRange {
    pub fn new(offset: u64, count: Option<u64>) -> Self {
        Self { offset, count }
    }

    pub fn full() -> Self {
        Self {
            offset: 0,
            count: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.count.is_none()
    }

    /// Value for the `x-ms-range` header; a full read sends none.
    pub fn header_value(&self) -> Option<String> {
        match self.count {
            None if self.offset == 0 => None,
            None => Some(format!("bytes={}-", self.offset)),
            Some(count) => Some(format!(
                "bytes={}-{}",
                self.offset,
                self.offset.saturating_add(count.saturating_sub(1))
            )),
        }
    }

    /// The part of this range left after `delivered` bytes were read.
    pub fn remaining_after(&self, delivered: u64, length: u64) -> Self {
        Self {
            offset: self.offset.saturating_add(delivered),
            count: Some(length.saturating_sub(delivered)),
        }
    }
}

/// Identifier of a staged block.
///
/// Encodes `{upload_id}-{index:06}` in base64, so every id of one upload has
/// the same length, as the service requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(upload_id: &str, index: u32) -> Self {
        let raw = format!("{}-{:06}", upload_id, index);
        Self(BASE64_STANDARD.encode(raw.as_bytes()))
    }

    pub fn from_encoded(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Block index encoded in the id, if it was produced by [`BlockId::new`].
    pub fn index(&self) -> Option<u32> {
        let raw = BASE64_STANDARD.decode(&self.0).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        raw.rsplit('-').next()?.parse().ok()
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous slice of a payload staged as one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

/// Number of blocks needed for `size` bytes; zero when `block_size` is zero.
pub fn block_count(size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    size.div_ceil(block_size)
}

/// Split `size` bytes into ordered spans of at most `block_size` bytes.
///
/// Allocates one span per block; check [`block_count`] against a limit first.
pub fn plan_blocks(size: u64, block_size: u64) -> Vec<BlockSpan> {
    let count = block_count(size, block_size);
    (0..count)
        .map(|index| {
            let offset = index * block_size;
            BlockSpan {
                index: index as u32,
                offset,
                len: block_size.min(size - offset),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_follow_service_rules() {
        assert!(ContainerName::parse("quickstart-1234").is_ok());
        assert!(ContainerName::parse("abc").is_ok());
        assert!(ContainerName::parse("a".repeat(63)).is_ok());

        for bad in ["ab", "Upper", "has_underscore", "-lead", "trail-", "dou--ble"] {
            assert!(ContainerName::parse(bad).is_err(), "{bad}");
        }
        assert!(ContainerName::parse("a".repeat(64)).is_err());
    }

    #[test]
    fn marker_lifecycle() {
        let initial = Marker::default();
        assert!(initial.not_done());
        assert_eq!(initial.as_query(), None);

        let next = Marker::from_next(Some("blob-0042".to_string()));
        assert!(next.not_done());
        assert_eq!(next.as_query(), Some("blob-0042"));

        assert!(!Marker::from_next(None).not_done());
        assert!(!Marker::from_next(Some(String::new())).not_done());
    }

    #[test]
    fn range_headers() {
        assert_eq!(ByteRange::full().header_value(), None);
        assert_eq!(ByteRange::new(10, None).header_value().as_deref(), Some("bytes=10-"));
        assert_eq!(ByteRange::new(10, Some(5)).header_value().as_deref(), Some("bytes=10-14"));
        assert_eq!(
            ByteRange::new(10, Some(100)).remaining_after(40, 100),
            ByteRange::new(50, Some(60))
        );
    }

    #[test]
    fn range_end_saturates_at_the_last_byte() {
        let range = ByteRange::new(u64::MAX - 1, Some(5));
        assert_eq!(
            range.header_value(),
            Some(format!("bytes={}-{}", u64::MAX - 1, u64::MAX))
        );
        assert_eq!(range.remaining_after(5, 5).offset, u64::MAX);
    }

    #[test]
    fn block_ids_share_length_and_carry_index() {
        let a = BlockId::new("upl", 7);
        let b = BlockId::new("upl", 123_456);
        assert_eq!(a.as_str(), "dXBsLTAwMDAwNw==");
        assert_eq!(a.as_str().len(), b.as_str().len());
        assert_eq!(a.index(), Some(7));
        assert_eq!(b.index(), Some(123_456));
    }

    #[test]
    fn block_plan_covers_payload_in_order() {
        let spans = plan_blocks(10, 4);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], BlockSpan { index: 0, offset: 0, len: 4 });
        assert_eq!(spans[2], BlockSpan { index: 2, offset: 8, len: 2 });

        assert_eq!(plan_blocks(8, 4).len(), 2);
        assert!(plan_blocks(0, 4).is_empty());
        assert_eq!(block_count(10, 4), 3);
        assert_eq!(block_count(u64::MAX, 1), u64::MAX);
        assert_eq!(block_count(10, 0), 0);
    }
}
