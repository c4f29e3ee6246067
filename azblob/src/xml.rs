//! XML bodies of the blob REST API: listing responses, error bodies and
//! the block list sent on commit.

use std::io;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{BlobError, BlobItem, BlobResult, BlockId, ListBlobsSegment, Marker};

/// Text is read untrimmed: blob names may start or end with whitespace.
pub(crate) fn parse_list_blobs(xml: &str) -> BlobResult<ListBlobsSegment> {
    let mut reader = Reader::from_str(xml);

    let mut path: Vec<String> = Vec::new();
    let mut items = Vec::new();
    let mut current: Option<BlobItem> = None;
    let mut next_marker: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Blob" {
                    current = Some(BlobItem {
                        name: String::new(),
                        content_length: 0,
                        content_type: None,
                        etag: None,
                    });
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("Blob") {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(malformed)?.into_owned();
                let leaf = path.last().map(String::as_str);
                let parent = path
                    .len()
                    .checked_sub(2)
                    .and_then(|i| path.get(i))
                    .map(String::as_str);

                match (parent, leaf, current.as_mut()) {
                    (Some("Blob"), Some("Name"), Some(item)) => item.name = text,
                    (Some("Properties"), Some("Content-Length"), Some(item)) => {
                        item.content_length = text.trim().parse().map_err(malformed)?;
                    }
                    (Some("Properties"), Some("Content-Type"), Some(item)) => {
                        item.content_type = Some(text);
                    }
                    (Some("Properties"), Some("Etag"), Some(item)) => item.etag = Some(text),
                    (Some("EnumerationResults"), Some("NextMarker"), _) => {
                        next_marker = Some(text.trim().to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
    }

    Ok(ListBlobsSegment {
        items,
        next_marker: Marker::from_next(next_marker),
    })
}

/// `(Code, Message)` of a service error body; either may be missing.
pub(crate) fn parse_error(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut code = None;
    let mut message = None;
    let mut element = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
            }
            Ok(Event::End(_)) => element.clear(),
            Ok(Event::Text(ref e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => continue,
                };
                match element.as_str() {
                    "Code" => code = Some(text),
                    "Message" => message = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    (code, message)
}

pub(crate) fn block_list_body(blocks: &[BlockId]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for id in blocks {
        xml.push_str("<Latest>");
        xml.push_str(id.as_str());
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

fn malformed<E: std::fmt::Display>(err: E) -> BlobError {
    BlobError::transport(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed XML response: {}", err),
    ))
}
