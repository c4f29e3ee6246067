//! HTTPS transport speaking the blob REST API with Shared Key signing.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Method, Response, Url};
use tracing::debug;

use crate::transport::{GetResult, PutResult};
use crate::{
    signing, xml, BlobError, BlobProperties, BlobResult, BlobTransport, BlockId, ByteRange,
    ClientOptions, ContainerName, ListBlobsOptions, ListBlobsSegment, Marker, PublicAccess,
    ServiceCode, SharedKeyCredential,
};

/// Percent-encoding set for blob names: encode everything except
/// unreserved characters and '/'.
const BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Transport that issues signed HTTPS requests against a blob endpoint
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    credential: SharedKeyCredential,
    api_version: String,
}

impl HttpTransport {
    /// Build the HTTP client. No request is sent.
    pub fn new(
        endpoint: Url,
        credential: SharedKeyCredential,
        options: &ClientOptions,
    ) -> BlobResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(BlobError::transport)?;

        Ok(Self {
            client,
            endpoint,
            credential,
            api_version: options.api_version.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, container: &ContainerName, blob: Option<&str>, query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        let mut path = format!("{}/{}", url.path().trim_end_matches('/'), container);
        if let Some(blob) = blob {
            path.push('/');
            path.push_str(&percent_encoding::utf8_percent_encode(blob, &BLOB_ENCODE_SET).to_string());
        }
        url.set_path(&path);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> BlobResult<Response> {
        let mut builder = self
            .client
            .request(method, url)
            .headers(headers)
            .header("x-ms-date", signing::rfc1123_now())
            .header("x-ms-version", self.api_version.as_str());
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let mut request = builder.build().map_err(BlobError::transport)?;
        signing::sign_request(&self.credential, &mut request)?;

        debug!(method = %request.method(), url = %request.url(), "sending blob request");
        let response = self
            .client
            .execute(request)
            .await
            .map_err(BlobError::transport)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::service_error(response).await)
        }
    }

    /// Turn a non-2xx response into a `Service` error carrying the service code.
    async fn service_error(response: Response) -> BlobError {
        let status = response.status();
        let header_code = header_string(response.headers(), "x-ms-error-code");
        let body = response.text().await.unwrap_or_default();
        let (body_code, message) = xml::parse_error(&body);

        let code = header_code
            .or(body_code)
            .map(|c| ServiceCode::from(c.as_str()))
            .unwrap_or_else(|| {
                ServiceCode::Other(status.canonical_reason().unwrap_or("Unknown").to_string())
            });
        let message = message.unwrap_or_else(|| status.to_string());

        BlobError::service(status.as_u16(), code, message)
    }
}

#[async_trait]
impl BlobTransport for HttpTransport {
    async fn create_container(
        &self,
        container: &ContainerName,
        access: PublicAccess,
    ) -> BlobResult<()> {
        let url = self.url(container, None, &[("restype", "container")]);
        let mut headers = HeaderMap::new();
        if let Some(level) = access.header_value() {
            headers.insert(
                HeaderName::from_static("x-ms-blob-public-access"),
                HeaderValue::from_static(level),
            );
        }
        self.send(Method::PUT, url, headers, Some(Bytes::new())).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &ContainerName) -> BlobResult<()> {
        let url = self.url(container, None, &[("restype", "container")]);
        self.send(Method::DELETE, url, HeaderMap::new(), None).await?;
        Ok(())
    }

    async fn list_blobs(
        &self,
        container: &ContainerName,
        marker: &Marker,
        options: &ListBlobsOptions,
    ) -> BlobResult<ListBlobsSegment> {
        let max_results = options.max_results.map(|m| m.to_string());
        let mut query = vec![("restype", "container"), ("comp", "list")];
        if let Some(marker) = marker.as_query() {
            query.push(("marker", marker));
        }
        if let Some(max) = max_results.as_deref() {
            query.push(("maxresults", max));
        }
        if let Some(prefix) = options.prefix.as_deref() {
            query.push(("prefix", prefix));
        }

        let url = self.url(container, None, &query);
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        let body = response.text().await.map_err(BlobError::transport)?;
        xml::parse_list_blobs(&body)
    }

    async fn put_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        let url = self.url(container, Some(blob), &[]);
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-ms-blob-type"),
            HeaderValue::from_static("BlockBlob"),
        );
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, header_value(ct)?);
        }

        let response = self.send(Method::PUT, url, headers, Some(body)).await?;
        Ok(PutResult {
            etag: header_string(response.headers(), ETAG.as_str()),
        })
    }

    async fn put_block(
        &self,
        container: &ContainerName,
        blob: &str,
        block_id: &BlockId,
        body: Bytes,
    ) -> BlobResult<()> {
        let url = self.url(
            container,
            Some(blob),
            &[("comp", "block"), ("blockid", block_id.as_str())],
        );
        self.send(Method::PUT, url, HeaderMap::new(), Some(body)).await?;
        Ok(())
    }

    async fn put_block_list(
        &self,
        container: &ContainerName,
        blob: &str,
        blocks: &[BlockId],
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        let url = self.url(container, Some(blob), &[("comp", "blocklist")]);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        if let Some(ct) = content_type {
            headers.insert(
                HeaderName::from_static("x-ms-blob-content-type"),
                header_value(ct)?,
            );
        }

        let body = Bytes::from(xml::block_list_body(blocks));
        let response = self.send(Method::PUT, url, headers, Some(body)).await?;
        Ok(PutResult {
            etag: header_string(response.headers(), ETAG.as_str()),
        })
    }

    async fn get_blob(
        &self,
        container: &ContainerName,
        blob: &str,
        range: &ByteRange,
        if_match: Option<&str>,
    ) -> BlobResult<GetResult> {
        let url = self.url(container, Some(blob), &[]);
        let mut headers = HeaderMap::new();
        if let Some(value) = range.header_value() {
            headers.insert(HeaderName::from_static("x-ms-range"), header_value(&value)?);
        }
        if let Some(etag) = if_match {
            headers.insert(IF_MATCH, header_value(etag)?);
        }

        let response = self.send(Method::GET, url, headers, None).await?;
        let response_headers = response.headers();
        let content_length = body_length(response_headers)?;
        let total_size = header_string(response_headers, "content-range")
            .and_then(|v| v.rsplit('/').next().and_then(|t| t.parse::<u64>().ok()))
            .unwrap_or(range.offset.saturating_add(content_length));
        let content_type = header_string(response_headers, CONTENT_TYPE.as_str());
        let etag = header_string(response_headers, ETAG.as_str());

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, BlobError::transport(e)))
        });

        Ok(GetResult {
            stream: Box::pin(stream),
            content_length,
            total_size,
            content_type,
            etag,
        })
    }

    async fn get_properties(
        &self,
        container: &ContainerName,
        blob: &str,
    ) -> BlobResult<BlobProperties> {
        let url = self.url(container, Some(blob), &[]);
        let response = self.send(Method::HEAD, url, HeaderMap::new(), None).await?;
        let headers = response.headers();

        Ok(BlobProperties {
            content_length: header_string(headers, CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            content_type: header_string(headers, CONTENT_TYPE.as_str()),
            etag: header_string(headers, ETAG.as_str()),
            last_modified: header_string(headers, "last-modified"),
        })
    }

    async fn delete_blob(&self, container: &ContainerName, blob: &str) -> BlobResult<()> {
        let url = self.url(container, Some(blob), &[]);
        self.send(Method::DELETE, url, HeaderMap::new(), None).await?;
        Ok(())
    }
}

/// Length of a GET body, from `Content-Length` or else the `Content-Range` span.
///
/// The retry reader needs the exact length to tell a finished body from a
/// truncated one, so a response carrying neither header is rejected.
fn body_length(headers: &HeaderMap) -> BlobResult<u64> {
    if let Some(length) = header_string(headers, CONTENT_LENGTH.as_str()) {
        return length.trim().parse().map_err(|_| {
            malformed_response(format!("unparsable Content-Length {:?}", length))
        });
    }

    let span = header_string(headers, "content-range").and_then(|v| {
        let (start, end) = v.strip_prefix("bytes ")?.split('/').next()?.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        end.checked_sub(start)?.checked_add(1)
    });
    span.ok_or_else(|| malformed_response("response carries no Content-Length"))
}

fn malformed_response<S: Into<String>>(message: S) -> BlobError {
    BlobError::from_io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn header_value(value: &str) -> BlobResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| BlobError::invalid(format!("invalid header value '{}': {}", value, e)))
}
