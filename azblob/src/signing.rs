//! Shared Key request signing.
//!
//! String-to-sign layout:
//! ```text
//! VERB\n
//! Content-Encoding\n
//! Content-Language\n
//! Content-Length\n        (empty when zero)
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! If-Modified-Since\n
//! If-Match\n
//! If-None-Match\n
//! If-Unmodified-Since\n
//! Range\n
//! CanonicalizedHeaders    (x-ms-* sorted, one `name:value\n` each)
//! CanonicalizedResource   (/{account}{path} then `\nname:v1,v2` per query key)
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Request, Url};

use crate::{BlobError, BlobResult, SharedKeyCredential};

const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Current UTC time in RFC 1123 format for `x-ms-date`.
pub(crate) fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Add the `Authorization: SharedKey {account}:{signature}` header to `request`.
pub(crate) fn sign_request(credential: &SharedKeyCredential, request: &mut Request) -> BlobResult<()> {
    let string_to_sign = string_to_sign(credential.account(), request);
    let signature = credential.compute_hmac_sha256(&string_to_sign)?;
    let value = HeaderValue::from_str(&format!("SharedKey {}:{}", credential.account(), signature))
        .map_err(|e| BlobError::credential(format!("unusable authorization header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

pub(crate) fn string_to_sign(account: &str, request: &Request) -> String {
    let headers = request.headers();
    let mut out = String::with_capacity(256);
    out.push_str(request.method().as_str());
    out.push('\n');

    for name in STANDARD_HEADERS {
        if name == "content-length" {
            out.push_str(&content_length(request));
        } else {
            out.push_str(header_str(headers, name));
        }
        out.push('\n');
    }

    out.push_str(&canonicalized_headers(headers));
    out.push_str(&canonicalized_resource(account, request.url()));
    out
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn content_length(request: &Request) -> String {
    let length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| {
            request
                .body()
                .and_then(|body| body.as_bytes())
                .map(|bytes| bytes.len() as u64)
        });

    match length {
        Some(0) | None => String::new(),
        Some(len) => len.to_string(),
    }
}

fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").trim()))
        .collect();
    ms_headers.sort();

    ms_headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect()
}

fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::{Body, Method};

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    fn create_container_request() -> Request {
        let url = Url::parse("https://myaccount.blob.core.windows.net/mycontainer?restype=container").unwrap();
        let mut request = Request::new(Method::PUT, url);
        request
            .headers_mut()
            .insert("x-ms-version", HeaderValue::from_static("2020-10-02"));
        request
            .headers_mut()
            .insert("x-ms-date", HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"));
        *request.body_mut() = Some(Body::from(Bytes::new()));
        request
    }

    #[test]
    fn string_to_sign_layout() {
        let request = create_container_request();
        let expected = concat!(
            "PUT\n\n\n\n\n\n\n\n\n\n\n\n",
            "x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n",
            "x-ms-version:2020-10-02\n",
            "/myaccount/mycontainer\n",
            "restype:container"
        );
        assert_eq!(string_to_sign("myaccount", &request), expected);
    }

    #[test]
    fn signs_with_hmac_sha256() {
        let credential = SharedKeyCredential::new("myaccount", KEY).unwrap();
        let mut request = create_container_request();
        sign_request(&credential, &mut request).unwrap();

        let header = request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert_eq!(
            header,
            "SharedKey myaccount:4ihCNScD8DH0JvqV/3iRvrYuA5M2ZCTF+Qv0vaGYolY="
        );
    }

    #[test]
    fn query_parameters_are_sorted_and_lowercased() {
        let url = Url::parse(
            "https://myaccount.blob.core.windows.net/c?restype=container&comp=list&Marker=abc&maxresults=2",
        )
        .unwrap();
        let resource = canonicalized_resource("myaccount", &url);
        assert_eq!(
            resource,
            "/myaccount/c\ncomp:list\nmarker:abc\nmaxresults:2\nrestype:container"
        );
    }

    #[test]
    fn content_length_comes_from_the_body() {
        let url = Url::parse("https://myaccount.blob.core.windows.net/c/b").unwrap();
        let mut request = Request::new(Method::PUT, url);
        *request.body_mut() = Some(Body::from(Bytes::from_static(b"hello")));
        let signed = string_to_sign("myaccount", &request);
        assert!(signed.starts_with("PUT\n\n\n5\n"));
    }

    #[test]
    fn date_is_rfc1123() {
        let date = rfc1123_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), "Mon, 01 Jan 2024 00:00:00 GMT".len());
    }
}
