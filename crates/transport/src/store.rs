//! reqwest-backed object store transport.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, COOKIE, LOCATION, RANGE};
use tagstore_engine::transport::{BoxFuture, GetResponse, PostResponse, PutResponse};
use tagstore_engine::{EngineError, Transport};
use tracing::{debug, trace};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a tag-indexed object store.
///
/// One instance is shared across the worker pool; reqwest's internal
/// connection pool bounds concurrent sockets, while the engine's worker
/// count bounds concurrent operations.
pub struct HttpStore {
    client: reqwest::Client,
}

impl HttpStore {
    /// Builds a client with rustls TLS and a connect timeout. Socket
    /// timeouts are the transport's concern; the engine imposes no timer.
    pub fn new() -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client (custom timeouts, proxies, test servers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// `Range` header value for a ranged GET.
fn range_header(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length - 1)
}

/// `Content-Range` header value for a ranged PUT.
fn content_range_header(offset: u64, length: u64, total_len: u64) -> String {
    if length == 0 {
        format!("bytes */{total_len}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + length - 1, total_len)
    }
}

fn transport_err(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

/// Interprets a length-probe response. A 2xx answer must carry a parsable
/// `Content-Length`; anything else would silently become a 0-byte file.
/// Non-2xx statuses pass through for the engine to turn into HTTP errors.
fn probe_length(url: &str, status: u16, header: Option<&str>) -> Result<(u16, u64), EngineError> {
    match header.and_then(|v| v.parse().ok()) {
        Some(length) => Ok((status, length)),
        None if (200..300).contains(&status) => Err(EngineError::Transport(format!(
            "length probe of {url} returned no usable Content-Length"
        ))),
        None => Ok((status, 0)),
    }
}

fn location_of(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl Transport for HttpStore {
    fn get_length<'a>(
        &'a self,
        url: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<(u16, u64), EngineError>> {
        Box::pin(async move {
            let resp = self
                .client
                .head(url)
                .header(COOKIE, token)
                .send()
                .await
                .map_err(transport_err)?;
            let status = resp.status().as_u16();
            let header = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok());
            let (status, length) = probe_length(url, status, header)?;
            debug!(url, status, length, "length probe");
            Ok((status, length))
        })
    }

    fn get<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        length: u64,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GetResponse, EngineError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .header(COOKIE, token)
                .header(RANGE, range_header(offset, length))
                .send()
                .await
                .map_err(transport_err)?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await.map_err(transport_err)?.to_vec();
            trace!(url, status, offset, length, "ranged GET");
            Ok(GetResponse { status, body })
        })
    }

    fn put<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        offset: u64,
        length: u64,
        total_len: u64,
        token: &'a str,
    ) -> BoxFuture<'a, Result<PutResponse, EngineError>> {
        Box::pin(async move {
            let resp = self
                .client
                .put(url)
                .header(COOKIE, token)
                .header(CONTENT_RANGE, content_range_header(offset, length, total_len))
                .body(body)
                .send()
                .await
                .map_err(transport_err)?;
            let status = resp.status().as_u16();
            let location = location_of(&resp);
            trace!(url, status, offset, length, "ranged PUT");
            Ok(PutResponse { status, location })
        })
    }

    fn post<'a>(
        &'a self,
        url: &'a str,
        form: Vec<(String, String)>,
        token: &'a str,
    ) -> BoxFuture<'a, Result<PostResponse, EngineError>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(url)
                .header(COOKIE, token)
                .form(&form)
                .send()
                .await
                .map_err(transport_err)?;
            let status = resp.status().as_u16();
            let location = location_of(&resp);
            debug!(url, status, "form POST");
            Ok(PostResponse { status, location })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(range_header(0, 100), "bytes=0-99");
        assert_eq!(range_header(4096, 1), "bytes=4096-4096");
    }

    #[test]
    fn content_range_header_with_total() {
        assert_eq!(content_range_header(100, 50, 250), "bytes 100-149/250");
        assert_eq!(content_range_header(0, 0, 0), "bytes */0");
    }

    #[test]
    fn probe_length_requires_header_on_success() {
        assert_eq!(probe_length("u", 200, Some("42")).unwrap(), (200, 42));
        assert_eq!(probe_length("u", 404, None).unwrap(), (404, 0));
        assert!(probe_length("u", 200, None).is_err());
        assert!(probe_length("u", 204, Some("nope")).is_err());
    }
}
