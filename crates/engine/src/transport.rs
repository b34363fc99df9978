//! Transport and session-auth collaborator traits.
//!
//! The engine never issues HTTP itself; workers call through [`Transport`],
//! one blocking (from the worker's point of view) operation per chunk. The
//! traits are implemented by the `tagstore-transport` crate for production
//! and by scripted mocks in tests.

use std::future::Future;
use std::pin::Pin;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::EngineError;

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body and status of a ranged GET.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Status and optional `Location` header of a ranged PUT.
///
/// On the first successful write of a file the store assigns a version
/// (optimistic-concurrency token) and reports it via `Location`.
#[derive(Debug, Clone)]
pub struct PutResponse {
    pub status: u16,
    pub location: Option<String>,
}

/// Status and optional `Location` header of a form POST.
#[derive(Debug, Clone)]
pub struct PostResponse {
    pub status: u16,
    pub location: Option<String>,
}

/// HTTP operations against the object store.
///
/// A connection-level fault (refused, reset, no response) is an `Err`;
/// an HTTP application failure is a non-2xx status in the `Ok` response.
/// The engine treats both as fatal for the batch.
pub trait Transport: Send + Sync {
    /// Probes the byte length of a remote object (HEAD-equivalent).
    fn get_length<'a>(
        &'a self,
        url: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Result<(u16, u64), EngineError>>;

    /// Ranged GET of `length` bytes starting at `offset`.
    fn get<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        length: u64,
        token: &'a str,
    ) -> BoxFuture<'a, Result<GetResponse, EngineError>>;

    /// Ranged PUT of `body` at `offset` within a file of `total_len` bytes.
    fn put<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        offset: u64,
        length: u64,
        total_len: u64,
        token: &'a str,
    ) -> BoxFuture<'a, Result<PutResponse, EngineError>>;

    /// Form POST (used for upload completion).
    fn post<'a>(
        &'a self,
        url: &'a str,
        form: Vec<(String, String)>,
        token: &'a str,
    ) -> BoxFuture<'a, Result<PostResponse, EngineError>>;
}

/// Session token provider.
///
/// The engine fetches the current token before each HTTP exchange and fires
/// [`SessionAuth::token_may_have_changed`] after it, giving the auth layer a
/// chance to refresh a rolling cookie.
pub trait SessionAuth: Send + Sync {
    fn current_token(&self) -> String;
    fn token_may_have_changed(&self);
}

/// Characters percent-encoded in object-name path segments.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Builds the remote URL for an object name beneath the store base URL.
///
/// Path separators in `name` are preserved so nested names map to nested
/// URL segments; everything else is percent-encoded per segment.
pub fn object_url(base_url: &str, name: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let encoded: Vec<String> = name
        .split('/')
        .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT).to_string())
        .collect();
    format!("{}/{}", base, encoded.join("/"))
}

/// Characters percent-encoded in query values.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=');

/// Appends the store-assigned version to an object URL as a query
/// parameter, percent-encoding the value.
pub fn versioned_url(url: &str, version: &str) -> String {
    format!("{url}?version={}", utf8_percent_encode(version, QUERY_VALUE))
}

/// Maps an HTTP status code to a fixed human-readable reason phrase for
/// failure messages.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown Status",
    }
}
