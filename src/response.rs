use std::io::Read;

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::OpsResult;
use crate::error::Error;
use crate::util::{status_line, truncate_body};

pub(crate) type BodyStream = Box<dyn Read + Send>;

const NULL_BODY: &str = "null";

enum BodySlot {
    Unread(BodyStream),
    Cached(String),
    Released,
}

/// Outcome of an exchange: the terminal attempt's status, headers, and a
/// body that is read from the transport at most once.
pub struct ExchangeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BodySlot,
    max_body_bytes: usize,
}

impl std::fmt::Debug for ExchangeResponse {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            BodySlot::Unread(_) => "unread",
            BodySlot::Cached(_) => "cached",
            BodySlot::Released => "released",
        };
        formatter
            .debug_struct("ExchangeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl ExchangeResponse {
    pub(crate) fn streaming(
        status: StatusCode,
        headers: HeaderMap,
        body: BodyStream,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            status,
            headers,
            body: BodySlot::Unread(body),
            max_body_bytes: max_body_bytes.max(1),
        }
    }

    /// Builds a response whose body is already in memory.
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: BodySlot::Cached(normalize_body(body.into())),
            max_body_bytes: usize::MAX,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn status_line(&self) -> String {
        status_line(self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the body as text, reading and caching it on first use.
    ///
    /// A literal `null` body is reported as the empty string. Decoding is
    /// lossy: invalid UTF-8 sequences become `U+FFFD`. A body over the
    /// executor's size limit fails with [`Error::ResponseBodyTooLarge`].
    pub fn body_text(&mut self) -> OpsResult<&str> {
        self.fill_body()?;
        match &self.body {
            BodySlot::Cached(text) => Ok(text),
            BodySlot::Unread(_) | BodySlot::Released => Err(released_body_error()),
        }
    }

    pub fn json<T>(&mut self) -> OpsResult<T>
    where
        T: DeserializeOwned,
    {
        let text = self.body_text()?;
        serde_json::from_str(text).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(text),
        })
    }

    /// Consumes the response into `(status code, body text)`.
    pub fn into_parts(mut self) -> OpsResult<(u16, String)> {
        self.fill_body()?;
        let code = self.status_code();
        match std::mem::replace(&mut self.body, BodySlot::Released) {
            BodySlot::Cached(text) => Ok((code, text)),
            BodySlot::Unread(_) | BodySlot::Released => Err(released_body_error()),
        }
    }

    /// Releases an unread stream without reading it; a cached body is kept.
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if matches!(self.body, BodySlot::Unread(_)) {
            self.body = BodySlot::Released;
            trace!("response body released unread");
        }
    }

    pub(crate) fn fill_body(&mut self) -> OpsResult<()> {
        let mut stream = match std::mem::replace(&mut self.body, BodySlot::Released) {
            BodySlot::Unread(stream) => stream,
            other => {
                self.body = other;
                return Ok(());
            }
        };

        let raw = read_body_limited(&mut stream, self.max_body_bytes)?;
        trace!(bytes = raw.len(), "response body read");
        self.body = BodySlot::Cached(normalize_body(String::from_utf8_lossy(&raw).into_owned()));
        Ok(())
    }
}

fn read_body_limited(stream: &mut BodyStream, max_bytes: usize) -> OpsResult<Vec<u8>> {
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = stream
            .read(&mut chunk)
            .map_err(|source| Error::ReadingResponseBody { source })?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(Error::ResponseBodyTooLarge {
                limit_bytes: max_bytes,
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(collected)
}

fn normalize_body(text: String) -> String {
    if text == NULL_BODY { String::new() } else { text }
}

fn released_body_error() -> Error {
    Error::ReadingResponseBody {
        source: std::io::Error::other("response body was released before it was read"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::{HeaderMap, StatusCode};
    use serde::Deserialize;

    use super::ExchangeResponse;
    use crate::error::Error;

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        reads: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(buf)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer went away",
            ))
        }
    }

    const LIMIT: usize = 1024;

    fn counting(body: &str) -> (ExchangeResponse, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: Cursor::new(body.as_bytes().to_vec()),
            reads: Arc::clone(&reads),
        };
        let response =
            ExchangeResponse::streaming(StatusCode::OK, HeaderMap::new(), Box::new(reader), LIMIT);
        (response, reads)
    }

    #[test]
    fn body_text_reads_stream_once_and_caches() {
        let (mut response, reads) = counting("hello");

        assert_eq!(response.body_text().expect("first read"), "hello");
        let after_first = reads.load(Ordering::SeqCst);
        assert!(after_first > 0);

        assert_eq!(response.body_text().expect("second read"), "hello");
        assert_eq!(reads.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn null_body_is_normalized_to_empty() {
        let (mut response, _) = counting("null");
        assert_eq!(response.body_text().expect("read null body"), "");

        let mut buffered = ExchangeResponse::buffered(StatusCode::OK, HeaderMap::new(), "null");
        assert_eq!(buffered.body_text().expect("read buffered body"), "");
    }

    #[test]
    fn read_failure_surfaces_reading_response_body_error() {
        let mut response = ExchangeResponse::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            Box::new(FailingReader),
            LIMIT,
        );
        let error = response.body_text().expect_err("read should fail");
        assert!(matches!(error, Error::ReadingResponseBody { .. }));
    }

    #[test]
    fn close_releases_unread_body_without_reading_it() {
        let (mut response, reads) = counting("unused");
        response.close();
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        response.close();

        let error = response.body_text().expect_err("body was released");
        assert!(matches!(error, Error::ReadingResponseBody { .. }));
    }

    #[test]
    fn body_over_limit_is_rejected() {
        let body = "x".repeat(LIMIT + 1);
        let (mut response, _) = counting(&body);

        match response.body_text().expect_err("body exceeds limit") {
            Error::ResponseBodyTooLarge {
                limit_bytes,
                actual_bytes,
            } => {
                assert_eq!(limit_bytes, LIMIT);
                assert_eq!(actual_bytes, LIMIT + 1);
            }
            other => panic!("unexpected error variant: {other}"),
        }

        let (mut at_limit, _) = counting(&"y".repeat(LIMIT));
        assert_eq!(at_limit.body_text().expect("body at limit").len(), LIMIT);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let reader = Cursor::new(vec![b'o', b'k', 0xff]);
        let mut response =
            ExchangeResponse::streaming(StatusCode::OK, HeaderMap::new(), Box::new(reader), LIMIT);
        assert_eq!(response.body_text().expect("lossy read"), "ok\u{fffd}");
    }

    #[test]
    fn close_after_read_keeps_cached_text() {
        let (mut response, _) = counting("kept");
        response.body_text().expect("read body");
        response.close();
        assert_eq!(response.body_text().expect("cached body"), "kept");
    }

    #[test]
    fn json_and_into_parts_use_cached_body() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: u32,
        }

        let (mut response, _) = counting(r#"{"id":7}"#);
        assert_eq!(response.json::<Item>().expect("decode json"), Item { id: 7 });
        assert_eq!(
            response.into_parts().expect("into parts"),
            (200, r#"{"id":7}"#.to_owned())
        );
    }

    #[test]
    fn status_line_reports_code_and_reason() {
        let response = ExchangeResponse::buffered(StatusCode::CREATED, HeaderMap::new(), "");
        assert_eq!(response.status_line(), "201 Created");
        assert_eq!(response.status_code(), 201);
    }
}
