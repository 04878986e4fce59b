//! One HTTP exchange on a pooled connection.
//!
//! Each verb is a variant of [`Exchange`] carrying exactly what it needs: GET
//! owns a body sink, PUT a body source, MOVE a destination, TRUNCATE a target
//! length. The executor resolves the caller's credential, locks a pooled
//! connection, performs the exchange synchronously and returns the parsed
//! response headers. The HTTP status is left for the caller to judge.

use crate::credentials::{Caller, CredentialResolver};
use crate::error::TransportError;
use crate::pool::{ConnectionPool, Owner, PooledConnection};
use bytes::Bytes;
use chrono::NaiveDateTime;
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderName, HeaderValue, LAST_MODIFIED, LOCATION, RANGE};
use std::fs::File;
use std::io::Write;
use tracing::debug;

/// Inclusive byte range `[start, finish]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub finish: u64,
}

impl ByteRange {
    /// The range covering `len` bytes from `start`; `None` when `len` is 0.
    pub fn new(start: u64, len: u64) -> Option<Self> {
        (len > 0).then(|| Self {
            start,
            finish: start + len - 1,
        })
    }
}

/// Where a GET's response body goes.
pub enum Sink<'a> {
    Discard,
    Buffer(&'a mut Vec<u8>),
    File(&'a mut File),
}

impl Sink<'_> {
    fn accept(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Sink::Discard => Ok(()),
            Sink::Buffer(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Sink::File(file) => file.write_all(chunk),
        }
    }
}

pub enum Exchange<'a> {
    Head,
    Get { range: Option<ByteRange>, sink: Sink<'a> },
    Put { range: Option<ByteRange>, body: &'a [u8] },
    Delete,
    Move { destination: &'a str },
    /// A bodiless PUT that sets the resource's length.
    Truncate { length: u64 },
}

impl Exchange<'_> {
    fn name(&self) -> &'static str {
        match self {
            Exchange::Head => "HEAD",
            Exchange::Get { .. } => "GET",
            Exchange::Put { .. } => "PUT",
            Exchange::Delete => "DELETE",
            Exchange::Move { .. } => "MOVE",
            Exchange::Truncate { .. } => "TRUNCATE",
        }
    }

    fn method(&self) -> Method {
        match self {
            Exchange::Head => Method::HEAD,
            Exchange::Get { .. } => Method::GET,
            Exchange::Put { .. } | Exchange::Truncate { .. } => Method::PUT,
            Exchange::Delete => Method::DELETE,
            Exchange::Move { .. } => Method::from_bytes(b"MOVE").unwrap_or(Method::POST),
        }
    }

    /// `Content-Range` for PUT and TRUNCATE, `Range` for everything else.
    fn range_header(&self) -> Option<(HeaderName, String)> {
        match self {
            Exchange::Put { range: Some(r), .. } => {
                Some((CONTENT_RANGE, format!("bytes {}-{}/*", r.start, r.finish)))
            }
            Exchange::Truncate { length } => Some((CONTENT_RANGE, format!("bytes */*/{length}"))),
            Exchange::Get { range: Some(r), .. } => {
                Some((RANGE, format!("bytes={}-{}", r.start, r.finish)))
            }
            _ => None,
        }
    }
}

pub struct RequestSpec<'a> {
    pub url: &'a str,
    pub exchange: Exchange<'a>,
}

/// What the response headers said.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    /// Absent is not the same as zero.
    pub length: Option<u64>,
    /// Seconds since the epoch, UTC.
    pub modified: Option<i64>,
    /// Only recorded for 3xx responses.
    pub location: Option<String>,
}

impl ResponseMeta {
    /// Folds one response header into the record.
    pub fn capture(&mut self, name: &HeaderName, value: &HeaderValue) {
        let Ok(value) = value.to_str() else {
            return;
        };
        let value = value.trim();

        if *name == CONTENT_LENGTH {
            if let Ok(length) = value.parse() {
                self.length = Some(length);
            }
        } else if *name == LOCATION {
            self.location = Some(value.to_string());
        } else if *name == LAST_MODIFIED {
            if let Some(modified) = parse_http_date(value) {
                self.modified = Some(modified);
            }
        }
    }
}

/// RFC 1123 first, then RFC 850, then asctime; all read as UTC.
pub fn parse_http_date(value: &str) -> Option<i64> {
    const FORMATS: [&str; 3] = [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %d %H:%M:%S %Y",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|datetime| datetime.and_utc().timestamp())
}

/// Runs exchanges on behalf of callers.
pub struct Executor {
    pool: ConnectionPool,
    credentials: CredentialResolver,
}

impl Executor {
    pub fn new(pool: ConnectionPool, credentials: CredentialResolver) -> Self {
        Self { pool, credentials }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Performs one exchange; `Err` only when the exchange itself failed.
    ///
    /// Client certificates are only looked up for `https://` targets.
    pub fn perform(&self, caller: &Caller, request: RequestSpec<'_>) -> Result<ResponseMeta, TransportError> {
        let credential = if request.url.starts_with("https://") {
            self.credentials.resolve(caller)
        } else {
            None
        };
        let owner = Owner {
            identity: caller.uid,
            credential,
        };

        let conn = self.pool.acquire(&owner)?;
        let name = request.exchange.name();
        let range = request.exchange.range_header().map(|(_, value)| value);
        debug!(slot = conn.slot(), uid = caller.uid, range = ?range, "{} {}", name, request.url);

        let meta = perform_on(&conn, request)?;
        debug!(status = meta.status, length = ?meta.length, "{} complete", name);
        Ok(meta)
    }
}

fn perform_on(conn: &PooledConnection<'_>, request: RequestSpec<'_>) -> Result<ResponseMeta, TransportError> {
    let RequestSpec { url, mut exchange } = request;

    let mut builder = conn.client().request(exchange.method(), url);
    if let Some((name, value)) = exchange.range_header() {
        builder = builder.header(name, value);
    }
    builder = match &exchange {
        Exchange::Put { body, .. } => builder.body(Bytes::copy_from_slice(body)),
        Exchange::Truncate { .. } => builder.body(Bytes::new()),
        Exchange::Move { destination } => builder.header("Destination", *destination),
        _ => builder,
    };

    conn.block_on(async {
        let mut response = builder.send().await?;

        let mut meta = ResponseMeta {
            status: response.status().as_u16(),
            ..ResponseMeta::default()
        };
        for (name, value) in response.headers() {
            meta.capture(name, value);
        }
        if !response.status().is_redirection() {
            meta.location = None;
        }

        let mut discard = Sink::Discard;
        let sink = match &mut exchange {
            Exchange::Get { sink, .. } => sink,
            _ => &mut discard,
        };
        while let Some(chunk) = response.chunk().await? {
            sink.accept(&chunk).map_err(TransportError::Sink)?;
        }

        Ok::<_, TransportError>(meta)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_range_uses_content_range() {
        let exchange = Exchange::Put {
            range: ByteRange::new(4096, 100),
            body: &[0; 100],
        };
        assert_eq!(
            exchange.range_header(),
            Some((CONTENT_RANGE, "bytes 4096-4195/*".to_string()))
        );
    }

    #[test]
    fn truncate_carries_only_the_length() {
        let exchange = Exchange::Truncate { length: 10 };
        assert_eq!(exchange.range_header(), Some((CONTENT_RANGE, "bytes */*/10".to_string())));
        assert_eq!(exchange.method(), Method::PUT);
    }

    #[test]
    fn get_range_uses_range() {
        let mut buf = Vec::new();
        let exchange = Exchange::Get {
            range: ByteRange::new(0, 4096),
            sink: Sink::Buffer(&mut buf),
        };
        assert_eq!(exchange.range_header(), Some((RANGE, "bytes=0-4095".to_string())));
    }

    #[test]
    fn empty_put_and_plain_verbs_have_no_range() {
        let exchange = Exchange::Put { range: ByteRange::new(0, 0), body: &[] };
        assert_eq!(exchange.range_header(), None);
        assert_eq!(Exchange::Delete.range_header(), None);
        assert_eq!(Exchange::Head.range_header(), None);
        assert_eq!(Exchange::Move { destination: "http://h/b" }.method().as_str(), "MOVE");
    }

    #[test]
    fn captures_length_location_and_date() {
        let mut meta = ResponseMeta::default();
        meta.capture(&CONTENT_LENGTH, &HeaderValue::from_static("0"));
        meta.capture(&LOCATION, &HeaderValue::from_static("http://h/dir/"));
        meta.capture(&LAST_MODIFIED, &HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_eq!(meta.length, Some(0));
        assert_eq!(meta.location.as_deref(), Some("http://h/dir/"));
        assert_eq!(meta.modified, Some(784_111_777));
    }

    #[test]
    fn unparseable_headers_leave_fields_unset() {
        let mut meta = ResponseMeta::default();
        meta.capture(&CONTENT_LENGTH, &HeaderValue::from_static("lots"));
        meta.capture(&LAST_MODIFIED, &HeaderValue::from_static("yesterday"));
        assert_eq!(meta, ResponseMeta::default());
    }

    #[test]
    fn all_three_date_formats_are_utc() {
        let expected = Some(784_111_777);
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), expected);
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), expected);
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), expected);
    }

    #[test]
    fn rfc850_dates_spell_out_the_weekday() {
        assert_eq!(parse_http_date("Tuesday, 15-Nov-94 12:45:26 GMT"), Some(784_903_526));
        assert_eq!(parse_http_date("Wednesday, 09-Jun-21 10:18:14 GMT"), Some(1_623_233_894));
    }

    #[test]
    fn byte_range_is_inclusive() {
        assert_eq!(ByteRange::new(10, 1), Some(ByteRange { start: 10, finish: 10 }));
        assert_eq!(ByteRange::new(10, 0), None);
    }
}
