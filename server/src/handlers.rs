use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::OriginState;

/// Every request outside `/health` lands here.
pub async fn dispatch(
    State(state): State<Arc<OriginState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(path) = percent_decode_str(uri.path()).decode_utf8() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.is_forbidden(&path) {
        debug!("{} {} is forbidden", method, path);
        return StatusCode::FORBIDDEN.into_response();
    }

    match method.as_str() {
        "GET" => get_resource(&state, &path, uri.path(), &headers, true),
        "HEAD" => get_resource(&state, &path, uri.path(), &headers, false),
        "PUT" => put_resource(&state, &path, &headers, &body),
        "DELETE" => delete_resource(&state, &path),
        "MOVE" => move_resource(&state, &path, &headers),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn status_for(e: &io::Error) -> StatusCode {
    match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::DirectoryNotEmpty | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn unix_seconds(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

fn get_resource(state: &OriginState, path: &str, raw_path: &str, headers: &HeaderMap, with_body: bool) -> Response {
    let Some(target) = state.resolve(path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let meta = match fs::metadata(&target) {
        Ok(meta) => meta,
        Err(e) => return status_for(&e).into_response(),
    };

    if meta.is_dir() && !path.ends_with('/') {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        let location = format!("http://{host}{raw_path}/");
        debug!("redirecting {} to {}", path, location);
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(modified) = meta.modified() {
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            response_headers.insert(header::LAST_MODIFIED, value);
        }
    }

    if meta.is_dir() {
        let index = match render_index(&target) {
            Ok(index) => index,
            Err(e) => return status_for(&e).into_response(),
        };
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        return finish(StatusCode::OK, response_headers, index.into_bytes(), with_body);
    }

    let len = meta.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    let (status, start, end) = match range {
        None => (StatusCode::OK, 0, len),
        Some((start, _)) if start >= len => {
            let unsatisfied = HeaderValue::from_str(&format!("bytes */{len}"));
            if let Ok(value) = unsatisfied {
                response_headers.insert(header::CONTENT_RANGE, value);
            }
            return (StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response();
        }
        Some((start, finish)) => {
            let end = finish.map_or(len, |f| (f + 1).min(len));
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end - 1, len)) {
                response_headers.insert(header::CONTENT_RANGE, value);
            }
            (StatusCode::PARTIAL_CONTENT, start, end)
        }
    };

    if !with_body {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start));
        return (status, response_headers).into_response();
    }

    let mut content = vec![0u8; (end - start) as usize];
    if let Err(e) = File::open(&target).and_then(|f| f.read_exact_at(&mut content, start)) {
        warn!("cannot read {}: {}", target.display(), e);
        return status_for(&e).into_response();
    }
    finish(status, response_headers, content, true)
}

/// Sets `Content-Length` explicitly so HEAD answers carry the real size.
fn finish(status: StatusCode, mut headers: HeaderMap, body: Vec<u8>, with_body: bool) -> Response {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    if with_body {
        (status, headers, body).into_response()
    } else {
        (status, headers).into_response()
    }
}

/// `bytes=a-b` or `bytes=a-`.
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, finish) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let finish = match finish.trim() {
        "" => None,
        f => Some(f.parse().ok()?),
    };
    Some((start, finish))
}

fn render_index(dir: &Path) -> io::Result<String> {
    let mut entries: Vec<(String, u64, i64)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if meta.is_dir() {
            name.push('/');
        }
        let modified = meta.modified().map(unix_seconds).unwrap_or(0);
        let size = if meta.is_dir() { 0 } else { meta.len() };
        entries.push((name, size, modified));
    }
    entries.sort();

    let mut html = String::from("<html><body>\n");
    for (name, size, modified) in entries {
        html.push_str(&format!(
            "<a href=\"{name}\" content-length=\"{size}\" last-modified=\"{modified}\">{name}</a><br>\n"
        ));
    }
    html.push_str("</body></html>\n");
    Ok(html)
}

enum Upload {
    Whole,
    At(u64),
    Truncate(u64),
}

/// `bytes a-b/*` writes at `a`; `bytes */*/N`, `bytes *-*/N` and `bytes */N`
/// set the length to `N`.
fn parse_content_range(value: &str) -> Option<Upload> {
    let spec = value.strip_prefix("bytes ")?.trim();
    let (range, total) = spec.rsplit_once('/')?;
    if matches!(range, "*" | "*/*" | "*-*") {
        return total.parse().ok().map(Upload::Truncate);
    }
    let (start, _) = range.split_once('-')?;
    start.parse().ok().map(Upload::At)
}

fn put_resource(state: &OriginState, path: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let Some(target) = state.resolve(path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if path.ends_with('/') {
        return match fs::create_dir(&target) {
            Ok(()) => StatusCode::CREATED.into_response(),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => StatusCode::OK.into_response(),
            Err(e) => status_for(&e).into_response(),
        };
    }

    let upload = match headers.get(header::CONTENT_RANGE) {
        None => Upload::Whole,
        Some(value) => match value.to_str().ok().and_then(parse_content_range) {
            Some(upload) => upload,
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
    };

    let existed = target.exists();
    let result = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(matches!(upload, Upload::Whole))
        .open(&target)
        .and_then(|file| match upload {
            Upload::Whole => file.write_all_at(body, 0),
            Upload::At(offset) => file.write_all_at(body, offset),
            Upload::Truncate(len) => file.set_len(len),
        });

    match result {
        Ok(()) if existed => StatusCode::OK.into_response(),
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => {
            debug!("PUT {} failed: {}", path, e);
            status_for(&e).into_response()
        }
    }
}

fn delete_resource(state: &OriginState, path: &str) -> Response {
    let Some(target) = state.resolve(path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let result = match fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(&target),
        Ok(_) => fs::remove_file(&target),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => status_for(&e).into_response(),
    }
}

fn move_resource(state: &OriginState, path: &str, headers: &HeaderMap) -> Response {
    let Some(source) = state.resolve(path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let destination = headers
        .get("Destination")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| url::Url::parse(v).ok())
        .and_then(|url| percent_decode_str(url.path()).decode_utf8().ok().map(|p| p.into_owned()));
    let Some(destination) = destination else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.is_forbidden(&destination) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(target) = state.resolve(&destination) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match fs::rename(&source, &target) {
        Ok(()) => {
            debug!("moved {} to {}", path, destination);
            StatusCode::CREATED.into_response()
        }
        Err(e) => status_for(&e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges() {
        assert_eq!(parse_range("bytes=0-4095"), Some((0, Some(4095))));
        assert_eq!(parse_range("bytes=10-"), Some((10, None)));
        assert_eq!(parse_range("items=1-2"), None);
    }

    #[test]
    fn content_ranges() {
        assert!(matches!(parse_content_range("bytes 4096-4195/*"), Some(Upload::At(4096))));
        assert!(matches!(parse_content_range("bytes */*/10"), Some(Upload::Truncate(10))));
        assert!(matches!(parse_content_range("bytes *-*/7"), Some(Upload::Truncate(7))));
        assert!(matches!(parse_content_range("bytes */0"), Some(Upload::Truncate(0))));
        assert!(parse_content_range("bytes x-y/*").is_none());
    }

    #[test]
    fn dates_are_rfc1123() {
        let epoch_plus = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        assert_eq!(http_date(epoch_plus), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn index_lists_children_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "0123456789").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let html = render_index(dir.path()).unwrap();
        assert!(html.contains("<a href=\"a.txt\" content-length=\"10\" last-modified=\""));
        assert!(html.contains("<a href=\"sub/\" content-length=\"0\""));
    }
}
