//! Peer HTTP API: paths and response bodies

use crate::error::{Error, Result};
use crate::types::{FileEntry, FileListing, PeerStatus, UploadAck};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

/// `GET` file listing
pub const LIST_PATH: &str = "/api/list";
/// `GET` liveness check
pub const PING_PATH: &str = "/api/ping";
/// `POST` multipart upload
pub const UPLOAD_PATH: &str = "/upload";
/// Prefix for `GET /download/{name}`
pub const DOWNLOAD_PREFIX: &str = "/download/";

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "file";
/// Content type of the uploaded part
pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Everything except RFC 3986 unreserved characters is escaped
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Path for downloading `name`, escaped as a single segment
#[must_use]
pub fn download_path(name: &str) -> String {
    format!("{DOWNLOAD_PREFIX}{}", utf8_percent_encode(name, PATH_SEGMENT))
}

#[derive(Deserialize)]
struct ListResponse {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "savedAs")]
    saved_as: Option<String>,
}

/// Parse a `/api/list` body
///
/// An empty body is an empty listing. Anything else must be an object with a
/// `files` array of objects carrying a string `name`.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the body is not a valid listing.
pub fn parse_listing(body: &[u8]) -> Result<FileListing> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FileListing::default());
    }

    let response: ListResponse =
        serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(FileListing::new(response.files))
}

/// Build an upload acknowledgement from the response body
///
/// The body is optional; anything that is not a JSON object with `savedAs`
/// yields an ack without a stored name.
#[must_use]
pub fn parse_upload_ack(name: &str, body: &[u8]) -> UploadAck {
    let saved_as = serde_json::from_slice::<UploadResponse>(body)
        .ok()
        .and_then(|r| r.saved_as)
        .filter(|s| !s.is_empty());

    UploadAck {
        name: name.to_string(),
        saved_as,
    }
}

/// Parse a `/api/ping` body
///
/// # Errors
///
/// Returns [`Error::Parse`] if the body is not a JSON object.
pub fn parse_ping(body: &[u8]) -> Result<PeerStatus> {
    serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))
}
