//! Header names and accessors for download responses

use http::header::{HeaderName, CONTENT_LENGTH, CONTENT_RANGE};
use http::HeaderMap;

/// Sha1 of a small file's content, or "none" for large files
pub const CONTENT_SHA1: HeaderName = HeaderName::from_static("x-bz-content-sha1");

/// Whole-file sha1 of a large file, when the uploader supplied one
pub const LARGE_FILE_SHA1: HeaderName = HeaderName::from_static("x-bz-info-large_file_sha1");

/// File info name under which a large file's whole-file sha1 is recorded
pub const LARGE_FILE_SHA1_INFO_NAME: &str = "large_file_sha1";

/// Sha1 header value saying the hex sha1 follows the content in the body
pub const HEX_DIGITS_AT_END: &str = "hex_digits_at_end";

/// The content sha1 header value used for large files
pub const SHA1_NONE: &str = "none";

/// Prefix the service puts on sha1s it could not verify at upload time
pub const UNVERIFIED_PREFIX: &str = "unverified:";

/// Read-only view of a download response's headers
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    map: HeaderMap,
}

impl ResponseHeaders {
    pub fn new(map: HeaderMap) -> Self {
        ResponseHeaders { map }
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    fn get_str(&self, name: &HeaderName) -> Option<&str> {
        self.map.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get_str(&CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
    }

    /// Whether this is a partial (range) response
    pub fn has_content_range(&self) -> bool {
        self.map.contains_key(CONTENT_RANGE)
    }

    /// The content sha1, with any "unverified:" prefix removed
    pub fn content_sha1_even_if_unverified(&self) -> Option<&str> {
        self.get_str(&CONTENT_SHA1).map(|sha1| {
            sha1.strip_prefix(UNVERIFIED_PREFIX).unwrap_or(sha1)
        })
    }

    pub fn large_file_sha1(&self) -> Option<&str> {
        self.get_str(&LARGE_FILE_SHA1)
    }

    /// The sha1 the downloaded content should have, if it can be checked
    ///
    /// Range responses can't be checked. Large files report "none" as their
    /// content sha1, in which case the optional large-file sha1 is used.
    pub fn sha1_to_check(&self) -> Option<String> {
        if self.has_content_range() {
            return None;
        }

        if let Some(sha1) = self.content_sha1_even_if_unverified() {
            if sha1 != SHA1_NONE {
                return Some(sha1.to_string());
            }
        }

        self.large_file_sha1().map(str::to_string)
    }
}

impl From<HeaderMap> for ResponseHeaders {
    fn from(map: HeaderMap) -> Self {
        ResponseHeaders::new(map)
    }
}
