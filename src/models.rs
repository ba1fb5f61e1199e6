//! Core data models shared by the transfer components

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};

/// Represents a byte range for HTTP Range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(TransferError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(TransferError::Precondition(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Get the size of this byte range in bytes
    ///
    /// A range built with `start > end` is empty; `0..=u64::MAX` saturates.
    pub fn size(&self) -> u64 {
        match self.end.checked_sub(self.start) {
            Some(span) => span.saturating_add(1),
            None => 0,
        }
    }

    /// Parse a ByteRange from an HTTP Range header value (e.g., "bytes=0-1023")
    pub fn from_header(header: &str) -> Result<Self> {
        let header = header.trim();

        let range_part = header.strip_prefix("bytes=").ok_or_else(|| {
            TransferError::Precondition(format!(
                "Range header must start with 'bytes=', got: {}",
                header
            ))
        })?;

        let (start, end) = range_part.split_once('-').ok_or_else(|| {
            TransferError::Precondition(format!(
                "Invalid range format, expected 'start-end', got: {}",
                range_part
            ))
        })?;

        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|e| TransferError::Precondition(format!("Invalid start value: {}", e)))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|e| TransferError::Precondition(format!("Invalid end value: {}", e)))?;

        ByteRange::new(start, end)
    }

    /// Convert this ByteRange to an HTTP Range header value
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One part of a large file
///
/// Parts are numbered from 1 and cover `[start, start + length)` of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartSpec {
    pub part_number: u32,
    pub start: u64,
    pub length: u64,
}

impl PartSpec {
    pub fn new(part_number: u32, start: u64, length: u64) -> Self {
        PartSpec {
            part_number,
            start,
            length,
        }
    }

    /// One past the last byte of this part
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

/// A short-lived url and token for uploading one file to a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadUrl {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// A short-lived url and token for uploading parts of one large file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartUrl {
    pub file_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// The session returned by authorizing an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAuthorization {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    pub recommended_part_size: u64,
    pub absolute_minimum_part_size: u64,
}

/// What the service knows about a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
    /// "none" for large files
    pub content_sha1: Option<String>,
    /// The whole-file sha1 recorded when a large file was started, if known
    pub large_file_sha1: Option<String>,
}

/// A part that the service has accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub file_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub content_sha1: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_new() {
        let range = ByteRange::new(0, 1023).unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 1023);
        assert_eq!(range.size(), 1024);
    }

    #[test]
    fn test_byte_range_invalid() {
        assert!(ByteRange::new(100, 50).is_err());
    }

    #[test]
    fn test_byte_range_header_round_trip() {
        let range = ByteRange::from_header("bytes=10-19").unwrap();
        assert_eq!(range, ByteRange::new(10, 19).unwrap());
        assert_eq!(range.to_header(), "bytes=10-19");
    }

    #[test]
    fn test_byte_range_bad_header() {
        assert!(ByteRange::from_header("items=0-1").is_err());
        assert!(ByteRange::from_header("bytes=5").is_err());
        assert!(ByteRange::from_header("bytes=a-9").is_err());
    }

    #[test]
    fn test_byte_range_size_at_extremes() {
        let whole = ByteRange {
            start: 0,
            end: u64::MAX,
        };
        assert_eq!(whole.size(), u64::MAX);

        let backwards = ByteRange { start: 10, end: 5 };
        assert_eq!(backwards.size(), 0);
    }

    #[test]
    fn test_part_spec_end() {
        let part = PartSpec::new(2, 5, 5);
        assert_eq!(part.end(), 10);
        assert_eq!(PartSpec::new(1, u64::MAX - 1, 10).end(), u64::MAX);
    }
}
