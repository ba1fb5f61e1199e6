//! The storage service seen from the transfer engine
//!
//! [`StorageService`] is the seam between the engine and the wire. Each call
//! makes exactly one request; retrying, caching and verification all happen
//! above it.

use crate::content::{ContentSource, UploadBody};
use crate::error::Result;
use crate::headers::{ResponseHeaders, LARGE_FILE_SHA1_INFO_NAME};
use crate::models::{AccountAuthorization, ByteRange, FileVersion, Part, UploadPartUrl, UploadUrl};
use crate::progress::UploadListener;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Receives a download response: its headers and its body
pub type DownloadHandler<'a> = dyn FnMut(&ResponseHeaders, &mut dyn Read) -> Result<()> + 'a;

/// One request/response exchange with the storage service
pub trait StorageService: Send + Sync {
    fn get_upload_url(&self, auth: &AccountAuthorization, bucket_id: &str) -> Result<UploadUrl>;

    fn upload_file(
        &self,
        url: &UploadUrl,
        request: &UploadFileRequest,
        body: UploadBody,
    ) -> Result<FileVersion>;

    fn start_large_file(
        &self,
        auth: &AccountAuthorization,
        request: &StartLargeFileRequest,
    ) -> Result<FileVersion>;

    fn get_upload_part_url(&self, auth: &AccountAuthorization, file_id: &str) -> Result<UploadPartUrl>;

    fn upload_part(&self, url: &UploadPartUrl, part_number: u32, body: UploadBody) -> Result<Part>;

    fn finish_large_file(
        &self,
        auth: &AccountAuthorization,
        file_id: &str,
        part_sha1s: &[String],
    ) -> Result<FileVersion>;

    /// Send a download request and pass the response to `handler`
    fn download(
        &self,
        auth: &AccountAuthorization,
        request: &DownloadRequest,
        handler: &mut DownloadHandler<'_>,
    ) -> Result<()>;
}

/// Everything needed to upload one file
#[derive(Clone)]
pub struct UploadFileRequest {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_info: BTreeMap<String, String>,
    pub source: Arc<dyn ContentSource>,
    /// Hears about the progress of every part
    pub listener: Option<Arc<dyn UploadListener>>,
}

impl UploadFileRequest {
    pub fn new(
        bucket_id: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        UploadFileRequest {
            bucket_id: bucket_id.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            file_info: BTreeMap::new(),
            source,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_file_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.file_info.insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for UploadFileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFileRequest")
            .field("bucket_id", &self.bucket_id)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("file_info", &self.file_info)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

/// The request that creates a large file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLargeFileRequest {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_info: BTreeMap<String, String>,
}

impl StartLargeFileRequest {
    /// Build from an upload request, recording the whole-file sha1 when known
    pub fn from_upload(request: &UploadFileRequest, large_file_sha1: Option<&str>) -> Self {
        let mut file_info = request.file_info.clone();
        if let Some(sha1) = large_file_sha1 {
            file_info.insert(LARGE_FILE_SHA1_INFO_NAME.to_string(), sha1.to_string());
        }
        StartLargeFileRequest {
            bucket_id: request.bucket_id.clone(),
            file_name: request.file_name.clone(),
            content_type: request.content_type.clone(),
            file_info,
        }
    }
}

/// A request to download a file, or a range of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub file_id: String,
    pub range: Option<ByteRange>,
}

impl DownloadRequest {
    pub fn new(file_id: impl Into<String>) -> Self {
        DownloadRequest {
            file_id: file_id.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }
}
