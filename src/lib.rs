//! Object Transfer
//!
//! A reliable transfer engine for a cloud object store. It uploads files (in
//! one request, or split into parts run in parallel), downloads them with
//! end-to-end sha1 verification, and retries every request according to how
//! it failed.
//!
//! # Overview
//!
//! Each request to the service goes through a [`StorageService`], which makes
//! exactly one exchange on the wire. Everything that makes transfers reliable
//! sits on top of it:
//!
//! - **Retries**: [`Retryer`] classifies failures and retries them immediately,
//!   after an exponential backoff, or not at all, under a [`RetryPolicy`]
//! - **Session reuse**: [`AccountAuthorizationCache`] authorizes once and
//!   shares the session until the service rejects it
//! - **Upload url pooling**: [`UploadUrlCache`] hands released upload urls to
//!   the next upload, keeping pools for a bounded number of buckets
//! - **Part planning**: [`PartSizes`] decides when to split content and how
//! - **Verified downloads**: [`ContentWriter`] checks the sha1 of the bytes
//!   that came off the network and, again, of the bytes that were stored
//! - **Progress**: an [`UploadListener`] on the request hears how every part
//!   is doing
//! - **Interruption**: [`Interrupter::current`] gives the handle that wakes the
//!   calling thread's retry waits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use object_transfer::{
//!     AccountAuthorizer, DownloadRequest, FileContentSource, StorageService,
//!     TransferClient, TransferConfig, UploadFileRequest,
//! };
//! use std::sync::Arc;
//!
//! # fn run(
//! #     service: Arc<dyn StorageService>,
//! #     authorizer: Arc<dyn AccountAuthorizer>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransferConfig::from_file("transfer.yaml")?;
//! let client = TransferClient::new(config, service, authorizer)?;
//!
//! let source = Arc::new(FileContentSource::new("backup.tar"));
//! let request = UploadFileRequest::new("bucket-id", "backup.tar", "application/x-tar", source);
//! let file = client.upload(&request)?;
//!
//! client.download_to_file(&DownloadRequest::new(&file.file_id), "restored.tar")?;
//!
//! let stats = client.metrics().get_stats();
//! println!("attempts: {}, retries: {}", stats.attempts, stats.retries);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! max_attempts: 8                     # attempts per operation, including the first
//! initial_backoff_secs: 1             # doubles after every delayed retry
//! upload_url_cache_buckets: 100       # buckets with pooled upload urls
//! max_parts: 10000                    # parts per large file
//! copy_buffer_size: 4096              # download copy buffer
//! max_concurrent_parts: 4             # parts uploaded at once
//! verify_downloads_by_rereading: true # re-read downloaded files to check them
//! ```
//!
//! See [`TransferConfig`] for details.

pub mod auth_cache;
pub mod client;
pub mod config;
pub mod content;
pub mod content_writer;
pub mod destination;
pub mod error;
pub mod hashing;
pub mod headers;
pub mod lru;
pub mod metrics;
pub mod models;
pub mod part_sizes;
pub mod progress;
pub mod range_reader;
pub mod retry;
pub mod service;
pub mod sleeper;
pub mod upload_url_cache;
mod uploader;

// Re-export commonly used types
pub use auth_cache::{AccountAuthorizationCache, AccountAuthorizer};
pub use client::TransferClient;
pub use config::{TransferConfig, MAX_PARTS_PER_LARGE_FILE};
pub use content::{
    ContentSource, ContentStream, FileContentSource, MemoryContentSource, PartOfContentSource,
    UploadBody,
};
pub use content_writer::{ContentReceipt, ContentWriter};
pub use destination::{Destination, FileDestination, MemoryDestination, StreamDestination};
pub use error::{
    ErrorCategory, NetworkFailure, RequestCategory, Result, ServiceFault, TransferError,
    VerifyStage,
};
pub use headers::ResponseHeaders;
pub use lru::BoundedLruMap;
pub use metrics::{MetricsSnapshot, TransferMetrics};
pub use models::{
    AccountAuthorization, ByteRange, FileVersion, Part, PartSpec, UploadPartUrl, UploadUrl,
};
pub use part_sizes::PartSizes;
pub use progress::{
    ByteProgressListener, PartProgressAdapter, ProgressReader, ThrottledByteProgress,
    UploadListener, UploadProgress, UploadState,
};
pub use range_reader::RangeReader;
pub use retry::{Attempt, DefaultRetryPolicy, RetryPolicy, RetryPolicySupplier, Retryer};
pub use service::{
    DownloadHandler, DownloadRequest, StartLargeFileRequest, StorageService, UploadFileRequest,
};
pub use sleeper::{Interrupter, Sleeper, ThreadSleeper};
pub use upload_url_cache::{UploadPartUrlCache, UploadUrlCache};
