//! Shared fakes for integration tests
#![allow(dead_code)]

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE};
use http::HeaderMap;
use object_transfer::hashing::{equal_hex_sha1s, hex_sha1_of_bytes, SHA1_HEX_LEN};
use object_transfer::headers::{CONTENT_SHA1, LARGE_FILE_SHA1, LARGE_FILE_SHA1_INFO_NAME};
use object_transfer::{
    AccountAuthorization, AccountAuthorizer, DownloadHandler, DownloadRequest, FileVersion, Part,
    ResponseHeaders, Result, Sleeper, StartLargeFileRequest, StorageService, TransferError,
    UploadBody, UploadFileRequest, UploadPartUrl, UploadUrl,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Deterministic test content
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn service_unavailable() -> TransferError {
    TransferError::from_http_status(503, "service_unavailable", "try again", None)
}

/// An authorizer that counts its calls
pub struct FakeAuthorizer {
    pub calls: AtomicUsize,
    pub minimum_part_size: u64,
    pub recommended_part_size: u64,
    pub failures: Mutex<VecDeque<TransferError>>,
}

impl FakeAuthorizer {
    pub fn new(minimum_part_size: u64, recommended_part_size: u64) -> Self {
        FakeAuthorizer {
            calls: AtomicUsize::new(0),
            minimum_part_size,
            recommended_part_size,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AccountAuthorizer for FakeAuthorizer {
    fn authorize(&self) -> Result<AccountAuthorization> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(AccountAuthorization {
            account_id: "account-1".to_string(),
            authorization_token: format!("auth-token-{}", call),
            api_url: "https://api.example.com".to_string(),
            download_url: "https://f.example.com".to_string(),
            recommended_part_size: self.recommended_part_size,
            absolute_minimum_part_size: self.minimum_part_size,
        })
    }
}

/// Records requested sleeps instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
    /// Fail the sleep with this index as if interrupted
    pub interrupt_at: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupting_at(index: usize) -> Self {
        RecordingSleeper {
            sleeps: Mutex::new(Vec::new()),
            interrupt_at: Some(index),
        }
    }

    pub fn secs(&self) -> Vec<u64> {
        self.sleeps.lock().iter().map(Duration::as_secs).collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> Result<()> {
        let mut sleeps = self.sleeps.lock();
        let index = sleeps.len();
        sleeps.push(duration);
        if self.interrupt_at == Some(index) {
            return Err(TransferError::Interrupted("test interrupt".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetUploadUrl,
    UploadFile,
    StartLargeFile,
    GetUploadPartUrl,
    UploadPart,
    FinishLargeFile,
    Download,
}

#[derive(Debug, Clone)]
struct StoredFile {
    version: FileVersion,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct LargeFileInProgress {
    file_name: String,
    large_file_sha1: Option<String>,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// An in-memory storage service
#[derive(Default)]
pub struct FakeService {
    next_id: AtomicUsize,
    files: Mutex<HashMap<String, StoredFile>>,
    large_files: Mutex<HashMap<String, LargeFileInProgress>>,
    failures: Mutex<HashMap<Op, VecDeque<TransferError>>>,
    calls: Mutex<HashMap<Op, usize>>,
    /// Upload urls used by each successful small upload, in order
    pub used_upload_urls: Mutex<Vec<String>>,
    /// Part numbers uploaded, in completion order
    pub uploaded_parts: Mutex<Vec<u32>>,
    /// Flip a byte of every download body
    pub corrupt_downloads: AtomicBool,
    /// Break every download body after this many bytes
    pub break_downloads_after: Mutex<Option<usize>>,
    /// Hold each upload url fetch until this many are in flight, or a timeout
    pub upload_url_rendezvous: AtomicUsize,
    upload_url_fetches_in_flight: AtomicUsize,
    /// The most upload url fetches seen running at once
    pub max_upload_url_fetches_in_flight: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: Op, err: TransferError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    fn begin(&self, op: Op) -> Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn wait_for_other_upload_url_fetches(&self) {
        let in_flight = self.upload_url_fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_upload_url_fetches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let wanted = self.upload_url_rendezvous.load(Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.upload_url_fetches_in_flight.load(Ordering::SeqCst) < wanted
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(1));
        }
        let in_flight = self.upload_url_fetches_in_flight.load(Ordering::SeqCst);
        self.max_upload_url_fetches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        self.upload_url_fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Store a small file directly, bypassing the upload path
    pub fn put_file(&self, file_name: &str, bytes: Vec<u8>, content_sha1: Option<String>) -> String {
        let file_id = self.new_id("file");
        let version = FileVersion {
            file_id: file_id.clone(),
            file_name: file_name.to_string(),
            content_length: bytes.len() as u64,
            content_sha1,
            large_file_sha1: None,
        };
        self.files
            .lock()
            .insert(file_id.clone(), StoredFile { version, bytes });
        file_id
    }

    pub fn stored_bytes(&self, file_id: &str) -> Option<Vec<u8>> {
        self.files.lock().get(file_id).map(|f| f.bytes.clone())
    }

    pub fn parts_of(&self, file_id: &str) -> Vec<u32> {
        self.large_files
            .lock()
            .get(file_id)
            .map(|f| f.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Read an upload body, checking its sha1 the way the service would
    fn receive(body: UploadBody) -> Result<(Vec<u8>, String)> {
        let at_end = body.has_sha1_at_end();
        let header = body.sha1_header.clone();
        let expected_len = body.content_length;
        let mut bytes = body.read_all()?;
        if bytes.len() as u64 != expected_len {
            return Err(TransferError::from_http_status(
                400,
                "bad_request",
                format!("expected {} bytes, got {}", expected_len, bytes.len()),
                None,
            ));
        }

        let sha1 = if at_end {
            let split = bytes.len() - SHA1_HEX_LEN;
            let trailer = bytes.split_off(split);
            String::from_utf8_lossy(&trailer).into_owned()
        } else {
            header
        };

        if !equal_hex_sha1s(&sha1, &hex_sha1_of_bytes(&bytes)) {
            return Err(TransferError::from_http_status(
                400,
                "bad_request",
                "sha1 did not match data received",
                None,
            ));
        }
        Ok((bytes, sha1))
    }
}

impl StorageService for FakeService {
    fn get_upload_url(&self, _auth: &AccountAuthorization, bucket_id: &str) -> Result<UploadUrl> {
        self.begin(Op::GetUploadUrl)?;
        self.wait_for_other_upload_url_fetches();
        Ok(UploadUrl {
            bucket_id: bucket_id.to_string(),
            upload_url: format!("https://upload.example.com/{}/{}", bucket_id, self.new_id("url")),
            authorization_token: "upload-token".to_string(),
        })
    }

    fn upload_file(
        &self,
        url: &UploadUrl,
        request: &UploadFileRequest,
        body: UploadBody,
    ) -> Result<FileVersion> {
        self.begin(Op::UploadFile)?;
        let (bytes, sha1) = Self::receive(body)?;
        let file_id = self.put_file(&request.file_name, bytes, Some(sha1));
        self.used_upload_urls.lock().push(url.upload_url.clone());
        Ok(self.files.lock()[&file_id].version.clone())
    }

    fn start_large_file(
        &self,
        _auth: &AccountAuthorization,
        request: &StartLargeFileRequest,
    ) -> Result<FileVersion> {
        self.begin(Op::StartLargeFile)?;
        let file_id = self.new_id("large");
        let large_file_sha1 = request.file_info.get(LARGE_FILE_SHA1_INFO_NAME).cloned();
        self.large_files.lock().insert(
            file_id.clone(),
            LargeFileInProgress {
                file_name: request.file_name.clone(),
                large_file_sha1: large_file_sha1.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(FileVersion {
            file_id,
            file_name: request.file_name.clone(),
            content_length: 0,
            content_sha1: None,
            large_file_sha1,
        })
    }

    fn get_upload_part_url(&self, _auth: &AccountAuthorization, file_id: &str) -> Result<UploadPartUrl> {
        self.begin(Op::GetUploadPartUrl)?;
        Ok(UploadPartUrl {
            file_id: file_id.to_string(),
            upload_url: format!("https://upload.example.com/part/{}", self.new_id("url")),
            authorization_token: "part-token".to_string(),
        })
    }

    fn upload_part(&self, url: &UploadPartUrl, part_number: u32, body: UploadBody) -> Result<Part> {
        self.begin(Op::UploadPart)?;
        let (bytes, sha1) = Self::receive(body)?;
        let content_length = bytes.len() as u64;
        let mut large_files = self.large_files.lock();
        let file = large_files.get_mut(&url.file_id).ok_or_else(|| {
            TransferError::from_http_status(400, "bad_request", "no such large file", None)
        })?;
        file.parts.insert(part_number, bytes);
        self.uploaded_parts.lock().push(part_number);
        Ok(Part {
            file_id: url.file_id.clone(),
            part_number,
            content_length,
            content_sha1: sha1,
        })
    }

    fn finish_large_file(
        &self,
        _auth: &AccountAuthorization,
        file_id: &str,
        part_sha1s: &[String],
    ) -> Result<FileVersion> {
        self.begin(Op::FinishLargeFile)?;
        let file = self.large_files.lock().remove(file_id).ok_or_else(|| {
            TransferError::from_http_status(400, "bad_request", "no such large file", None)
        })?;

        if file.parts.len() != part_sha1s.len() {
            return Err(TransferError::from_http_status(
                400,
                "bad_request",
                format!("have {} parts, got {} sha1s", file.parts.len(), part_sha1s.len()),
                None,
            ));
        }
        let mut bytes = Vec::new();
        for ((_, part), sha1) in file.parts.iter().zip(part_sha1s) {
            if !equal_hex_sha1s(sha1, &hex_sha1_of_bytes(part)) {
                return Err(TransferError::from_http_status(400, "bad_request", "part sha1 mismatch", None));
            }
            bytes.extend_from_slice(part);
        }

        let version = FileVersion {
            file_id: file_id.to_string(),
            file_name: file.file_name,
            content_length: bytes.len() as u64,
            content_sha1: Some("none".to_string()),
            large_file_sha1: file.large_file_sha1,
        };
        self.files.lock().insert(
            file_id.to_string(),
            StoredFile {
                version: version.clone(),
                bytes,
            },
        );
        Ok(version)
    }

    fn download(
        &self,
        _auth: &AccountAuthorization,
        request: &DownloadRequest,
        handler: &mut DownloadHandler<'_>,
    ) -> Result<()> {
        self.begin(Op::Download)?;
        let file = self.files.lock().get(&request.file_id).cloned().ok_or_else(|| {
            TransferError::from_http_status(404, "not_found", "no such file", None)
        })?;

        let mut map = HeaderMap::new();
        let mut body = file.bytes.clone();
        if let Some(range) = request.range {
            let end = (range.end as usize + 1).min(body.len());
            body = body[range.start as usize..end].to_vec();
            insert(
                &mut map,
                CONTENT_RANGE,
                &format!("bytes {}-{}/{}", range.start, end - 1, file.bytes.len()),
            );
        }
        insert(&mut map, CONTENT_LENGTH, &body.len().to_string());
        if let Some(sha1) = &file.version.content_sha1 {
            insert(&mut map, CONTENT_SHA1, sha1);
        }
        if let Some(sha1) = &file.version.large_file_sha1 {
            insert(&mut map, LARGE_FILE_SHA1, sha1);
        }

        if self.corrupt_downloads.load(Ordering::SeqCst) && !body.is_empty() {
            body[0] ^= 0xff;
        }

        let headers = ResponseHeaders::new(map);
        match *self.break_downloads_after.lock() {
            Some(limit) => {
                let mut reader = BrokenReader {
                    inner: Cursor::new(body),
                    remaining: limit,
                };
                handler(&headers, &mut reader)
            }
            None => handler(&headers, &mut Cursor::new(body)),
        }
    }
}

fn insert(map: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        map.insert(name, value);
    }
}

/// A body that fails partway through
struct BrokenReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n;
        Ok(n)
    }
}

