//! Upload progress reporting
//!
//! An [`UploadListener`] attached to an upload request hears about every part:
//! when it is queued, when an attempt starts, how many bytes have been read
//! from the content so far, and whether the attempt succeeded or failed. A
//! small file is reported as part 1 of 1.
//!
//! Byte counts come from a [`ProgressReader`] wrapped around the content
//! stream, so they count content bytes handed to the transport, not bytes
//! acknowledged by the service.

use crate::models::PartSpec;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Byte progress of one part is passed on at most this often
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    WaitingToStart,
    Starting,
    Uploading,
    Failed,
    Succeeded,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::WaitingToStart => "waiting_to_start",
            UploadState::Starting => "starting",
            UploadState::Uploading => "uploading",
            UploadState::Failed => "failed",
            UploadState::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

/// Where one part of an upload stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Zero-based, so part number 1 has index 0
    pub part_index: u32,
    pub part_count: u32,
    /// Offset of the part in the content
    pub start_byte: u64,
    pub length: u64,
    pub bytes_so_far: u64,
    pub state: UploadState,
}

impl UploadProgress {
    pub fn for_part(spec: &PartSpec, part_count: u32, bytes_so_far: u64, state: UploadState) -> Self {
        UploadProgress {
            part_index: spec.part_number.saturating_sub(1),
            part_count,
            start_byte: spec.start,
            length: spec.length,
            bytes_so_far,
            state,
        }
    }

    pub fn for_part_succeeded(spec: &PartSpec, part_count: u32) -> Self {
        Self::for_part(spec, part_count, spec.length, UploadState::Succeeded)
    }

    pub fn for_part_failed(spec: &PartSpec, part_count: u32) -> Self {
        Self::for_part(spec, part_count, 0, UploadState::Failed)
    }
}

/// Receives progress about an upload
///
/// Parts of a large file are uploaded concurrently, so calls can come from
/// several threads at once.
pub trait UploadListener: Send + Sync {
    fn progress(&self, progress: &UploadProgress);
}

impl<F> UploadListener for F
where
    F: Fn(&UploadProgress) + Send + Sync,
{
    fn progress(&self, progress: &UploadProgress) {
        self(progress)
    }
}

/// Hears about bytes as they are read from a stream
pub trait ByteProgressListener: Send {
    /// Called before returning bytes to the reader
    fn progress(&mut self, bytes_so_far: u64);

    /// Called before a read error reaches the reader
    fn hit_error(&mut self, error: &io::Error, bytes_so_far: u64);

    /// Called before the reader learns the stream has ended
    fn reached_eof(&mut self, bytes_so_far: u64);
}

impl<L: ByteProgressListener + ?Sized> ByteProgressListener for Box<L> {
    fn progress(&mut self, bytes_so_far: u64) {
        (**self).progress(bytes_so_far)
    }

    fn hit_error(&mut self, error: &io::Error, bytes_so_far: u64) {
        (**self).hit_error(error, bytes_so_far)
    }

    fn reached_eof(&mut self, bytes_so_far: u64) {
        (**self).reached_eof(bytes_so_far)
    }
}

/// A reader that tells a [`ByteProgressListener`] how far it has got
pub struct ProgressReader<R, L> {
    inner: R,
    listener: L,
    bytes_so_far: u64,
}

impl<R: Read, L: ByteProgressListener> ProgressReader<R, L> {
    pub fn new(inner: R, listener: L) -> Self {
        ProgressReader {
            inner,
            listener,
            bytes_so_far: 0,
        }
    }

    pub fn bytes_so_far(&self) -> u64 {
        self.bytes_so_far
    }
}

impl<R: Read, L: ByteProgressListener> Read for ProgressReader<R, L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read(buf) {
            Ok(0) => {
                self.listener.reached_eof(self.bytes_so_far);
                Ok(0)
            }
            Ok(n) => {
                self.bytes_so_far += n as u64;
                self.listener.progress(self.bytes_so_far);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.listener.hit_error(&e, self.bytes_so_far);
                Err(e)
            }
        }
    }
}

/// Passes byte progress on at most once per interval
///
/// The first progress call always goes through. Errors and end of stream are
/// never held back.
pub struct ThrottledByteProgress<L> {
    inner: L,
    interval: Duration,
    next_allowed: Option<Instant>,
}

impl<L: ByteProgressListener> ThrottledByteProgress<L> {
    pub fn new(inner: L, interval: Duration) -> Self {
        ThrottledByteProgress {
            inner,
            interval,
            next_allowed: None,
        }
    }
}

impl<L: ByteProgressListener> ByteProgressListener for ThrottledByteProgress<L> {
    fn progress(&mut self, bytes_so_far: u64) {
        let now = Instant::now();
        if self.next_allowed.map_or(true, |next| now >= next) {
            self.inner.progress(bytes_so_far);
            self.next_allowed = now.checked_add(self.interval);
        }
    }

    fn hit_error(&mut self, error: &io::Error, bytes_so_far: u64) {
        self.inner.hit_error(error, bytes_so_far)
    }

    fn reached_eof(&mut self, bytes_so_far: u64) {
        self.inner.reached_eof(bytes_so_far)
    }
}

/// Turns byte progress of one part into [`UploadProgress`] for a listener
pub struct PartProgressAdapter {
    listener: Arc<dyn UploadListener>,
    spec: PartSpec,
    part_count: u32,
}

impl PartProgressAdapter {
    pub fn new(listener: Arc<dyn UploadListener>, spec: PartSpec, part_count: u32) -> Self {
        PartProgressAdapter {
            listener,
            spec,
            part_count,
        }
    }
}

impl ByteProgressListener for PartProgressAdapter {
    fn progress(&mut self, bytes_so_far: u64) {
        self.listener.progress(&UploadProgress::for_part(
            &self.spec,
            self.part_count,
            bytes_so_far,
            UploadState::Uploading,
        ));
    }

    fn hit_error(&mut self, _error: &io::Error, bytes_so_far: u64) {
        self.listener.progress(&UploadProgress::for_part(
            &self.spec,
            self.part_count,
            bytes_so_far,
            UploadState::Failed,
        ));
    }

    // at the end the length is known for sure
    fn reached_eof(&mut self, bytes_so_far: u64) {
        let mut progress = UploadProgress::for_part(
            &self.spec,
            self.part_count,
            bytes_so_far,
            UploadState::Uploading,
        );
        progress.length = bytes_so_far;
        self.listener.progress(&progress);
    }
}

/// Reports one part to the request's listener, when there is one
pub(crate) struct PartReporter<'a> {
    listener: Option<&'a Arc<dyn UploadListener>>,
    spec: PartSpec,
    part_count: u32,
}

impl<'a> PartReporter<'a> {
    pub(crate) fn new(
        listener: Option<&'a Arc<dyn UploadListener>>,
        spec: PartSpec,
        part_count: u32,
    ) -> Self {
        PartReporter {
            listener,
            spec,
            part_count,
        }
    }

    pub(crate) fn report(&self, bytes_so_far: u64, state: UploadState) {
        if let Some(listener) = self.listener {
            listener.progress(&UploadProgress::for_part(
                &self.spec,
                self.part_count,
                bytes_so_far,
                state,
            ));
        }
    }

    pub(crate) fn succeeded(&self) {
        if let Some(listener) = self.listener {
            listener.progress(&UploadProgress::for_part_succeeded(&self.spec, self.part_count));
        }
    }

    pub(crate) fn failed(&self) {
        if let Some(listener) = self.listener {
            listener.progress(&UploadProgress::for_part_failed(&self.spec, self.part_count));
        }
    }

    /// A throttled byte listener for one attempt at the part
    pub(crate) fn byte_listener(&self) -> Option<Box<dyn ByteProgressListener>> {
        self.listener.map(|listener| {
            let adapter = PartProgressAdapter::new(listener.clone(), self.spec, self.part_count);
            Box::new(ThrottledByteProgress::new(adapter, DEFAULT_PROGRESS_INTERVAL))
                as Box<dyn ByteProgressListener>
        })
    }
}
