//! Byte-range view over a reader
//!
//! [`RangeReader`] exposes only `[start, start + length)` of an underlying
//! stream. It skips to `start` on the first read rather than at construction,
//! so building readers for every part of a large file costs nothing until
//! each one is actually uploaded.
//!
//! There is no seeking or rewinding; a range reader is read forward once.

use std::io::{self, Read};
use tracing::debug;

const SKIP_BUFFER_SIZE: usize = 8192;

/// A reader limited to one range of an underlying reader
pub struct RangeReader<R> {
    inner: R,
    start: u64,
    /// Never return the byte at this position. Shrinks if the input ends early.
    past_end: u64,
    position: u64,
    skipped_to_start: bool,
}

impl<R: Read> RangeReader<R> {
    /// Create a view of `length` bytes of `inner` starting at `start`
    pub fn new(inner: R, start: u64, length: u64) -> Self {
        RangeReader {
            inner,
            start,
            past_end: start.saturating_add(length),
            position: 0,
            skipped_to_start: false,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// The number of bytes in the range
    ///
    /// This can become smaller than requested once the reader discovers that
    /// the input ends before the range does.
    pub fn len(&self) -> u64 {
        self.past_end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn skip_to_start_if_needed(&mut self) -> io::Result<()> {
        if self.skipped_to_start {
            return Ok(());
        }

        // position advances chunk by chunk so a failed read can be resumed
        let mut buf = [0u8; SKIP_BUFFER_SIZE];
        while self.position < self.start {
            let wanted = (self.start - self.position).min(buf.len() as u64) as usize;
            let n = match self.inner.read(&mut buf[..wanted]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                debug!(
                    "Input ended at {} while skipping to range start {}",
                    self.position, self.start
                );
                self.past_end = self.position;
                break;
            }
            self.position += n as u64;
        }

        self.skipped_to_start = true;
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.position >= self.past_end
    }
}

impl<R: Read> Read for RangeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.skip_to_start_if_needed()?;
        if self.at_end() || buf.is_empty() {
            return Ok(0);
        }

        let remaining = self.past_end - self.position;
        let limit = remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..limit])?;
        if n == 0 {
            // the input ended inside the range; remember where
            self.past_end = self.position;
        } else {
            self.position += n as u64;
        }
        Ok(n)
    }
}
