//! Streaming sha1 helpers
//!
//! [`Sha1Reader`] hashes everything read through it, and [`Sha1AppendingReader`]
//! additionally appends the hex digest once the wrapped stream is exhausted,
//! for uploads whose sha1 isn't known up front.

use sha1::{Digest, Sha1};
use std::io::{self, Cursor, Read};

/// Length of a hex-encoded sha1
pub const SHA1_HEX_LEN: usize = 40;

/// Hex sha1 of some bytes
pub fn hex_sha1_of_bytes(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Hex sha1 of everything a reader produces
pub fn hex_sha1_of_reader<R: Read>(reader: R) -> io::Result<String> {
    let mut hashing = Sha1Reader::new(reader);
    io::copy(&mut hashing, &mut io::sink())?;
    Ok(hashing.hex_digest())
}

/// Compare hex sha1s, ignoring case
pub fn equal_hex_sha1s(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// A reader that hashes the bytes passing through it
///
/// The digest is produced by consuming the reader, so it can only be taken
/// once, after the caller has read as much as it wanted.
pub struct Sha1Reader<R> {
    inner: R,
    hasher: Sha1,
    bytes_read: u64,
}

impl<R: Read> Sha1Reader<R> {
    pub fn new(inner: R) -> Self {
        Sha1Reader {
            inner,
            hasher: Sha1::new(),
            bytes_read: 0,
        }
    }

    /// How many bytes have been hashed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish hashing and return the hex digest
    pub fn hex_digest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for Sha1Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

enum AppendState<R> {
    Content(Sha1Reader<R>),
    Trailer(Cursor<Vec<u8>>),
    Done,
}

/// A reader producing the wrapped stream followed by its hex sha1
///
/// The output is exactly [`SHA1_HEX_LEN`] bytes longer than the input.
pub struct Sha1AppendingReader<R> {
    state: AppendState<R>,
}

impl<R: Read> Sha1AppendingReader<R> {
    pub fn new(inner: R) -> Self {
        Sha1AppendingReader {
            state: AppendState::Content(Sha1Reader::new(inner)),
        }
    }

    fn start_trailer(&mut self) {
        if let AppendState::Content(reader) = std::mem::replace(&mut self.state, AppendState::Done)
        {
            self.state = AppendState::Trailer(Cursor::new(reader.hex_digest().into_bytes()));
        }
    }
}

impl<R: Read> Read for Sha1AppendingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let AppendState::Content(reader) = &mut self.state {
            let n = reader.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.start_trailer();
        }

        match &mut self.state {
            AppendState::Trailer(trailer) => trailer.read(buf),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn test_hex_sha1_of_bytes() {
        assert_eq!(hex_sha1_of_bytes(b"hello"), HELLO_SHA1);
        assert_eq!(
            hex_sha1_of_bytes(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_sha1_reader_passes_bytes_through() {
        let mut reader = Sha1Reader::new(&b"hello"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(reader.bytes_read(), 5);
        assert_eq!(reader.hex_digest(), HELLO_SHA1);
    }

    #[test]
    fn test_appending_reader_adds_digest() {
        let mut out = Vec::new();
        Sha1AppendingReader::new(&b"hello"[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out.len(), 5 + SHA1_HEX_LEN);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(std::str::from_utf8(&out[5..]).unwrap(), HELLO_SHA1);
    }

    #[test]
    fn test_appending_reader_with_tiny_buffer() {
        let mut reader = Sha1AppendingReader::new(&b"hello"[..]);
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out.len(), 5 + SHA1_HEX_LEN);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_equal_hex_sha1s_ignores_case() {
        assert!(equal_hex_sha1s(HELLO_SHA1, &HELLO_SHA1.to_uppercase()));
        assert!(!equal_hex_sha1s(HELLO_SHA1, "0000"));
    }

    #[test]
    fn test_hex_sha1_of_reader() {
        assert_eq!(hex_sha1_of_reader(&b"hello"[..]).unwrap(), HELLO_SHA1);
    }
}
