//! Content sources for uploads
//!
//! A [`ContentSource`] can be opened any number of times, because every retry
//! of an upload needs a fresh stream. [`UploadBody`] turns a source into what
//! goes on the wire: the stream, its length and the sha1 header value.

use crate::error::{Result, TransferError};
use crate::hashing::{hex_sha1_of_bytes, Sha1AppendingReader, SHA1_HEX_LEN};
use crate::headers::HEX_DIGITS_AT_END;
use crate::progress::{ByteProgressListener, ProgressReader};
use crate::range_reader::RangeReader;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A stream of content being uploaded
pub type ContentStream = Box<dyn Read + Send>;

/// Something that can be uploaded, possibly more than once
pub trait ContentSource: Send + Sync {
    fn content_length(&self) -> io::Result<u64>;

    /// The hex sha1 of the content, if it is known without reading it
    fn sha1_or_none(&self) -> io::Result<Option<String>>;

    /// Open a new stream positioned at the start of the content
    fn open_stream(&self) -> io::Result<ContentStream>;

    /// Open a stream over `length` bytes starting at `start`, if the source
    /// can get there without reading everything before it
    fn open_range(&self, _start: u64, _length: u64) -> io::Result<Option<ContentStream>> {
        Ok(None)
    }
}

/// Content held in memory
#[derive(Debug, Clone)]
pub struct MemoryContentSource {
    data: Bytes,
    sha1: Option<String>,
}

impl MemoryContentSource {
    /// Content whose sha1 will be computed while it is uploaded
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemoryContentSource {
            data: data.into(),
            sha1: None,
        }
    }

    /// Content with a sha1 computed up front
    pub fn with_computed_sha1(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let sha1 = hex_sha1_of_bytes(&data);
        MemoryContentSource {
            data,
            sha1: Some(sha1),
        }
    }

    /// Content with a caller-supplied sha1
    pub fn with_sha1(data: impl Into<Bytes>, sha1: impl Into<String>) -> Self {
        MemoryContentSource {
            data: data.into(),
            sha1: Some(sha1.into()),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl ContentSource for MemoryContentSource {
    fn content_length(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn sha1_or_none(&self) -> io::Result<Option<String>> {
        Ok(self.sha1.clone())
    }

    fn open_stream(&self) -> io::Result<ContentStream> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    fn open_range(&self, start: u64, length: u64) -> io::Result<Option<ContentStream>> {
        let len = self.data.len();
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(length)
            .ok()
            .and_then(|length| start.checked_add(length))
            .map_or(len, |end| end.min(len));
        Ok(Some(Box::new(Cursor::new(self.data.slice(start..end)))))
    }
}

/// Content stored in a local file
#[derive(Debug, Clone)]
pub struct FileContentSource {
    path: PathBuf,
    sha1: Option<String>,
}

impl FileContentSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileContentSource {
            path: path.as_ref().to_path_buf(),
            sha1: None,
        }
    }

    pub fn with_sha1(path: impl AsRef<Path>, sha1: impl Into<String>) -> Self {
        FileContentSource {
            path: path.as_ref().to_path_buf(),
            sha1: Some(sha1.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for FileContentSource {
    fn content_length(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn sha1_or_none(&self) -> io::Result<Option<String>> {
        Ok(self.sha1.clone())
    }

    fn open_stream(&self) -> io::Result<ContentStream> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn open_range(&self, start: u64, length: u64) -> io::Result<Option<ContentStream>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Some(Box::new(file.take(length))))
    }
}

/// One part of another source, used for large file parts
pub struct PartOfContentSource<'a> {
    source: &'a dyn ContentSource,
    start: u64,
    length: u64,
}

impl<'a> PartOfContentSource<'a> {
    pub fn new(source: &'a dyn ContentSource, start: u64, length: u64) -> Self {
        PartOfContentSource {
            source,
            start,
            length,
        }
    }
}

impl ContentSource for PartOfContentSource<'_> {
    fn content_length(&self) -> io::Result<u64> {
        Ok(self.length)
    }

    fn sha1_or_none(&self) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn open_stream(&self) -> io::Result<ContentStream> {
        if let Some(stream) = self.source.open_range(self.start, self.length)? {
            return Ok(stream);
        }
        let whole = self.source.open_stream()?;
        Ok(Box::new(RangeReader::new(whole, self.start, self.length)))
    }

    fn open_range(&self, start: u64, length: u64) -> io::Result<Option<ContentStream>> {
        let length = length.min(self.length.saturating_sub(start));
        self.source
            .open_range(self.start.saturating_add(start), length)
    }
}

/// The body of one upload request
pub struct UploadBody {
    pub stream: ContentStream,
    /// Bytes the stream will produce, including any appended sha1
    pub content_length: u64,
    /// Value for the content sha1 header
    pub sha1_header: String,
}

impl UploadBody {
    /// Open a source for uploading
    ///
    /// When the source doesn't know its sha1, the hex sha1 is computed while
    /// streaming and appended to the body.
    pub fn from_source(source: &dyn ContentSource) -> Result<Self> {
        Self::from_source_with_progress(source, None)
    }

    /// Like [`from_source`](Self::from_source), telling `listener` how much of
    /// the content has been read
    pub fn from_source_with_progress(
        source: &dyn ContentSource,
        listener: Option<Box<dyn ByteProgressListener>>,
    ) -> Result<Self> {
        let content_length = source
            .content_length()
            .map_err(|e| source_error("couldn't get content length", e))?;
        let sha1 = source
            .sha1_or_none()
            .map_err(|e| source_error("couldn't get content sha1", e))?;
        let stream = source
            .open_stream()
            .map_err(|e| source_error("couldn't open content stream", e))?;
        let stream: ContentStream = match listener {
            Some(listener) => Box::new(ProgressReader::new(stream, listener)),
            None => stream,
        };

        Ok(match sha1 {
            Some(sha1) => UploadBody {
                stream,
                content_length,
                sha1_header: sha1,
            },
            None => UploadBody {
                stream: Box::new(Sha1AppendingReader::new(stream)),
                content_length: content_length + SHA1_HEX_LEN as u64,
                sha1_header: HEX_DIGITS_AT_END.to_string(),
            },
        })
    }

    /// Whether the hex sha1 follows the content in the stream
    pub fn has_sha1_at_end(&self) -> bool {
        self.sha1_header == HEX_DIGITS_AT_END
    }

    /// Read the whole body, for transports that need it in one piece
    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(self.content_length).unwrap_or(0));
        self.stream
            .read_to_end(&mut out)
            .map_err(|e| source_error("couldn't read content", e))?;
        Ok(out)
    }
}

fn source_error(what: &str, err: io::Error) -> TransferError {
    TransferError::local("read_failed", format!("{}: {}", what, err))
}
