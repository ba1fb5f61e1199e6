//! Where downloaded content goes
//!
//! A [`Destination`] hands out an output to write to, is told when the output
//! is done, can optionally be re-read so the stored bytes can be checked, and
//! finally learns whether the download succeeded or failed.

use crate::error::{Result, TransferError};
use crate::headers::ResponseHeaders;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A place to store downloaded content
///
/// A destination may be asked for an output more than once when a download is
/// retried; each new output replaces what the previous one wrote.
pub trait Destination {
    type Output: Write;
    type Input: Read;

    /// Check the response before anything is written
    fn prepare(&mut self, _headers: &ResponseHeaders) -> Result<()> {
        Ok(())
    }

    fn create_output(&mut self) -> io::Result<Self::Output>;

    /// Finish writing. An error means the content may not have been stored.
    fn close_output(&mut self, mut output: Self::Output) -> io::Result<()> {
        output.flush()
    }

    /// Whether the stored content should be read back and checked
    fn verify_by_rereading(&self) -> bool;

    /// Open the stored content for re-reading
    fn create_input(&mut self) -> io::Result<Self::Input>;

    /// Called once the content has been stored and checked
    fn succeeded(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called when the download failed at any stage
    fn failed(&mut self) {}
}

/// Anything at or above this length can't be held in one buffer
const MAX_IN_MEMORY_LENGTH: u64 = isize::MAX as u64;

/// Collects content into memory
///
/// The stored bytes are read back and checked unless that is turned off.
#[derive(Debug)]
pub struct MemoryDestination {
    content: Bytes,
    verify_by_rereading: bool,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        MemoryDestination {
            content: Bytes::new(),
            verify_by_rereading: true,
        }
    }
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify_by_rereading(mut self, verify: bool) -> Self {
        self.verify_by_rereading = verify;
        self
    }

    /// The content written by the most recent output
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }
}

impl Destination for MemoryDestination {
    type Output = Vec<u8>;
    type Input = Cursor<Bytes>;

    fn prepare(&mut self, headers: &ResponseHeaders) -> Result<()> {
        match headers.content_length() {
            Some(len) if len >= MAX_IN_MEMORY_LENGTH => Err(TransferError::local(
                "out_of_range",
                format!("content is too big to hold in memory ({} bytes)", len),
            )),
            _ => Ok(()),
        }
    }

    fn create_output(&mut self) -> io::Result<Vec<u8>> {
        self.content = Bytes::new();
        Ok(Vec::new())
    }

    fn close_output(&mut self, output: Vec<u8>) -> io::Result<()> {
        self.content = Bytes::from(output);
        Ok(())
    }

    fn verify_by_rereading(&self) -> bool {
        self.verify_by_rereading
    }

    fn create_input(&mut self) -> io::Result<Cursor<Bytes>> {
        Ok(Cursor::new(self.content.clone()))
    }
}

/// Writes content to a file, replacing it only once the content checks out
///
/// Content goes to a temporary file next to the target and is renamed into
/// place on success. A failed download leaves any existing file untouched.
#[derive(Debug)]
pub struct FileDestination {
    path: PathBuf,
    verify_by_rereading: bool,
    temp: Option<NamedTempFile>,
}

impl FileDestination {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileDestination {
            path: path.as_ref().to_path_buf(),
            verify_by_rereading: true,
            temp: None,
        }
    }

    pub fn with_verify_by_rereading(mut self, verify: bool) -> Self {
        self.verify_by_rereading = verify;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl Destination for FileDestination {
    type Output = BufWriter<File>;
    type Input = File;

    fn create_output(&mut self) -> io::Result<BufWriter<File>> {
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(self.dir())?;
        let file = temp.as_file().try_clone()?;
        // replacing an earlier attempt's temp file deletes it
        self.temp = Some(temp);
        Ok(BufWriter::new(file))
    }

    fn close_output(&mut self, output: BufWriter<File>) -> io::Result<()> {
        let file = output.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }

    fn verify_by_rereading(&self) -> bool {
        self.verify_by_rereading
    }

    fn create_input(&mut self) -> io::Result<File> {
        match &self.temp {
            Some(temp) => temp.reopen(),
            None => File::open(&self.path),
        }
    }

    fn succeeded(&mut self) -> io::Result<()> {
        if let Some(temp) = self.temp.take() {
            temp.persist(&self.path).map_err(|e| e.error)?;
            debug!("Stored download at {}", self.path.display());
        }
        Ok(())
    }

    fn failed(&mut self) {
        if self.temp.take().is_some() {
            debug!("Discarded partial download for {}", self.path.display());
        }
    }
}

type OutputFactory = Box<dyn FnMut() -> io::Result<Box<dyn Write + Send>> + Send>;
type InputFactory = Box<dyn FnMut() -> io::Result<Box<dyn Read + Send>> + Send>;
type Notification = Box<dyn FnMut() + Send>;

/// A destination built from caller-supplied streams
///
/// Re-reading happens only when an input factory is given.
pub struct StreamDestination {
    create_output: OutputFactory,
    create_input: Option<InputFactory>,
    on_success: Option<Notification>,
    on_failure: Option<Notification>,
}

impl StreamDestination {
    pub fn new<F>(create_output: F) -> Self
    where
        F: FnMut() -> io::Result<Box<dyn Write + Send>> + Send + 'static,
    {
        StreamDestination {
            create_output: Box::new(create_output),
            create_input: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_reread<F>(mut self, create_input: F) -> Self
    where
        F: FnMut() -> io::Result<Box<dyn Read + Send>> + Send + 'static,
    {
        self.create_input = Some(Box::new(create_input));
        self
    }

    pub fn on_success<F: FnMut() + Send + 'static>(mut self, f: F) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure<F: FnMut() + Send + 'static>(mut self, f: F) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }
}

impl Destination for StreamDestination {
    type Output = Box<dyn Write + Send>;
    type Input = Box<dyn Read + Send>;

    fn create_output(&mut self) -> io::Result<Self::Output> {
        (self.create_output)()
    }

    fn verify_by_rereading(&self) -> bool {
        self.create_input.is_some()
    }

    fn create_input(&mut self) -> io::Result<Self::Input> {
        match &mut self.create_input {
            Some(create_input) => create_input(),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "this destination can't be re-read",
            )),
        }
    }

    fn succeeded(&mut self) -> io::Result<()> {
        if let Some(f) = &mut self.on_success {
            f();
        }
        Ok(())
    }

    fn failed(&mut self) {
        if let Some(f) = &mut self.on_failure {
            f();
        }
    }
}
