//! Verified download writing
//!
//! [`ContentWriter`] copies a response body into a [`Destination`] and checks
//! the content's sha1 twice: once over the bytes that came off the network,
//! and, when the destination supports it, again over the bytes read back out
//! of the destination. The first check catches corruption in transit; the
//! second catches corruption on the way to storage.
//!
//! The destination always hears how things ended: `succeeded` once the content
//! is stored and checked, `failed` after an error at any stage.

use crate::destination::Destination;
use crate::error::{NetworkFailure, Result, TransferError, VerifyStage};
use crate::hashing::{equal_hex_sha1s, hex_sha1_of_reader, Sha1Reader};
use crate::headers::ResponseHeaders;
use crate::metrics::TransferMetrics;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// What was written by a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReceipt {
    pub bytes_written: u64,
    /// The sha1 the content was checked against, if it could be checked
    pub verified_sha1: Option<String>,
}

/// Writes downloaded content and verifies it
#[derive(Debug, Clone)]
pub struct ContentWriter {
    copy_buffer_size: usize,
    metrics: Option<Arc<TransferMetrics>>,
}

impl ContentWriter {
    pub fn new(copy_buffer_size: usize) -> Self {
        ContentWriter {
            copy_buffer_size: copy_buffer_size.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<TransferMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Write a response body to `destination`, verifying it when possible
    ///
    /// # Returns
    /// * `Err(TransferError::Integrity)` if the sha1 doesn't match, with
    ///   [`VerifyStage`] telling whether the network or the destination was at fault
    /// * `Err(TransferError::Network)` if reading the body fails
    /// * `Err(TransferError::Local)` if the destination fails
    pub fn read_content<D, R>(
        &self,
        headers: &ResponseHeaders,
        body: R,
        destination: &mut D,
    ) -> Result<ContentReceipt>
    where
        D: Destination,
        R: Read,
    {
        destination.prepare(headers)?;

        let expected = headers.sha1_to_check();
        match self.write_and_verify(body, destination, expected) {
            Ok(receipt) => match destination.succeeded() {
                Ok(()) => Ok(receipt),
                Err(e) => {
                    destination.failed();
                    Err(TransferError::local(
                        "write_failed",
                        format!("couldn't finish storing content: {}", e),
                    ))
                }
            },
            Err(e) => {
                destination.failed();
                Err(e)
            }
        }
    }

    fn write_and_verify<D, R>(
        &self,
        body: R,
        destination: &mut D,
        expected: Option<String>,
    ) -> Result<ContentReceipt>
    where
        D: Destination,
        R: Read,
    {
        let mut output = destination.create_output().map_err(|e| {
            write_failed("couldn't open destination output stream to write it", e)
        })?;

        // on error the output is dropped, which closes it without reporting
        let (bytes_written, network_sha1) = match &expected {
            Some(_) => {
                let mut hashing = Sha1Reader::new(body);
                let n = self.copy(&mut hashing, &mut output)?;
                (n, Some(hashing.hex_digest()))
            }
            None => {
                let mut body = body;
                (self.copy(&mut body, &mut output)?, None)
            }
        };

        destination
            .close_output(output)
            .map_err(|e| write_failed("couldn't close destination output stream", e))?;

        let expected = match (expected, network_sha1) {
            (Some(expected), Some(actual)) => {
                self.check(VerifyStage::FromNetwork, &expected, &actual)?;
                expected
            }
            _ => {
                debug!("Wrote {} bytes without a sha1 to check", bytes_written);
                return Ok(ContentReceipt {
                    bytes_written,
                    verified_sha1: None,
                });
            }
        };

        if destination.verify_by_rereading() {
            let input = destination.create_input().map_err(|e| {
                write_failed("couldn't open destination input stream to check it", e)
            })?;
            let reread = hex_sha1_of_reader(input)
                .map_err(|e| write_failed("failed to verify the sha1", e))?;
            self.check(VerifyStage::FromDestination, &expected, &reread)?;
        }

        debug!("Wrote and verified {} bytes, sha1 {}", bytes_written, expected);
        Ok(ContentReceipt {
            bytes_written,
            verified_sha1: Some(expected),
        })
    }

    fn copy<R: Read, W: Write>(&self, from: &mut R, to: &mut W) -> Result<u64> {
        let mut buf = vec![0u8; self.copy_buffer_size];
        let mut total = 0u64;
        loop {
            let n = match from.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransferError::network(
                        NetworkFailure::ConnectionBroken,
                        format!("read failed: {}", e),
                    ))
                }
            };
            to.write_all(&buf[..n])
                .map_err(|e| write_failed("write failed", e))?;
            total += n as u64;
        }
    }

    fn check(&self, stage: VerifyStage, expected: &str, actual: &str) -> Result<()> {
        if equal_hex_sha1s(expected, actual) {
            return Ok(());
        }
        warn!(
            "sha1 mismatch {}: expected {}, got {}",
            stage, expected, actual
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_integrity_failure();
        }
        Err(TransferError::Integrity {
            stage,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn write_failed(what: &str, err: io::Error) -> TransferError {
    TransferError::local("write_failed", format!("{}: {}", what, err))
}
