//! Chunked digesting of files and block devices.

use crate::digest::{digests_match, DigestAlgorithm};
use crate::errors::ProvisionError;
use rockprov_hal::{BlockReadOps, HalError};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bounded read size; devices may be far larger than memory.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<ChecksumError> for ProvisionError {
    fn from(err: ChecksumError) -> Self {
        match err {
            ChecksumError::Io { path, source } => {
                ProvisionError::io(format!("digest of {}", path.display()), source)
            }
        }
    }
}

fn hal_to_io(err: HalError) -> io::Error {
    match err {
        HalError::Io(source) => source,
        other => io::Error::other(other),
    }
}

/// Digests files and devices through the HAL's raw read access.
pub struct ChecksumVerifier<'a, R: BlockReadOps + ?Sized> {
    reader: &'a R,
}

impl<'a, R: BlockReadOps + ?Sized> ChecksumVerifier<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self { reader }
    }

    /// Digest the whole of `path`.
    pub fn digest(&self, path: &Path, algorithm: DigestAlgorithm) -> Result<String, ChecksumError> {
        self.digest_limited(path, algorithm, None)
    }

    /// Digest exactly the first `len` bytes of `path`; a shorter source is an I/O error.
    pub fn digest_prefix(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
        len: u64,
    ) -> Result<String, ChecksumError> {
        self.digest_limited(path, algorithm, Some(len))
    }

    pub fn verify(&self, actual: &str, expected: &str) -> bool {
        digests_match(actual, expected)
    }

    fn digest_limited(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
        limit: Option<u64>,
    ) -> Result<String, ChecksumError> {
        let io_err = |source: io::Error| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut source = self
            .reader
            .open_read(path)
            .map_err(|err| io_err(hal_to_io(err)))?;
        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = limit;
        let mut total = 0u64;

        loop {
            let want = match remaining {
                Some(0) => break,
                Some(left) => buf.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
                None => buf.len(),
            };
            let n = match source.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_err(err)),
            };
            hasher.update(&buf[..n]);
            total += n as u64;
            if let Some(left) = remaining.as_mut() {
                *left -= n as u64;
            }
        }

        if let Some(left) = remaining.filter(|left| *left > 0) {
            return Err(io_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {} bytes, {} short", total, left),
            )));
        }
        Ok(hasher.finalize_hex())
    }
}
