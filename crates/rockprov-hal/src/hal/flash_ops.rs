//! Raw image writing and stream decompression.

use crate::{HalError, HalResult};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Block size used when streaming images, matching `dd bs=1M`.
pub const STREAM_CHUNK: usize = 1024 * 1024;

/// Compression container of a downloaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Xz,
}

impl Codec {
    /// Detect the codec from a file name or URL suffix.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") {
            Some(Self::Gzip)
        } else if lower.ends_with(".xz") {
            Some(Self::Xz)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::from_name)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Xz => "xz",
        }
    }

    /// Path of the decompressed sibling (`zero.img.gz` -> `zero.img`).
    pub fn decompressed_path(self, path: &Path) -> PathBuf {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case(self.extension()) => path.with_extension(""),
            _ => path.with_extension("raw"),
        }
    }

    /// Wrap a reader with the matching streaming decoder.
    ///
    /// Concatenated gzip members and xz streams are decoded in full, as
    /// `gzip -d` and `xzcat` do.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
        }
    }
}

/// Options for flash operations.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// If true, the operator has confirmed overwriting the target
    pub confirmed: bool,
}

impl FlashOptions {
    pub fn new(confirmed: bool) -> Self {
        Self { confirmed }
    }
}

/// Trait for writing images to devices.
pub trait FlashOps {
    /// Copy `source` byte-for-byte onto `target`, starting at offset 0.
    /// Returns the number of bytes written.
    fn write_raw(&self, source: &Path, target: &Path, opts: &FlashOptions) -> HalResult<u64>;

    /// Stream-decompress `source` directly onto `target` without a temporary file.
    fn write_compressed(
        &self,
        source: &Path,
        target: &Path,
        codec: Codec,
        opts: &FlashOptions,
    ) -> HalResult<u64>;

    /// Decompress `source` into the regular file `dest`, replacing it.
    fn decompress_file(&self, source: &Path, dest: &Path, codec: Codec) -> HalResult<u64>;
}

/// Copy `reader` into `writer` in fixed-size chunks.
///
/// Read failures are mapped through `on_read_err`; write failures become `DeviceWrite`.
pub(crate) fn pump<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    target: &Path,
    on_read_err: F,
) -> HalResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: Fn(io::Error) -> HalError,
{
    let mut buf = vec![0u8; STREAM_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(on_read_err(err)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|source| HalError::DeviceWrite {
                target: target.to_path_buf(),
                source,
            })?;
        total += n as u64;
    }
    writer.flush().map_err(|source| HalError::DeviceWrite {
        target: target.to_path_buf(),
        source,
    })?;
    Ok(total)
}

/// Decompress a local file into a fresh regular file.
pub(crate) fn decompress_to_file(source: &Path, dest: &Path, codec: Codec) -> HalResult<u64> {
    let input = File::open(source)?;
    let mut reader = codec.decoder(io::BufReader::new(input));
    let mut out = File::create(dest).map_err(|source| HalError::DeviceWrite {
        target: dest.to_path_buf(),
        source,
    })?;
    pump(&mut reader, &mut out, dest, |err| HalError::Decompress {
        path: source.to_path_buf(),
        source: err,
    })
}
