//! Streaming HTTP image fetcher.

use crate::artifact::Artifact;
use crate::digest::ExpectedDigest;
use crate::errors::ProvisionError;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed streaming chunk, independent of the total size.
pub const FETCH_CHUNK: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub trait ImageFetcher {
    /// Download `url` to `dest`, replacing any existing file.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        declared: Option<ExpectedDigest>,
    ) -> Result<Artifact, ProvisionError>;

    /// Download into `dir`, naming the file after the URL's last path segment.
    fn fetch_into(
        &self,
        url: &str,
        dir: &Path,
        declared: Option<ExpectedDigest>,
    ) -> Result<Artifact, ProvisionError> {
        let name = file_name_from_url(url)?;
        self.fetch(url, &dir.join(name), declared)
    }
}

/// Last non-empty path segment of `url`.
pub fn file_name_from_url(url: &str) -> Result<String, ProvisionError> {
    let parsed = url::Url::parse(url)
        .map_err(|err| ProvisionError::Config(format!("invalid URL {}: {}", url, err)))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::Config(format!("URL has no file name: {}", url)))
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Multi-gigabyte OS images get no total timeout; only connecting is bounded.
    pub fn new() -> Result<Self, ProvisionError> {
        Self::with_timeout(None)
    }

    pub fn with_timeout(total: Option<Duration>) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(total)
            .user_agent(concat!("rockprov/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ProvisionError::Config(format!("HTTP client: {}", err)))?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        declared: Option<ExpectedDigest>,
    ) -> Result<Artifact, ProvisionError> {
        let transfer = |reason: String| ProvisionError::Transfer {
            url: url.to_string(),
            reason,
        };

        log::info!("⬇️  Downloading {} -> {}", url, dest.display());
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| transfer(err.to_string()))?;
        if !response.status().is_success() {
            return Err(transfer(format!("server returned {}", response.status())));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                ProvisionError::io(format!("create {}", parent.display()), err)
            })?;
        }
        let mut out = File::create(dest)
            .map_err(|err| ProvisionError::io(format!("create {}", dest.display()), err))?;

        let mut buf = vec![0u8; FETCH_CHUNK];
        let mut total = 0u64;
        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(transfer(err.to_string())),
            };
            out.write_all(&buf[..n])
                .map_err(|err| ProvisionError::io(format!("write {}", dest.display()), err))?;
            total += n as u64;
        }
        out.flush()
            .map_err(|err| ProvisionError::io(format!("write {}", dest.display()), err))?;

        log::info!("✅ Downloaded {} bytes to {}", total, dest.display());
        Ok(Artifact::new(PathBuf::from(dest), declared))
    }
}
