//! Artifact cache. Guarantees a locally executable copy of an auxiliary
//! binary, downloading it at most once when the cache file is missing.
//!
//! The cache path depends only on the artifact name, so a copy fetched by a
//! previous run is reused as-is. Presence of the file is the only validity
//! signal; there is no version or checksum stored next to it.
//!
//! Downloads are not verified. The SHA-256 of a fresh download is logged so
//! operators can compare it by hand, nothing more.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to fetch {name}: {source}")]
    FetchFailed {
        name: String,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

// ── Architecture ──────────────────────────────────────────────────────────────

/// CPU architectures an artifact can be fetched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Case-insensitive substring match on a raw architecture string.
    pub fn from_raw(raw: &str) -> Result<Self, ArtifactError> {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("amd64") || lower.contains("x86_64") {
            Ok(Arch::Amd64)
        } else if lower.contains("aarch64") || lower.contains("arm64") {
            Ok(Arch::Arm64)
        } else {
            Err(ArtifactError::UnsupportedPlatform(raw.to_string()))
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => f.write_str("amd64"),
            Arch::Arm64 => f.write_str("arm64"),
        }
    }
}

/// Raw architecture string of the running host.
pub fn host_arch() -> &'static str {
    std::env::consts::ARCH
}

// ── Descriptor ────────────────────────────────────────────────────────────────

/// Download URL per architecture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchUrls {
    pub amd64: String,
    pub arm64: String,
}

impl ArchUrls {
    pub fn new(amd64: impl Into<String>, arm64: impl Into<String>) -> Self {
        Self { amd64: amd64.into(), arm64: arm64.into() }
    }

    pub fn for_arch(&self, arch: Arch) -> &str {
        match arch {
            Arch::Amd64 => &self.amd64,
            Arch::Arm64 => &self.arm64,
        }
    }
}

/// What to fetch and where to keep it. Built on demand, never persisted.
#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub urls: ArchUrls,
    pub cache_path: PathBuf,
}

impl ArtifactDescriptor {
    /// The cache path is `cache_dir/name`, stable across runs.
    pub fn new(name: impl Into<String>, urls: ArchUrls, cache_dir: &Path) -> Self {
        let name = name.into();
        let cache_path = cache_dir.join(&name);
        Self { name, urls, cache_path }
    }
}

// ── Fetching ──────────────────────────────────────────────────────────────────

/// Streams the body behind `url` into `dest`, returning the byte count.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64, FetchError>;
}

/// Blocking HTTP(S) fetcher. No timeout is applied: a stalled transfer
/// stalls the bootstrap.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64, FetchError> {
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let written = response.copy_to(dest)?;
        Ok(written)
    }
}

/// Writer adapter that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

pub struct ArtifactCache {
    fetcher: Box<dyn Fetch>,
    arch: String,
}

impl ArtifactCache {
    /// Cache for the running host's architecture.
    pub fn new(fetcher: Box<dyn Fetch>) -> Self {
        Self::with_arch(fetcher, host_arch())
    }

    /// Cache that resolves URLs as if running on `arch`.
    pub fn with_arch(fetcher: Box<dyn Fetch>, arch: impl Into<String>) -> Self {
        Self { fetcher, arch: arch.into() }
    }

    /// Return the local path of `descriptor`, downloading it first if the
    /// cache file does not exist yet.
    ///
    /// The architecture is checked before anything else, so an unsupported
    /// host fails even when a cached file happens to exist.
    pub fn ensure_local(&self, descriptor: &ArtifactDescriptor) -> Result<PathBuf, ArtifactError> {
        let arch = Arch::from_raw(&self.arch)?;
        let path = &descriptor.cache_path;

        if path.exists() {
            debug!(artifact = %descriptor.name, path = %path.display(), "artifact cached");
            return Ok(path.clone());
        }

        let url = descriptor.urls.for_arch(arch);
        info!(artifact = %descriptor.name, %arch, %url, "downloading artifact");

        self.download(url, path)
            .map_err(|source| ArtifactError::FetchFailed { name: descriptor.name.clone(), source })?;

        Ok(path.clone())
    }

    /// Download into a sibling `.part` file and rename over `path` on success,
    /// so an interrupted transfer never masquerades as a cached artifact.
    fn download(&self, url: &str, path: &Path) -> Result<(), FetchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(path);
        let result = self.write_partial(url, &partial).and_then(|(bytes, digest)| {
            commit_partial(&partial, path)?;
            Ok((bytes, digest))
        });

        match result {
            Ok((bytes, digest)) => {
                info!(path = %path.display(), bytes, sha256 = %digest, "artifact stored");
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&partial) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), "cannot remove partial download: {rm}");
                    }
                }
                Err(e)
            }
        }
    }

    fn write_partial(&self, url: &str, partial: &Path) -> Result<(u64, String), FetchError> {
        let file = fs::File::create(partial)?;
        let mut writer = HashingWriter { inner: io::BufWriter::new(file), hasher: Sha256::new() };
        let bytes = self.fetcher.fetch(url, &mut writer)?;
        writer.flush()?;
        let digest = hex::encode(writer.hasher.finalize());
        Ok((bytes, digest))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Make the partial download executable, then move it into place. A file
/// only ever appears at the cache path once it can be spawned.
fn commit_partial(partial: &Path, path: &Path) -> io::Result<()> {
    mark_executable(partial)?;
    fs::rename(partial, path)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
