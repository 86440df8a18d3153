//! Pristine cloud image resolution and caching.
//!
//! Images are cached by filename in a shared directory and verified against
//! the release's `SHA1SUMS` manifest before reuse. The cache directory may
//! be shared by concurrent instances; redundant downloads of the same file
//! are tolerated (last writer wins).
//!
//! Checksums are computed by the external `sha1sum` utility; the first
//! whitespace-delimited token of its output is the digest.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::InstanceConfig;
use crate::error::{InstanceError, Result};

/// Resolves and materializes pristine base images for (release, arch) pairs.
pub struct ImageCache {
    base_url: String,
    dir: PathBuf,
}

impl ImageCache {
    pub fn new(base_url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            dir: dir.into(),
        }
    }

    pub fn for_config(config: &InstanceConfig) -> Self {
        Self::new(config.base_url.clone(), config.image_cache.clone())
    }

    /// Resolve the pristine image for `(release, arch)` to a local path.
    ///
    /// A cached file whose checksum matches the current manifest is reused
    /// without any image fetch. Otherwise the image is downloaded and
    /// re-verified; a mismatch after download is fatal and the corrupt file
    /// is left in place for inspection, so a caller may retry `resolve`.
    pub async fn resolve(&self, release: &str, arch: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| InstanceError::io(&self.dir, e))?;

        let filename = image_filename(release, arch);
        let sums = self.fetch_sha1sums(release).await?;
        let expected = sums
            .get(&filename)
            .ok_or_else(|| InstanceError::ImageUnavailable {
                filename: filename.clone(),
                release: release.to_string(),
                arch: arch.to_string(),
            })?;

        let local = self.dir.join(&filename);
        if local.is_file() && sha1_file(&local).await? == *expected {
            debug!(path = %local.display(), "image cache hit");
            return Ok(local);
        }

        let url = format!("{}/{}/current/{}", self.base_url, release, filename);
        info!(%url, "downloading image");
        download(&url, &local).await?;

        let actual = sha1_file(&local).await?;
        if actual != *expected {
            return Err(InstanceError::ChecksumMismatch {
                path: local,
                expected: expected.clone(),
                actual,
            });
        }

        Ok(local)
    }

    /// Fetch and parse the `SHA1SUMS` manifest for a release.
    async fn fetch_sha1sums(&self, release: &str) -> Result<HashMap<String, String>> {
        let url = format!("{}/{}/current/SHA1SUMS", self.base_url, release);
        let fetch_err = |source| InstanceError::Fetch {
            url: url.clone(),
            source,
        };

        let body = reqwest::get(&url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?
            .text()
            .await
            .map_err(fetch_err)?;

        parse_sha1sums(&body)
    }
}

/// Image filename published by the repository for a (release, arch) pair.
pub(crate) fn image_filename(release: &str, arch: &str) -> String {
    format!("{release}-server-cloudimg-{arch}-disk1.img")
}

/// Parse `checksum filename` manifest lines. Some repositories prefix
/// filenames with `*` (binary-mode marker); it is stripped before use.
fn parse_sha1sums(body: &str) -> Result<HashMap<String, String>> {
    let mut sums = HashMap::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (sha1, filename) = match (parts.next(), parts.next()) {
            (Some(sha1), Some(filename)) => (sha1, filename),
            _ => {
                return Err(InstanceError::Manifest {
                    line: line.to_string(),
                });
            }
        };
        let filename = filename.strip_prefix('*').unwrap_or(filename);
        sums.insert(filename.to_string(), sha1.to_string());
    }
    Ok(sums)
}

/// Stream `url` to `dest`, logging coarse progress roughly every 10%.
/// Progress is best effort: tiny or unknown content lengths may produce
/// fewer than ten reports.
async fn download(url: &str, dest: &Path) -> Result<()> {
    let resp = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| InstanceError::Fetch {
            url: url.to_string(),
            source,
        })?;
    let total = resp.content_length().unwrap_or(0);

    let mut file = std::fs::File::create(dest).map_err(|e| InstanceError::io(dest, e))?;
    let mut stream = resp.bytes_stream();
    let mut received: u64 = 0;
    let mut next_decile: u64 = 1;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| InstanceError::Fetch {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk)
            .map_err(|e| InstanceError::io(dest, e))?;
        received += chunk.len() as u64;

        while total > 0 && next_decile <= 10 && received >= total * next_decile / 10 {
            info!(
                percent = next_decile * 10,
                total_mb = total / (1024 * 1024),
                "download progress"
            );
            next_decile += 1;
        }
    }

    Ok(())
}

/// Checksum a file with the external `sha1sum` utility.
pub(crate) async fn sha1_file(path: &Path) -> Result<String> {
    let output = Command::new("sha1sum")
        .arg(path)
        .output()
        .await
        .map_err(|e| InstanceError::io(path, e))?;

    if !output.status.success() {
        return Err(InstanceError::Tool {
            tool: "sha1sum",
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| InstanceError::Tool {
            tool: "sha1sum",
            status: output.status,
            stderr: "empty output".to_string(),
        })
}
