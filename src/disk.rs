//! Instance disk provisioning.
//!
//! Each instance owns exactly one writable root disk inside its data
//! directory: either a private copy of a cached pristine image, or a fresh
//! blank qcow2 image when no base release is configured.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::cache::ImageCache;
use crate::config::InstanceConfig;
use crate::error::{InstanceError, Result};

/// Virtual size of a blank instance disk.
const BLANK_DISK_SIZE: &str = "10G";

/// Ensure the instance's private disk image exists and return its path.
///
/// Idempotent: an existing disk is returned as-is, with no re-copy and no
/// re-check against the cache. A failed copy or create leaves any partial
/// file in place for the caller to inspect or retry.
pub async fn ensure_disk(config: &InstanceConfig, cache: &ImageCache) -> Result<PathBuf> {
    let disk = config.disk_path();
    if disk.exists() {
        return Ok(disk);
    }

    match &config.release {
        Some(release) => {
            let pristine = cache.resolve(release, &config.arch).await?;
            info!(
                src = %pristine.display(),
                dest = %disk.display(),
                "copying pristine image"
            );
            std::fs::copy(&pristine, &disk).map_err(|e| InstanceError::io(&disk, e))?;
        }
        None => create_blank_image(&disk).await?,
    }

    Ok(disk)
}

/// Create an empty qcow2 image with `qemu-img`.
async fn create_blank_image(path: &Path) -> Result<()> {
    info!(path = %path.display(), size = BLANK_DISK_SIZE, "creating blank disk image");

    let output = Command::new("qemu-img")
        .args(["create", "-f", "qcow2"])
        .arg(path)
        .arg(BLANK_DISK_SIZE)
        .output()
        .await
        .map_err(|e| InstanceError::io(path, e))?;

    if !output.status.success() {
        return Err(InstanceError::Tool {
            tool: "qemu-img",
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}
