//! Image cache integration tests against a local repository fixture.

mod common;

use std::collections::HashMap;

use kvmbox::{ImageCache, InstanceError};

const IMG: &str = "precise-server-cloudimg-i386-disk1.img";
const MANIFEST_PATH: &str = "/precise/current/SHA1SUMS";

fn image_path() -> String {
    format!("/precise/current/{IMG}")
}

fn routes_for(image: &[u8]) -> HashMap<String, Vec<u8>> {
    let sha = common::sha1_hex(image);
    let mut routes = HashMap::new();
    routes.insert(
        MANIFEST_PATH.to_string(),
        format!("{sha} *{IMG}\n").into_bytes(),
    );
    routes.insert(image_path(), image.to_vec());
    routes
}

#[tokio::test]
async fn resolve_downloads_once_then_hits_cache() {
    common::init_logging();
    let image = b"pristine image bytes".to_vec();
    let fixture = common::serve(routes_for(&image)).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());

    let path = cache.resolve("precise", "i386").await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), image);
    assert_eq!(fixture.hits(&image_path()), 1);

    // Second resolve re-fetches the manifest but not the image.
    let again = cache.resolve("precise", "i386").await.unwrap();
    assert_eq!(again, path);
    assert_eq!(fixture.hits(&image_path()), 1);
    assert_eq!(fixture.hits(MANIFEST_PATH), 2);
}

#[tokio::test]
async fn valid_prepopulated_cache_skips_download() {
    let image = b"already cached".to_vec();
    let fixture = common::serve(routes_for(&image)).await;

    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join(IMG), &image).unwrap();

    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());
    let path = cache.resolve("precise", "i386").await.unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), image);
    assert_eq!(fixture.hits(&image_path()), 0);
}

#[tokio::test]
async fn stale_cached_file_is_refreshed() {
    let image = b"current image".to_vec();
    let fixture = common::serve(routes_for(&image)).await;

    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join(IMG), b"stale image").unwrap();

    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());
    let path = cache.resolve("precise", "i386").await.unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), image);
    assert_eq!(fixture.hits(&image_path()), 1);
}

#[tokio::test]
async fn missing_manifest_entry_is_unavailable() {
    let mut routes = HashMap::new();
    routes.insert(
        MANIFEST_PATH.to_string(),
        b"abc123 some-other-file.img\n".to_vec(),
    );
    let fixture = common::serve(routes).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());

    let err = cache.resolve("precise", "amd64").await.unwrap_err();
    assert!(matches!(err, InstanceError::ImageUnavailable { .. }));
    // The condition names the missing combination.
    let msg = err.to_string();
    assert!(msg.contains("precise"));
    assert!(msg.contains("amd64"));
}

#[tokio::test]
async fn corrupt_download_is_fatal_and_retained() {
    let good = b"good image".to_vec();
    let mut routes = routes_for(&good);
    // The repository serves different bytes than the manifest promises.
    routes.insert(image_path(), b"corrupted bytes".to_vec());
    let fixture = common::serve(routes).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());

    let err = cache.resolve("precise", "i386").await.unwrap_err();
    assert!(matches!(err, InstanceError::ChecksumMismatch { .. }));

    // The corrupt artifact is kept on disk for diagnosis.
    let kept = cache_dir.path().join(IMG);
    assert_eq!(std::fs::read(&kept).unwrap(), b"corrupted bytes");

    // resolve() can be retried; the bad cached copy does not satisfy it.
    let err = cache.resolve("precise", "i386").await.unwrap_err();
    assert!(matches!(err, InstanceError::ChecksumMismatch { .. }));
    assert_eq!(fixture.hits(&image_path()), 2);
}

#[tokio::test]
async fn unreachable_repository_is_a_fetch_error() {
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new("http://127.0.0.1:1", cache_dir.path());

    let err = cache.resolve("precise", "i386").await.unwrap_err();
    assert!(matches!(err, InstanceError::Fetch { .. }));
}

#[tokio::test]
async fn missing_manifest_is_a_fetch_error() {
    let fixture = common::serve(HashMap::new()).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new(&fixture.base_url, cache_dir.path());

    let err = cache.resolve("precise", "i386").await.unwrap_err();
    assert!(matches!(err, InstanceError::Fetch { .. }));
}
