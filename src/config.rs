//! Static instance configuration.
//!
//! Set once at instance creation, never mutated afterward. Per-instance
//! customization (name, hostname, instance id, user-data, extra launch
//! arguments) is expressed as optional override fields with
//! default-resolving accessors; the controller only ever calls the
//! accessors.

use std::path::PathBuf;

use uuid::Uuid;

/// Base URL of the public cloud image repository.
pub const DEFAULT_BASE_URL: &str = "http://cloud-images.ubuntu.com";

/// Hypervisor binary launched for each instance.
pub const DEFAULT_HYPERVISOR: &str = "kvm";

const DEFAULT_HOSTNAME: &str = "default";

/// Default cloud-config user-data. The `final_message` line is what the
/// controller's readiness wait looks for on the serial console.
const DEFAULT_USERDATA: &str =
    "#cloud-config\nfinal_message: \"SYSTEM READY, after $UPTIME seconds\"";

/// Immutable inputs fixing identity and behavior of one instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Base OS release for the root disk. `None` means a blank disk is
    /// created instead of a cloud image copy.
    pub release: Option<String>,
    /// Hardware architecture of the image to download (e.g. `i386`, `amd64`).
    pub arch: String,
    /// Directory owned exclusively by this instance. Holds the disk image,
    /// the transport ISO and the console log.
    pub data_dir: PathBuf,
    /// Shared pristine-image cache directory, keyed by filename. Concurrent
    /// instances may race on population; last writer wins.
    pub image_cache: PathBuf,
    /// Image repository base URL.
    pub base_url: String,
    /// Hypervisor binary name or path.
    pub hypervisor: String,
    /// User-data override. Takes priority over the generated default.
    pub userdata: Option<String>,
    /// Display name override; defaults to the hostname.
    pub name: Option<String>,
    /// Hostname override; defaults to `"default"`.
    pub hostname: Option<String>,
    /// Instance id override; defaults to a generated UUID.
    pub instance_id: Option<String>,
    /// Additional hypervisor command-line arguments.
    pub extra_args: Vec<String>,
}

impl InstanceConfig {
    /// Build a configuration with the stock defaults for `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            release: Some("precise".to_string()),
            arch: "i386".to_string(),
            data_dir: data_dir.into(),
            image_cache: default_image_cache(),
            base_url: DEFAULT_BASE_URL.to_string(),
            hypervisor: DEFAULT_HYPERVISOR.to_string(),
            userdata: None,
            name: None,
            hostname: None,
            instance_id: None,
            extra_args: Vec::new(),
        }
    }

    /// Path of the instance's private root disk.
    pub fn disk_path(&self) -> PathBuf {
        self.data_dir.join("disk.img")
    }

    /// Path of the OVF transport ISO.
    pub fn transport_path(&self) -> PathBuf {
        self.data_dir.join("ovf.iso")
    }

    /// Path of the append-only console log.
    pub fn console_log_path(&self) -> PathBuf {
        self.data_dir.join("console.log")
    }

    /// Human-readable instance name.
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.hostname())
    }

    /// Hostname handed to the guest via the transport envelope.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
    }

    /// Instance id handed to the guest. Generated fresh unless overridden,
    /// so call it once per transport build.
    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// User-data script for the guest's init agent.
    pub fn userdata(&self) -> String {
        self.userdata
            .clone()
            .unwrap_or_else(|| DEFAULT_USERDATA.to_string())
    }
}

fn default_image_cache() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qemu_images")
}
