//! kvmbox — single-instance KVM test harness.
//!
//! Provisions and controls one virtual machine for test automation:
//! fetches or reuses a cached cloud image, prepares an instance-private
//! disk and an OVF transport ISO for the in-guest init agent, launches the
//! hypervisor, streams its serial console, detects boot completion and
//! tears the instance down on request.
//!
//! ## Architecture
//!
//! ```text
//! Instance (controller, caller task)
//!     ├─► ImageCache::resolve          — manifest fetch + verified download
//!     ├─► disk::ensure_disk            — copy-of-pristine or blank qcow2
//!     ├─► transport::ensure_transport  — OVF envelope → genisoimage
//!     └─► launcher::launch             — hypervisor child process
//!             └─► relay task ──(console channel)──► wait_until_ready / wait
//! ```
//!
//! The hypervisor, `qemu-img`, `genisoimage` and `sha1sum` are invoked as
//! opaque external processes; the image repository is a plain HTTP
//! endpoint.

pub mod cache;
pub mod config;
pub mod disk;
pub mod error;
pub mod instance;
pub mod launcher;
pub mod transport;
mod util;

pub use cache::ImageCache;
pub use config::InstanceConfig;
pub use error::{InstanceError, Result};
pub use instance::{Instance, InstanceState};
pub use launcher::{ConsoleMessage, ConsoleStream};
