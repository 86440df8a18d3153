//! OVF transport ISO construction.
//!
//! The transport image is attached to the instance as removable media and
//! carries the metadata envelope (instance id, hostname, base64 user-data)
//! that the in-guest init agent reads at first boot. The envelope is
//! rendered into a scratch directory and packed with `genisoimage`; the
//! scratch directory is removed whether or not the authoring step succeeds.

use std::path::Path;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::process::Command;
use tracing::info;

use crate::config::InstanceConfig;
use crate::error::{InstanceError, Result};

/// ISO volume title the in-guest agent scans for.
const VOLUME_TITLE: &str = "OVF-TRANSPORT";

/// Filename of the envelope inside the ISO.
const ENVELOPE_FILENAME: &str = "ovf-env.xml";

/// The OVF environment template. No schema validation is performed; the
/// substitution points are filled verbatim.
const OVF_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Environment xmlns="http://schemas.dmtf.org/ovf/environment/1"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:oe="http://schemas.dmtf.org/ovf/environment/1"
    xsi:schemaLocation=
        "http://schemas.dmtf.org/ovf/environment/1 ../dsp8027.xsd"
    oe:id="WebTier">

    <!-- Information about hypervisor platform -->
    <oe:PlatformSection>
        <Kind>ESX Server</Kind>
        <Version>3.0.1</Version>
        <Vendor>VMware, Inc.</Vendor>
        <Locale>en_US</Locale>
    </oe:PlatformSection>

    <!-- Properties defined for this virtual machine -->
    <PropertySection>
        <Property oe:key="instance-id" oe:value="@instance_id@"/>
        <Property oe:key="hostname" oe:value="@hostname@"/>
        <Property oe:key="user-data" oe:value="@userdata_base64@"/>
        <Property oe:key="seedfrom" oe:value=""/>
    </PropertySection>

</Environment>
"#;

/// Ensure the transport ISO exists and return its path.
///
/// Idempotent: the ISO is built only if the target file is absent, so the
/// envelope (and any generated instance id) is fixed for the lifetime of
/// the instance's data directory.
pub async fn ensure_transport(config: &InstanceConfig) -> Result<PathBuf> {
    let iso = config.transport_path();
    if iso.exists() {
        return Ok(iso);
    }

    let instance_id = config.instance_id();
    let hostname = config.hostname();
    let userdata = config.userdata();
    info!(iso = %iso.display(), %instance_id, %hostname, "building OVF transport");

    // The scratch directory is removed when `staging` drops, on success or
    // on any error below.
    let staging = tempfile::tempdir().map_err(|e| InstanceError::io(std::env::temp_dir(), e))?;
    let envelope = staging.path().join(ENVELOPE_FILENAME);
    std::fs::write(&envelope, render_envelope(&instance_id, &hostname, &userdata))
        .map_err(|e| InstanceError::io(&envelope, e))?;

    genisoimage(VOLUME_TITLE, &iso, staging.path()).await?;
    Ok(iso)
}

/// Render the OVF environment document. Empty user-data encodes to an
/// empty property value.
fn render_envelope(instance_id: &str, hostname: &str, userdata: &str) -> String {
    let userdata_base64 = if userdata.is_empty() {
        String::new()
    } else {
        BASE64.encode(userdata)
    };

    OVF_TEMPLATE
        .replace("@instance_id@", instance_id)
        .replace("@hostname@", hostname)
        .replace("@userdata_base64@", &userdata_base64)
}

/// Author an ISO from a directory with `genisoimage`.
async fn genisoimage(title: &str, outfile: &Path, dir: &Path) -> Result<()> {
    let output = Command::new("genisoimage")
        .arg("-V")
        .arg(title)
        .arg("-o")
        .arg(outfile)
        .arg("-r")
        .arg(dir)
        .output()
        .await
        .map_err(|e| InstanceError::io(outfile, e))?;

    if !output.status.success() {
        return Err(InstanceError::Tool {
            tool: "genisoimage",
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}
