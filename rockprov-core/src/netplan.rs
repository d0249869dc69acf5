//! Netplan document rendering for the target OS.
//!
//! Exactly one of two shapes is produced: `01-dhcp.yaml` or `01-static-ip.yaml`.

use crate::config::NetworkConfig;
use crate::errors::ProvisionError;
use std::fs;
use std::path::{Path, PathBuf};

pub const NETPLAN_DIR: &str = "etc/netplan";
pub const DHCP_FILE: &str = "01-dhcp.yaml";
pub const STATIC_FILE: &str = "01-static-ip.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetplanFile {
    pub file_name: &'static str,
    pub contents: String,
}

pub fn render(network: &NetworkConfig) -> NetplanFile {
    match network {
        NetworkConfig::Dhcp { interface } => NetplanFile {
            file_name: DHCP_FILE,
            contents: format!(
                "network:\n  version: 2\n  renderer: networkd\n  ethernets:\n    {interface}:\n      dhcp4: yes\n"
            ),
        },
        NetworkConfig::Static {
            interface,
            address,
            gateway,
        } => NetplanFile {
            file_name: STATIC_FILE,
            contents: format!(
                "network:\n  version: 2\n  renderer: networkd\n  ethernets:\n    {interface}:\n      addresses:\n        - {address}\n      gateway4: {gateway}\n"
            ),
        },
    }
}

/// Write the rendered document under `root/etc/netplan`, removing the other shape if present.
pub fn write_to(root: &Path, network: &NetworkConfig) -> Result<PathBuf, ProvisionError> {
    let file = render(network);
    let dir = root.join(NETPLAN_DIR);
    fs::create_dir_all(&dir)
        .map_err(|err| ProvisionError::io(format!("create {}", dir.display()), err))?;

    let other = if file.file_name == DHCP_FILE {
        STATIC_FILE
    } else {
        DHCP_FILE
    };
    let stale = dir.join(other);
    if stale.exists() {
        fs::remove_file(&stale)
            .map_err(|err| ProvisionError::io(format!("remove {}", stale.display()), err))?;
    }

    let path = dir.join(file.file_name);
    fs::write(&path, file.contents)
        .map_err(|err| ProvisionError::io(format!("write {}", path.display()), err))?;
    log::info!("🌐 Wrote {}", path.display());
    Ok(path)
}
