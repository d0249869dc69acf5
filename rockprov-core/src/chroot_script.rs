//! The shell procedure executed inside the target chroot.

use crate::config::ProvisioningConfig;

/// Path inside the target where the boot partition's contents are snapshotted
/// before the boot partition is reformatted.
pub const BOOT_SNAPSHOT_DIR: &str = "mnt/boot";

/// Render the customization script. Every command must succeed (`set -e`).
///
/// Network configuration is written from the host, not by this script.
pub fn render(cfg: &ProvisioningConfig) -> String {
    let pkgs = &cfg.packages;
    let mut script = String::new();
    script.push_str("set -eo pipefail\n");
    script.push_str("export DEBIAN_FRONTEND=noninteractive\n");
    script.push_str(&format!("export DISTRO={}\n", pkgs.repo_distro));
    script.push_str(&format!(
        "wget -O - {} | apt-key add -\n",
        pkgs.repo_key_url
    ));
    script.push_str("apt update -y\n");
    script.push_str("apt upgrade -y\n");
    if !pkgs.apt.is_empty() {
        script.push_str(&format!("apt install -y {}\n", pkgs.apt.join(" ")));
    }
    if !pkgs.pip.is_empty() {
        script.push_str(&format!("python3 -m pip install {}\n", pkgs.pip.join(" ")));
    }
    script.push_str("systemctl enable docker.service\n");
    // Snapshot the boot partition (mounted at /boot inside the chroot) onto the root fs.
    script.push_str(&format!("mkdir -p /{}\n", BOOT_SNAPSHOT_DIR));
    script.push_str(&format!("cp -a /boot/. /{}/\n", BOOT_SNAPSHOT_DIR));
    script.push_str(&format!(
        "sed -i '/\\/boot/s|.*|{} /boot ext4 defaults 0 2|' /etc/fstab\n",
        cfg.devices.boot_partition.display()
    ));
    script
}
