//! Sysfs resolution of VF identity: PCI address to VF index and back, PF
//! name discovery, VF netdev name discovery and userspace-driver detection.
//!
//! All lookups go through a [`SysFs`] value carrying the sysfs roots so the
//! tests can point it at a scratch directory populated with the same
//! symlink layout the kernel provides.

use std::fs;
use std::path::PathBuf;

use crate::error::Error;

/// Drivers that take the VF away from the kernel network stack.
/// A VF bound to one of these has no netdev.
const USERSPACE_DRIVERS: [&str; 3] = ["vfio-pci", "uio_pci_generic", "igb_uio"];

/// Accessor for the `/sys` hierarchies this plugin reads.
#[derive(Debug, Clone)]
pub struct SysFs {
    /// Usually `/sys/class/net`.
    pub class_net: PathBuf,
    /// Usually `/sys/bus/pci/devices`.
    pub bus_pci: PathBuf,
}

impl Default for SysFs {
    fn default() -> Self {
        SysFs {
            class_net: PathBuf::from("/sys/class/net"),
            bus_pci: PathBuf::from("/sys/bus/pci/devices"),
        }
    }
}

impl SysFs {
    /// Looks up the VF index of `device_id` by scanning the PF's `virtfn*`
    /// symlinks.
    pub fn vf_id(&self, device_id: &str, pf_name: &str) -> Result<u32, Error> {
        let num_vfs = self.num_vfs(pf_name)?;
        for vf in 0..num_vfs {
            let link = self
                .class_net
                .join(pf_name)
                .join("device")
                .join(format!("virtfn{vf}"));
            let target = match fs::read_link(&link) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if target.file_name().and_then(|n| n.to_str()) == Some(device_id) {
                return Ok(vf);
            }
        }
        Err(Error::Sysfs(format!(
            "unable to get VF index for device {device_id} on PF {pf_name}"
        )))
    }

    /// Number of VFs currently provisioned on the PF.
    pub fn num_vfs(&self, pf_name: &str) -> Result<u32, Error> {
        let path = self
            .class_net
            .join(pf_name)
            .join("device")
            .join("sriov_numvfs");
        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::Sysfs(format!(
                "failed to read sriov_numvfs of {pf_name}: {e}"
            ))
        })?;
        raw.trim_end()
            .parse::<u32>()
            .map_err(|e| Error::Sysfs(format!("failed to parse sriov_numvfs of {pf_name}: {e}")))
    }

    /// Resolves the PF netdev name of a VF through its `physfn` symlink.
    pub fn pf_name(&self, device_id: &str) -> Result<String, Error> {
        let net_dir = self.bus_pci.join(device_id).join("physfn").join("net");
        let mut names = self.netdev_names(&net_dir)?;
        names.pop().ok_or_else(|| {
            Error::Sysfs(format!("no PF netdev found for device {device_id}"))
        })
    }

    /// Current netdev name of the VF itself, or None when the device exists
    /// but exposes no netdev (userspace driver bound).
    pub fn vf_netdev_name(&self, device_id: &str) -> Result<Option<String>, Error> {
        let device_dir = self.bus_pci.join(device_id);
        if !device_dir.exists() {
            return Err(Error::Sysfs(format!("PCI device {device_id} not found")));
        }
        let net_dir = device_dir.join("net");
        if !net_dir.exists() {
            return Ok(None);
        }
        let mut names = self.netdev_names(&net_dir)?;
        Ok(names.pop())
    }

    /// True when the VF is bound to a userspace driver and therefore has no
    /// kernel netdev to manage.
    pub fn is_userspace_driver(&self, device_id: &str) -> Result<bool, Error> {
        let link = self.bus_pci.join(device_id).join("driver");
        let target = match fs::read_link(&link) {
            Ok(t) => t,
            // An unbound device is not in DPDK mode.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(Error::Sysfs(format!(
                    "failed to read driver of {device_id}: {e}"
                )))
            }
        };
        let driver = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(USERSPACE_DRIVERS.contains(&driver.as_str()))
    }

    fn netdev_names(&self, dir: &std::path::Path) -> Result<Vec<String>, Error> {
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::Sysfs(format!("failed to read {}: {e}", dir.display())))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Sysfs(format!("failed to read {}: {e}", dir.display())))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Writes the per-interface `arp_notify` and `ndisc_notify` flags so the
/// kernel announces later link events on its own. Must run inside the
/// namespace owning the interface.
pub fn enable_arp_and_ndisc_notify(ifname: &str) -> Result<(), Error> {
    for path in [
        format!("/proc/sys/net/ipv4/conf/{ifname}/arp_notify"),
        format!("/proc/sys/net/ipv6/conf/{ifname}/ndisc_notify"),
    ] {
        fs::write(&path, "1")
            .map_err(|e| Error::Sysfs(format!("failed to write {path}: {e}")))?;
    }
    Ok(())
}
