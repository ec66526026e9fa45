//! PCI address ownership registry.
//!
//! One file per allocated VF, named after its PCI address, whose body is the
//! path of the owning sandbox's network namespace. Exclusivity across
//! concurrent plugin invocations is delegated to the filesystem's atomic
//! exclusive-create: whichever invocation creates the file owns the VF.
//!
//! A reservation left behind by a crashed invocation names a namespace that
//! no longer exists on the host; such stale owners are reclaimed silently.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct PciAllocator {
    dir: PathBuf,
}

impl PciAllocator {
    pub fn new(dir: &Path) -> PciAllocator {
        PciAllocator {
            dir: dir.to_path_buf(),
        }
    }

    /// A PCI address never contains a path separator, but the device id
    /// comes from the network configuration, so escape anyway.
    fn file_path(&self, device_id: &str) -> PathBuf {
        self.dir.join(device_id.replace('/', "_"))
    }

    /// Records `ns_path` as the owner of `device_id`.
    ///
    /// Fails with [`Error::AllocatorConflict`] when the device is already
    /// owned by a namespace that still exists on the host. An owner whose
    /// namespace is gone is treated as a leftover of a crashed invocation
    /// and replaced.
    pub fn reserve(&self, device_id: &str, ns_path: &Path) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Cache(format!(
                "failed to create allocator directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.file_path(device_id);
        // One reclaim attempt: if the second exclusive create loses a race
        // as well, the device genuinely is contended.
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(ns_path.display().to_string().as_bytes())
                        .map_err(|e| {
                            Error::Cache(format!(
                                "failed to record ownership of {device_id}: {e}"
                            ))
                        })?;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = self.owner(device_id)?.unwrap_or_default();
                    if !owner.is_empty() && Path::new(&owner).exists() {
                        return Err(Error::AllocatorConflict(format!(
                            "device {device_id} is already allocated to sandbox {owner}"
                        )));
                    }
                    if attempt > 0 {
                        return Err(Error::AllocatorConflict(format!(
                            "device {device_id} is contended by a concurrent invocation"
                        )));
                    }
                    debug!("reclaiming stale allocation of {device_id} (owner {owner:?})");
                    self.release(device_id)?;
                }
                Err(e) => {
                    return Err(Error::Cache(format!(
                        "failed to create allocation file {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        unreachable!("reserve loop always returns")
    }

    /// Drops the ownership record. Absence is not an error.
    pub fn release(&self, device_id: &str) -> Result<(), Error> {
        let path = self.file_path(device_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Cache(format!(
                "failed to remove allocation file {}: {e}",
                path.display()
            ))),
        }
    }

    /// The namespace path recorded as the owner, if any.
    pub fn owner(&self, device_id: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.file_path(device_id)) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Cache(format!(
                "failed to read allocation of {device_id}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::PciAllocator;
    use crate::error::Error;

    const DEVICE: &str = "0000:03:00.1";

    // The test process certainly has a network namespace, which makes this
    // a namespace path that exists on the host.
    const LIVE_NS: &str = "/proc/self/ns/net";

    #[test]
    fn reserve_records_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(tmp.path());

        allocator.reserve(DEVICE, Path::new(LIVE_NS)).unwrap();
        assert_eq!(allocator.owner(DEVICE).unwrap().unwrap(), LIVE_NS);
        // The on-disk name is the PCI address itself.
        assert!(tmp.path().join(DEVICE).exists());
    }

    #[test]
    fn reserve_conflicts_on_live_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(tmp.path());

        allocator.reserve(DEVICE, Path::new(LIVE_NS)).unwrap();
        let err = allocator
            .reserve(DEVICE, Path::new("/var/run/netns/other"))
            .unwrap_err();
        match err {
            Error::AllocatorConflict(details) => {
                assert!(details.contains(LIVE_NS));
            }
            other => panic!("expected AllocatorConflict, got {other:?}"),
        }
        // The original owner is untouched.
        assert_eq!(allocator.owner(DEVICE).unwrap().unwrap(), LIVE_NS);
    }

    #[test]
    fn reserve_reclaims_stale_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(tmp.path());

        allocator
            .reserve(DEVICE, Path::new("/var/run/netns/gone"))
            .unwrap();
        allocator.reserve(DEVICE, Path::new(LIVE_NS)).unwrap();
        assert_eq!(allocator.owner(DEVICE).unwrap().unwrap(), LIVE_NS);
    }

    #[test]
    fn release_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(tmp.path());

        allocator.reserve(DEVICE, Path::new(LIVE_NS)).unwrap();
        allocator.release(DEVICE).unwrap();
        allocator.release(DEVICE).unwrap();
        assert!(allocator.owner(DEVICE).unwrap().is_none());
    }

    #[test]
    fn devices_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PciAllocator::new(tmp.path());

        allocator.reserve(DEVICE, Path::new(LIVE_NS)).unwrap();
        allocator
            .reserve("0000:03:00.2", Path::new(LIVE_NS))
            .unwrap();
        allocator.release(DEVICE).unwrap();
        assert!(allocator.owner("0000:03:00.2").unwrap().is_some());
    }
}
