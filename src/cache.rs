//! On-disk persistence of the effective configuration between ADD and DEL.
//!
//! DEL receives almost no fresh input from the runtime, so ADD writes the
//! whole effective [`NetConf`] (including the pre-mutation VF snapshot) to
//! `{cni_dir}/{container_id}-{ifname}` and DEL reads it back. A missing
//! entry on load is reported as `None`, not an error: repeated DEL calls
//! from a restarted orchestrator must terminate instead of looping on a
//! cache that was already cleaned up.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::types::NetConf;

#[derive(Debug, Clone)]
pub struct NetConfCache {
    dir: PathBuf,
}

impl NetConfCache {
    pub fn new(dir: &Path) -> NetConfCache {
        NetConfCache {
            dir: dir.to_path_buf(),
        }
    }

    /// The entry location is deterministic from the attachment identity.
    fn entry_path(&self, container_id: &str, ifname: &str) -> PathBuf {
        self.dir.join(format!("{container_id}-{ifname}"))
    }

    /// Persists the configuration. Called only after the VF has been handed
    /// to the sandbox, so entry existence implies a live attachment.
    pub fn save(&self, container_id: &str, ifname: &str, conf: &NetConf) -> Result<PathBuf, Error> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Cache(format!(
                "failed to create cache directory {}: {e}",
                self.dir.display()
            ))
        })?;
        let path = self.entry_path(container_id, ifname);
        let data = serde_json::to_vec(conf)
            .map_err(|e| Error::Cache(format!("failed to serialize configuration: {e}")))?;
        fs::write(&path, data).map_err(|e| {
            Error::Cache(format!("failed to write cache entry {}: {e}", path.display()))
        })?;
        Ok(path)
    }

    /// Reads back the configuration saved by ADD, returning the entry path
    /// so the caller can delete it after a successful teardown.
    /// Returns `None` when no entry exists.
    pub fn load(
        &self,
        container_id: &str,
        ifname: &str,
    ) -> Result<Option<(NetConf, PathBuf)>, Error> {
        let path = self.entry_path(container_id, ifname);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Cache(format!(
                    "failed to read cache entry {}: {e}",
                    path.display()
                )))
            }
        };
        let conf = serde_json::from_slice(&data).map_err(|e| {
            Error::Cache(format!(
                "failed to parse cache entry {}: {e}",
                path.display()
            ))
        })?;
        Ok(Some((conf, path)))
    }

    /// Removes a cache entry. Absence is not an error.
    pub fn delete(&self, path: &Path) -> Result<(), Error> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Cache(format!(
                "failed to remove cache entry {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NetConfCache;
    use crate::types::{NetConf, VfState};

    fn sample_conf() -> NetConf {
        NetConf {
            cni_version: "1.0.0".to_string(),
            name: "sriov-net".to_string(),
            r#type: "sriov".to_string(),
            master: Some("ens1f0".to_string()),
            device_id: "0000:03:00.1".to_string(),
            vf_id: Some(1),
            orig_vf_state: Some(VfState {
                host_if_name: "ens1f0v1".to_string(),
                effective_mac: "52:54:00:12:34:56".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn save_load_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = NetConfCache::new(tmp.path());

        let saved_path = cache.save("pod1-container", "net1", &sample_conf()).unwrap();
        assert!(saved_path.ends_with("pod1-container-net1"));

        let (loaded, path) = cache.load("pod1-container", "net1").unwrap().unwrap();
        assert_eq!(loaded, sample_conf());
        assert_eq!(path, saved_path);

        cache.delete(&path).unwrap();
        assert!(cache.load("pod1-container", "net1").unwrap().is_none());
    }

    #[test]
    fn load_missing_entry_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = NetConfCache::new(tmp.path());

        assert!(cache.load("unknown", "net1").unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = NetConfCache::new(tmp.path());

        let path = cache.save("pod1-container", "net1", &sample_conf()).unwrap();
        cache.delete(&path).unwrap();
        cache.delete(&path).unwrap();
    }

    #[test]
    fn entries_are_keyed_by_container_and_ifname() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = NetConfCache::new(tmp.path());

        cache.save("pod1-container", "net1", &sample_conf()).unwrap();
        assert!(cache.load("pod1-container", "net2").unwrap().is_none());
        assert!(cache.load("pod2-container", "net1").unwrap().is_none());
    }
}
