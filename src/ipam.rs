//! Invocation of the delegated IPAM plugin.
//!
//! The IPAM plugin is a separate CNI executable resolved on `CNI_PATH`. It
//! receives the same environment contract as this plugin and the effective
//! network configuration on stdin, and answers with a CNI result (or error
//! document) on stdout. Its internals are a black box here.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::debug;

use crate::error::Error;
use crate::types::{Args, CNIResult, ErrorResult, NetConf};

/// Runs the IPAM ADD and returns the address assignment.
pub fn exec_add(args: &Args, conf: &NetConf) -> Result<CNIResult, Error> {
    let stdout = exec(args, conf, "ADD")?;
    let result: CNIResult = serde_json::from_slice(&stdout).map_err(|e| {
        Error::Ipam(format!(
            "failed to parse result of IPAM plugin {}: {e}",
            ipam_type(conf)
        ))
    })?;
    if result.ips.is_empty() {
        return Err(Error::Ipam(format!(
            "IPAM plugin {} returned missing IP config",
            ipam_type(conf)
        )));
    }
    Ok(result)
}

/// Runs the IPAM DEL to free the allocation.
pub fn exec_del(args: &Args, conf: &NetConf) -> Result<(), Error> {
    exec(args, conf, "DEL").map(|_| ())
}

fn ipam_type(conf: &NetConf) -> String {
    conf.ipam
        .as_ref()
        .map(|ipam| ipam.r#type.clone())
        .unwrap_or_default()
}

fn exec(args: &Args, conf: &NetConf, command: &str) -> Result<Vec<u8>, Error> {
    let plugin = ipam_type(conf);
    let executable = find_plugin(&args.path, &plugin)?;
    let stdin_data = serde_json::to_vec(conf)
        .map_err(|e| Error::Ipam(format!("failed to serialize configuration for IPAM: {e}")))?;
    let cni_path = std::env::join_paths(&args.path)
        .map_err(|e| Error::Ipam(format!("invalid CNI_PATH: {e}")))?;

    debug!("invoking IPAM plugin {} for {command}", executable.display());

    let mut child = Command::new(&executable)
        .env("CNI_COMMAND", command)
        .env("CNI_CONTAINERID", &args.container_id)
        .env(
            "CNI_NETNS",
            args.netns
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
        .env("CNI_IFNAME", &args.ifname)
        .env("CNI_ARGS", args.args.clone().unwrap_or_default())
        .env("CNI_PATH", cni_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Ipam(format!("failed to spawn IPAM plugin {plugin}: {e}")))?;

    child
        .stdin
        .as_mut()
        .ok_or_else(|| Error::Ipam(format!("failed to open stdin of IPAM plugin {plugin}")))?
        .write_all(&stdin_data)
        .map_err(|e| Error::Ipam(format!("failed to write to IPAM plugin {plugin}: {e}")))?;

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Ipam(format!("failed to wait for IPAM plugin {plugin}: {e}")))?;

    if !output.status.success() {
        // A conforming plugin prints a CNI error document; fall back to its
        // stderr when it does not.
        if let Ok(doc) = serde_json::from_slice::<ErrorResult>(&output.stdout) {
            return Err(Error::Ipam(format!(
                "IPAM plugin {plugin} failed (code {}): {}: {}",
                doc.code, doc.msg, doc.details
            )));
        }
        return Err(Error::Ipam(format!(
            "IPAM plugin {plugin} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(output.stdout)
}

/// Resolves an executable by name on the CNI plugin search path.
fn find_plugin(paths: &[PathBuf], name: &str) -> Result<PathBuf, Error> {
    if name.is_empty() {
        return Err(Error::Ipam("IPAM type is empty".to_string()));
    }
    if name.contains('/') {
        return Err(Error::Ipam(format!(
            "IPAM type {name:?} must not contain path separators"
        )));
    }
    for dir in paths {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(Error::Ipam(format!(
        "failed to find IPAM plugin {name:?} on CNI_PATH"
    )))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::find_plugin;

    #[test]
    fn find_plugin_scans_path_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("host-local"), "").unwrap();

        let found = find_plugin(&[first.clone(), second.clone()], "host-local").unwrap();
        assert_eq!(found, second.join("host-local"));

        std::fs::write(first.join("host-local"), "").unwrap();
        let found = find_plugin(&[first.clone(), second], "host-local").unwrap();
        assert_eq!(found, first.join("host-local"));
    }

    #[test]
    fn find_plugin_rejects_bad_names() {
        assert!(find_plugin(&[PathBuf::from("/opt/cni/bin")], "").is_err());
        assert!(find_plugin(&[PathBuf::from("/opt/cni/bin")], "../evil").is_err());
    }

    #[test]
    fn find_plugin_missing_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_plugin(&[tmp.path().to_path_buf()], "host-local").is_err());
    }
}
