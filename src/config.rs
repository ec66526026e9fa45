//! Turns the raw stdin document and environment arguments into the
//! effective per-invocation configuration: resolves the VF identity through
//! sysfs, detects DPDK mode, validates the requested attributes and applies
//! the MAC precedence rules.

use crate::error::Error;
use crate::sysfs::SysFs;
use crate::types::{Args, NetConf};
use crate::util::parse_mac;

/// Default directory for the configuration cache and the PCI ownership
/// registry.
pub const DEFAULT_CNI_DIR: &str = "/var/lib/cni/sriov";

/// Builds the effective configuration for ADD.
///
/// `deviceID` is the only mandatory SR-IOV field; the PF name and VF index
/// are derived from sysfs when absent and cross-checked when present.
pub fn load_conf(args: &Args, sysfs: &SysFs) -> Result<NetConf, Error> {
    let mut conf = args
        .config
        .clone()
        .ok_or_else(|| Error::InvalidNetworkConfig("no network configuration given".to_string()))?;

    if conf.device_id.is_empty() {
        return Err(Error::InvalidNetworkConfig(
            "\"deviceID\" is required".to_string(),
        ));
    }

    let master = match conf.master.clone() {
        Some(master) => master,
        None => sysfs.pf_name(&conf.device_id)?,
    };

    let vf_id = sysfs.vf_id(&conf.device_id, &master)?;
    if let Some(given) = conf.vf_id {
        if given != vf_id {
            return Err(Error::InvalidNetworkConfig(format!(
                "\"vf\" is {given} but device {} is VF {vf_id} of {master}",
                conf.device_id
            )));
        }
    }

    conf.master = Some(master);
    conf.vf_id = Some(vf_id);
    conf.dpdk_mode = sysfs.is_userspace_driver(&conf.device_id)?;

    validate(&conf)?;

    conf.mac = match effective_mac(&conf, args.args.as_deref())? {
        Some(mac) => {
            parse_mac(&mac)?;
            Some(mac)
        }
        None => None,
    };

    Ok(conf)
}

/// Validates the requested VF attributes.
pub fn validate(conf: &NetConf) -> Result<(), Error> {
    if let Some(vlan) = conf.vlan {
        if vlan > 4094 {
            return Err(Error::InvalidNetworkConfig(format!(
                "\"vlan\" must be in 0..=4094, got {vlan}"
            )));
        }
    }
    if let Some(qos) = conf.vlan_qos {
        if conf.vlan.is_none() {
            return Err(Error::InvalidNetworkConfig(
                "\"vlanQoS\" requires \"vlan\"".to_string(),
            ));
        }
        if qos > 7 {
            return Err(Error::InvalidNetworkConfig(format!(
                "\"vlanQoS\" must be in 0..=7, got {qos}"
            )));
        }
        if conf.vlan == Some(0) && qos != 0 {
            return Err(Error::InvalidNetworkConfig(
                "a non-zero \"vlanQoS\" requires a non-zero \"vlan\"".to_string(),
            ));
        }
    }
    if conf.vlan_proto.is_some() && conf.vlan.is_none() {
        return Err(Error::InvalidNetworkConfig(
            "\"vlanProto\" requires \"vlan\"".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (conf.min_tx_rate, conf.max_tx_rate) {
        if max == 0 || min > max {
            return Err(Error::InvalidNetworkConfig(format!(
                "invalid rate limits: min_tx_rate {min} must not exceed max_tx_rate {max}"
            )));
        }
    }
    Ok(())
}

/// Resolves the requested MAC with its precedence chain
/// (`runtimeConfig.mac` over the `MAC=` env argument over the static `mac`
/// field), normalized to lower case. `None` means no MAC mutation at all.
fn effective_mac(conf: &NetConf, env_args: Option<&str>) -> Result<Option<String>, Error> {
    let runtime_mac = conf
        .runtime_config
        .as_ref()
        .and_then(|rc| rc.mac.clone())
        .filter(|m| !m.is_empty());
    let env_mac = env_args_mac(env_args)?;
    let static_mac = conf.mac.clone().filter(|m| !m.is_empty());

    Ok(runtime_mac
        .or(env_mac)
        .or(static_mac)
        .map(|m| m.to_lowercase()))
}

/// Extracts the legacy `MAC=` entry from the semicolon-separated CNI_ARGS
/// string.
fn env_args_mac(env_args: Option<&str>) -> Result<Option<String>, Error> {
    let Some(env_args) = env_args else {
        return Ok(None);
    };
    for pair in env_args.split(';').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("MAC", value)) if !value.is_empty() => return Ok(Some(value.to_string())),
            Some(_) => {}
            None => {
                return Err(Error::InvalidEnvValue(format!(
                    "CNI_ARGS entry {pair:?} is not a KEY=VALUE pair"
                )))
            }
        }
    }
    Ok(None)
}

/// Initializes logging from the configuration's `logLevel`/`logFile`
/// fields, with `RUST_LOG` as an operator override. Stdout carries the CNI
/// result document, so logs go to stderr (or the configured file) only.
/// Safe to call more than once; later calls keep the first configuration.
pub fn init_logging(conf: &NetConf) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(conf.log_level.as_deref().unwrap_or("info")),
    );
    let log_file = conf.log_file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match log_file {
        Some(file) => builder.target(env_logger::Target::Pipe(Box::new(file))),
        None => builder.target(env_logger::Target::Stderr),
    };
    let _ = builder.try_init();
}

/// The hardware address reported in the ADD result: the administered MAC if
/// one was requested, otherwise whatever the VF had. DPDK devices without a
/// requested MAC report none.
pub fn mac_for_result(conf: &NetConf) -> String {
    if let Some(mac) = &conf.mac {
        return mac.clone();
    }
    if !conf.dpdk_mode {
        if let Some(orig) = &conf.orig_vf_state {
            return orig.effective_mac.clone();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;

    use rstest::rstest;

    use super::{effective_mac, env_args_mac, load_conf, mac_for_result, validate};
    use crate::error::Error;
    use crate::sysfs::SysFs;
    use crate::types::{Args, NetConf, RuntimeConf, VfState};

    fn conf_with(f: impl FnOnce(&mut NetConf)) -> NetConf {
        let mut conf = NetConf {
            cni_version: "1.0.0".to_string(),
            name: "sriov-net".to_string(),
            r#type: "sriov".to_string(),
            master: Some("ens1f0".to_string()),
            device_id: "0000:03:00.1".to_string(),
            ..Default::default()
        };
        f(&mut conf);
        conf
    }

    fn fake_sysfs(root: &Path) -> SysFs {
        let class_net = root.join("class_net");
        let bus_pci = root.join("bus_pci");
        let pf_device = bus_pci.join("0000:03:00.0");
        fs::create_dir_all(pf_device.join("net").join("ens1f0")).unwrap();

        let pf_dir = class_net.join("ens1f0").join("device");
        fs::create_dir_all(&pf_dir).unwrap();
        fs::write(pf_dir.join("sriov_numvfs"), "2\n").unwrap();

        for (i, vf) in ["0000:03:00.1", "0000:03:00.2"].iter().enumerate() {
            let vf_device = bus_pci.join(vf);
            fs::create_dir_all(&vf_device).unwrap();
            symlink(&vf_device, pf_dir.join(format!("virtfn{i}"))).unwrap();
            symlink(&pf_device, vf_device.join("physfn")).unwrap();
        }

        SysFs { class_net, bus_pci }
    }

    #[test]
    fn load_conf_derives_vf_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = fake_sysfs(tmp.path());

        // Neither master nor vf given; both derived.
        let args = Args {
            config: Some(conf_with(|c| c.master = None)),
            ..Default::default()
        };
        let conf = load_conf(&args, &sysfs).unwrap();
        assert_eq!(conf.master.as_deref(), Some("ens1f0"));
        assert_eq!(conf.vf_id, Some(0));
        assert!(!conf.dpdk_mode);
    }

    #[test]
    fn load_conf_rejects_vf_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = fake_sysfs(tmp.path());

        let args = Args {
            config: Some(conf_with(|c| c.vf_id = Some(1))),
            ..Default::default()
        };
        assert!(matches!(
            load_conf(&args, &sysfs),
            Err(Error::InvalidNetworkConfig(_))
        ));
    }

    #[test]
    fn load_conf_requires_device_id() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = fake_sysfs(tmp.path());

        let args = Args {
            config: Some(conf_with(|c| c.device_id = String::new())),
            ..Default::default()
        };
        assert!(matches!(
            load_conf(&args, &sysfs),
            Err(Error::InvalidNetworkConfig(_))
        ));
    }

    #[test]
    fn load_conf_detects_dpdk_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = fake_sysfs(tmp.path());
        let drivers = tmp.path().join("drivers");
        fs::create_dir_all(drivers.join("vfio-pci")).unwrap();
        symlink(
            drivers.join("vfio-pci"),
            sysfs.bus_pci.join("0000:03:00.1").join("driver"),
        )
        .unwrap();

        let args = Args {
            config: Some(conf_with(|_| {})),
            ..Default::default()
        };
        let conf = load_conf(&args, &sysfs).unwrap();
        assert!(conf.dpdk_mode);
    }

    #[rstest]
    #[case(|_c: &mut NetConf| {}, true)]
    #[case(|c: &mut NetConf| c.vlan = Some(4094), true)]
    #[case(|c: &mut NetConf| c.vlan = Some(4095), false)]
    #[case(|c: &mut NetConf| { c.vlan = Some(100); c.vlan_qos = Some(7); }, true)]
    #[case(|c: &mut NetConf| { c.vlan = Some(100); c.vlan_qos = Some(8); }, false)]
    #[case(|c: &mut NetConf| c.vlan_qos = Some(1), false)]
    #[case(|c: &mut NetConf| { c.vlan = Some(0); c.vlan_qos = Some(1); }, false)]
    #[case(|c: &mut NetConf| c.vlan_proto = Some(crate::types::VlanProto::Dot1Ad), false)]
    #[case(|c: &mut NetConf| { c.min_tx_rate = Some(10); c.max_tx_rate = Some(100); }, true)]
    #[case(|c: &mut NetConf| { c.min_tx_rate = Some(100); c.max_tx_rate = Some(10); }, false)]
    #[case(|c: &mut NetConf| { c.min_tx_rate = Some(0); c.max_tx_rate = Some(0); }, false)]
    fn validate_attribute_ranges(#[case] mutate: fn(&mut NetConf), #[case] expect_ok: bool) {
        let conf = conf_with(mutate);
        assert_eq!(validate(&conf).is_ok(), expect_ok);
    }

    #[test]
    fn mac_precedence_runtime_config_wins() {
        let conf = conf_with(|c| {
            c.mac = Some("AA:AA:AA:AA:AA:01".to_string());
            c.runtime_config = Some(RuntimeConf {
                mac: Some("CC:CC:CC:CC:CC:03".to_string()),
                ..Default::default()
            });
        });
        let mac = effective_mac(&conf, Some("MAC=BB:BB:BB:BB:BB:02")).unwrap();
        assert_eq!(mac.as_deref(), Some("cc:cc:cc:cc:cc:03"));
    }

    #[test]
    fn mac_precedence_env_args_beat_static() {
        let conf = conf_with(|c| c.mac = Some("AA:AA:AA:AA:AA:01".to_string()));
        let mac = effective_mac(&conf, Some("IgnoreUnknown=1;MAC=BB:BB:BB:BB:BB:02")).unwrap();
        assert_eq!(mac.as_deref(), Some("bb:bb:bb:bb:bb:02"));
    }

    #[test]
    fn mac_precedence_static_is_lower_cased() {
        let conf = conf_with(|c| c.mac = Some("AA:AA:AA:AA:AA:01".to_string()));
        let mac = effective_mac(&conf, None).unwrap();
        assert_eq!(mac.as_deref(), Some("aa:aa:aa:aa:aa:01"));
    }

    #[test]
    fn mac_precedence_absent_everywhere() {
        let conf = conf_with(|_| {});
        assert_eq!(effective_mac(&conf, Some("K8S_POD_NAME=pod1")).unwrap(), None);
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("MAC=aa:bb:cc:dd:ee:01"), Some("aa:bb:cc:dd:ee:01"))]
    #[case(Some("IgnoreUnknown=1;MAC=aa:bb:cc:dd:ee:01;K8S_POD_NAME=p"), Some("aa:bb:cc:dd:ee:01"))]
    #[case(Some("IgnoreUnknown=1"), None)]
    fn env_args_mac_extraction(#[case] input: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(env_args_mac(input).unwrap().as_deref(), expected);
    }

    #[test]
    fn env_args_mac_rejects_malformed_pairs() {
        assert!(env_args_mac(Some("NOT-A-PAIR")).is_err());
    }

    #[test]
    fn result_mac_prefers_configured_over_snapshot() {
        let mut conf = conf_with(|c| c.mac = Some("aa:bb:cc:dd:ee:01".to_string()));
        conf.orig_vf_state = Some(VfState {
            effective_mac: "52:54:00:12:34:56".to_string(),
            ..Default::default()
        });
        assert_eq!(mac_for_result(&conf), "aa:bb:cc:dd:ee:01");

        conf.mac = None;
        assert_eq!(mac_for_result(&conf), "52:54:00:12:34:56");

        conf.dpdk_mode = true;
        assert_eq!(mac_for_result(&conf), "");
    }
}
