//! The VF lifecycle state machine.
//!
//! [`SriovManager`] drives the netlink capability through the ADD and DEL
//! sequences: snapshot the VF's administrative state from its PF, apply the
//! requested configuration, transport the netdev into the sandbox, bind the
//! IPAM result, and undo all of it on DEL or on any partial ADD failure.
//!
//! ADD progress is tracked step by step; a failure unwinds every completed
//! step in reverse from one place. Unwind errors are logged, never raised:
//! the original failure is what the runtime needs to see.

use std::path::{Path, PathBuf};

use ipnetwork::IpNetwork;
use log::{debug, warn};

use crate::allocator::PciAllocator;
use crate::announce::announce_ips;
use crate::cache::NetConfCache;
use crate::config::{self, DEFAULT_CNI_DIR};
use crate::error::Error;
use crate::ipam;
use crate::netlink::{LinkManager, Rtnl};
use crate::netns::NetNs;
use crate::sysfs::{enable_arp_and_ndisc_notify, SysFs};
use crate::types::{Args, CNIResult, Interface, NetConf, VfState};
use crate::util::{format_mac, is_zero_mac, parse_mac};

/// Orchestrates VF state transitions against the [`LinkManager`] capability.
pub struct SriovManager {
    nlink: Box<dyn LinkManager>,
    sysfs: SysFs,
}

impl Default for SriovManager {
    fn default() -> Self {
        SriovManager::new()
    }
}

impl SriovManager {
    pub fn new() -> SriovManager {
        SriovManager::with(Box::new(Rtnl), SysFs::default())
    }

    /// Construction seam for tests: any [`LinkManager`] and sysfs root.
    pub fn with(nlink: Box<dyn LinkManager>, sysfs: SysFs) -> SriovManager {
        SriovManager { nlink, sysfs }
    }

    fn master<'a>(&self, conf: &'a NetConf) -> Result<&'a str, Error> {
        conf.master
            .as_deref()
            .ok_or_else(|| Error::InvalidNetworkConfig("PF name is not resolved".to_string()))
    }

    fn vf_id(&self, conf: &NetConf) -> Result<u32, Error> {
        conf.vf_id
            .ok_or_else(|| Error::InvalidNetworkConfig("VF index is not resolved".to_string()))
    }

    /// Captures the VF's pre-mutation administrative state from the PF's VF
    /// table and the host-side netdev name from sysfs.
    pub fn fill_original_vf_info(&self, conf: &mut NetConf) -> Result<(), Error> {
        let master = self.master(conf)?;
        let vf_id = self.vf_id(conf)?;

        let pf = self.nlink.link_by_name_with_vfs(master)?;
        let vf = pf
            .vfs
            .iter()
            .find(|vf| vf.id == vf_id)
            .ok_or_else(|| Error::Netlink(format!("PF {master} reports no VF {vf_id}")))?;

        let host_if_name = if conf.dpdk_mode {
            String::new()
        } else {
            self.sysfs
                .vf_netdev_name(&conf.device_id)?
                .ok_or_else(|| {
                    Error::Sysfs(format!("device {} has no netdev", conf.device_id))
                })?
        };

        // The administered MAC wins; a VF nobody configured reports zeros
        // and the netdev's own address is what teardown must put back.
        let effective_mac = if !is_zero_mac(&vf.mac) {
            format_mac(&vf.mac)
        } else if !conf.dpdk_mode {
            let dev = self.nlink.link_by_name(&host_if_name)?;
            dev.hw_addr.as_deref().map(format_mac).unwrap_or_default()
        } else {
            String::new()
        };

        conf.orig_vf_state = Some(VfState {
            host_if_name,
            admin_mac: format_mac(&vf.mac),
            effective_mac,
            vlan: vf.vlan,
            vlan_qos: vf.qos,
            vlan_proto: vf.vlan_proto,
            spoof_chk: vf.spoofchk,
            trust: vf.trust,
            link_state: vf.link_state,
            min_tx_rate: vf.min_tx_rate,
            max_tx_rate: vf.max_tx_rate,
        });
        Ok(())
    }

    /// Applies the requested attributes to the VF through its PF.
    pub fn apply_vf_config(&self, conf: &NetConf) -> Result<(), Error> {
        let master = self.master(conf)?;
        let vf_id = self.vf_id(conf)?;
        let orig = conf
            .orig_vf_state
            .as_ref()
            .ok_or_else(|| Error::InvalidNetworkConfig("VF state not captured".to_string()))?;
        let pf = self.nlink.link_by_name(master)?;

        // MAC goes first; the attribute order matters to some drivers.
        if let Some(mac) = &conf.mac {
            let mac = parse_mac(mac)?;
            let final_trust = conf.trust.map(|t| t.as_bool()).unwrap_or(orig.trust);
            self.set_vf_mac_trusted(pf.index, vf_id, &mac, final_trust)?;
        }
        if let Some(vlan) = conf.vlan {
            let qos = conf.vlan_qos.unwrap_or(0);
            let proto = conf
                .vlan_proto
                .map(|p| p.ether_type())
                .unwrap_or(0x8100);
            self.nlink
                .link_set_vf_vlan(pf.index, vf_id, vlan, qos, proto)?;
        }
        if let Some(spoofchk) = conf.spoofchk {
            self.nlink
                .link_set_vf_spoofchk(pf.index, vf_id, spoofchk.as_bool())?;
        }
        if let Some(trust) = conf.trust {
            self.nlink
                .link_set_vf_trust(pf.index, vf_id, trust.as_bool())?;
        }
        if let Some(link_state) = conf.link_state {
            self.nlink
                .link_set_vf_link_state(pf.index, vf_id, link_state.as_u32())?;
        }
        if conf.min_tx_rate.is_some() || conf.max_tx_rate.is_some() {
            self.nlink.link_set_vf_rate(
                pf.index,
                vf_id,
                conf.min_tx_rate.unwrap_or(0),
                conf.max_tx_rate.unwrap_or(0),
            )?;
        }
        Ok(())
    }

    /// Restores every attribute the ADD touched back to the captured
    /// snapshot, through the PF.
    pub fn reset_vf_config(&self, conf: &NetConf) -> Result<(), Error> {
        let master = self.master(conf)?;
        let vf_id = self.vf_id(conf)?;
        let orig = conf
            .orig_vf_state
            .as_ref()
            .ok_or_else(|| Error::InvalidNetworkConfig("VF state not captured".to_string()))?;
        let pf = self.nlink.link_by_name(master)?;

        if conf.vlan.is_some() {
            self.nlink
                .link_set_vf_vlan(pf.index, vf_id, orig.vlan, orig.vlan_qos, orig.vlan_proto)?;
        }
        if conf.mac.is_some() && !orig.admin_mac.is_empty() {
            let admin_mac = parse_mac(&orig.admin_mac)?;
            self.set_vf_mac_trusted(pf.index, vf_id, &admin_mac, orig.trust)?;
        }
        if conf.spoofchk.is_some() {
            self.nlink
                .link_set_vf_spoofchk(pf.index, vf_id, orig.spoof_chk)?;
        }
        if conf.trust.is_some() {
            self.nlink.link_set_vf_trust(pf.index, vf_id, orig.trust)?;
        }
        if conf.link_state.is_some() {
            self.nlink
                .link_set_vf_link_state(pf.index, vf_id, orig.link_state)?;
        }
        if conf.min_tx_rate.is_some() || conf.max_tx_rate.is_some() {
            self.nlink
                .link_set_vf_rate(pf.index, vf_id, orig.min_tx_rate, orig.max_tx_rate)?;
        }
        Ok(())
    }

    /// Sets the administered VF MAC under a transiently-trusted state.
    /// Some drivers reject VF MAC changes while trust is off, so the bit is
    /// raised for the write and then forced to `final_trust`, even when the
    /// write fails.
    fn set_vf_mac_trusted(
        &self,
        pf_index: u32,
        vf_id: u32,
        mac: &[u8; 6],
        final_trust: bool,
    ) -> Result<(), Error> {
        self.nlink.link_set_vf_trust(pf_index, vf_id, true)?;
        let result = self.nlink.link_set_vf_mac(pf_index, vf_id, mac);
        let trust_result = self.nlink.link_set_vf_trust(pf_index, vf_id, final_trust);
        result?;
        trust_result
    }

    /// Moves the host VF netdev into the sandbox and shapes it: down, move,
    /// rename to the requested name, optional MAC on the netdev itself,
    /// announcement sysctls, up. A failure inside the sandbox pulls the
    /// netdev back to the host before returning.
    pub fn setup_vf(&self, conf: &NetConf, ifname: &str, netns: &NetNs) -> Result<(), Error> {
        let orig = conf
            .orig_vf_state
            .as_ref()
            .ok_or_else(|| Error::InvalidNetworkConfig("VF state not captured".to_string()))?;
        let host_name = orig.host_if_name.clone();

        let dev = self.nlink.link_by_name(&host_name)?;
        self.nlink.link_set_down(dev.index)?;

        // Carry the netdev across under a collision-proof temporary name;
        // the sandbox may already hold an interface named like either the
        // host name or the target name.
        let temp_name = format!("temp_{}", dev.index);
        let moved = self
            .nlink
            .link_set_name(dev.index, &temp_name)
            .and_then(|()| self.nlink.link_set_ns_fd(dev.index, netns.fd()));
        if let Err(e) = moved {
            let _ = self.nlink.link_set_name(dev.index, &host_name);
            let _ = self.nlink.link_set_up(dev.index);
            return Err(e);
        }

        let shaped = netns.run(|| {
            // The move may have assigned a new ifindex.
            let dev = self.nlink.link_by_name(&temp_name)?;
            self.nlink.link_set_name(dev.index, ifname)?;
            if let Some(mac) = &conf.mac {
                self.nlink
                    .link_set_hardware_addr(dev.index, &parse_mac(mac)?)?;
            }
            enable_arp_and_ndisc_notify(ifname)?;
            self.nlink.link_set_up(dev.index)?;
            Ok(())
        });
        if let Err(e) = shaped {
            warn!("pulling VF {} back to the host: {e}", conf.device_id);
            if let Err(undo) = self.retrieve_vf(&[&temp_name, ifname], &host_name, netns) {
                warn!("failed to retrieve VF {}: {undo}", conf.device_id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Returns the VF netdev from the sandbox to the host namespace under
    /// its original name, with the original effective MAC when the ADD
    /// changed it.
    pub fn release_vf(&self, conf: &NetConf, ifname: &str, netns: &NetNs) -> Result<(), Error> {
        let orig = conf
            .orig_vf_state
            .as_ref()
            .ok_or_else(|| Error::InvalidNetworkConfig("VF state not captured".to_string()))?;
        let host_ns = NetNs::current()?;
        netns.run(|| {
            let dev = self.nlink.link_by_name(ifname)?;
            self.nlink.link_set_down(dev.index)?;
            if conf.mac.is_some() && !orig.effective_mac.is_empty() {
                self.nlink
                    .link_set_hardware_addr(dev.index, &parse_mac(&orig.effective_mac)?)?;
            }
            self.nlink.link_set_name(dev.index, &orig.host_if_name)?;
            self.nlink.link_set_ns_fd(dev.index, host_ns.fd())?;
            Ok(())
        })
    }

    /// Best-effort retrieval of a half-moved netdev: tries each candidate
    /// name inside the sandbox, renames back and returns it to the host.
    fn retrieve_vf(
        &self,
        candidates: &[&str],
        host_name: &str,
        netns: &NetNs,
    ) -> Result<(), Error> {
        let host_ns = NetNs::current()?;
        netns.run(|| {
            for name in candidates {
                let Ok(dev) = self.nlink.link_by_name(name) else {
                    continue;
                };
                self.nlink.link_set_down(dev.index)?;
                self.nlink.link_set_name(dev.index, host_name)?;
                self.nlink.link_set_ns_fd(dev.index, host_ns.fd())?;
                return Ok(());
            }
            // Nothing found inside the sandbox; the move never happened.
            Ok(())
        })
    }

    /// Binds the IPAM result inside the sandbox (addresses, then routes)
    /// and announces the new address/link bindings. Announcement failures
    /// are logged, never raised.
    pub fn configure_addresses(
        &self,
        ifname: &str,
        result: &CNIResult,
        netns: &NetNs,
    ) -> Result<(), Error> {
        netns.run(|| {
            let dev = self.nlink.link_by_name(ifname)?;
            for ip in &result.ips {
                let net: IpNetwork = ip.address.parse().map_err(|e| {
                    Error::Ipam(format!("invalid address {} from IPAM: {e}", ip.address))
                })?;
                self.nlink.addr_add(dev.index, &net)?;
            }
            for route in &result.routes {
                let dst: IpNetwork = route.dst.parse().map_err(|e| {
                    Error::Ipam(format!("invalid route {} from IPAM: {e}", route.dst))
                })?;
                let gw = match &route.gw {
                    Some(gw) => Some(gw.parse().map_err(|e| {
                        Error::Ipam(format!("invalid gateway {gw} from IPAM: {e}"))
                    })?),
                    // A route without a gateway uses the gateway of the
                    // matching-family address assignment.
                    None => result
                        .ips
                        .iter()
                        .filter_map(|ip| ip.gateway.as_ref())
                        .filter_map(|gw| gw.parse().ok())
                        .find(|gw: &std::net::IpAddr| gw.is_ipv4() == dst.ip().is_ipv4()),
                };
                self.nlink.route_add(dev.index, &dst, gw)?;
            }

            if let Some(hw_addr) = dev.hw_addr.as_deref() {
                if hw_addr.len() == 6 {
                    let mut mac = [0u8; 6];
                    mac.copy_from_slice(hw_addr);
                    announce_ips(ifname, &mac, &result.ips);
                }
            }
            Ok(())
        })
    }
}

/// ADD steps completed so far; drives the reverse-order unwind.
#[derive(Debug, Default)]
struct Progress {
    vf_configured: bool,
    vf_in_sandbox: bool,
    ipam_allocated: bool,
    cache_entry: Option<PathBuf>,
    pci_reserved: bool,
}

/// CNI ADD: configure the VF, hand it to the sandbox, bind addresses,
/// persist state, record ownership.
pub fn cmd_add(args: Args) -> Result<CNIResult, Error> {
    let sysfs = SysFs::default();
    let mut conf = config::load_conf(&args, &sysfs)?;
    config::init_logging(&conf);

    let ns_path = args
        .netns
        .clone()
        .ok_or_else(|| Error::InvalidEnvValue("CNI_NETNS must be set".to_string()))?;
    let netns = NetNs::open(&ns_path)?;

    let cni_dir = state_dir(Some(&conf));
    let manager = SriovManager::new();
    let cache = NetConfCache::new(&cni_dir);
    let allocator = PciAllocator::new(&cni_dir);

    manager.fill_original_vf_info(&mut conf)?;
    debug!(
        "attaching VF {} (vf {} of {:?}) to {}",
        conf.device_id,
        conf.vf_id.unwrap_or_default(),
        conf.master,
        ns_path.display()
    );

    let mut progress = Progress::default();
    match run_add(
        &manager,
        &cache,
        &allocator,
        &args,
        &conf,
        Some(&netns),
        &ns_path,
        &mut progress,
    ) {
        Ok(result) => Ok(result),
        Err(e) => {
            unwind_add(&progress, &manager, &cache, &allocator, &args, &conf, Some(&netns));
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_add(
    manager: &SriovManager,
    cache: &NetConfCache,
    allocator: &PciAllocator,
    args: &Args,
    conf: &NetConf,
    netns: Option<&NetNs>,
    ns_path: &Path,
    progress: &mut Progress,
) -> Result<CNIResult, Error> {
    manager.apply_vf_config(conf)?;
    progress.vf_configured = true;

    if !conf.dpdk_mode {
        let netns = netns.ok_or_else(|| {
            Error::Namespace("no namespace handle for a netdev-backed VF".to_string())
        })?;
        manager.setup_vf(conf, &args.ifname, netns)?;
        progress.vf_in_sandbox = true;
    }

    let mut result = CNIResult {
        interfaces: vec![Interface {
            name: args.ifname.clone(),
            mac: config::mac_for_result(conf),
            sandbox: Some(ns_path.display().to_string()),
        }],
        ..Default::default()
    };

    let has_ipam = conf
        .ipam
        .as_ref()
        .map(|ipam| !ipam.r#type.is_empty())
        .unwrap_or(false);
    if has_ipam {
        let ipam_result = ipam::exec_add(args, conf)?;
        progress.ipam_allocated = true;

        // All addresses apply to the container interface.
        result.ips = ipam_result.ips;
        for ip in &mut result.ips {
            ip.interface = Some(0);
        }
        result.routes = ipam_result.routes;
        result.dns = ipam_result.dns.or_else(|| conf.dns.clone());

        if !conf.dpdk_mode {
            if let Some(netns) = netns {
                manager.configure_addresses(&args.ifname, &result, netns)?;
            }
        }
    }

    progress.cache_entry = Some(cache.save(&args.container_id, &args.ifname, conf)?);
    allocator.reserve(&conf.device_id, ns_path)?;
    progress.pci_reserved = true;

    Ok(result)
}

/// Compensates completed ADD steps in reverse order. Failures are logged
/// and do not mask the original error.
fn unwind_add(
    progress: &Progress,
    manager: &SriovManager,
    cache: &NetConfCache,
    allocator: &PciAllocator,
    args: &Args,
    conf: &NetConf,
    netns: Option<&NetNs>,
) {
    if progress.pci_reserved {
        if let Err(e) = allocator.release(&conf.device_id) {
            warn!("rollback: failed to release {}: {e}", conf.device_id);
        }
    }
    if let Some(path) = &progress.cache_entry {
        if let Err(e) = cache.delete(path) {
            warn!("rollback: failed to drop cache entry {}: {e}", path.display());
        }
    }
    if progress.ipam_allocated {
        if let Err(e) = ipam::exec_del(args, conf) {
            warn!("rollback: IPAM DEL failed: {e}");
        }
    }
    if progress.vf_in_sandbox {
        match netns {
            Some(netns) => {
                if let Err(e) = manager.release_vf(conf, &args.ifname, netns) {
                    warn!("rollback: failed to retrieve VF {}: {e}", conf.device_id);
                }
            }
            None => warn!("rollback: no namespace handle to retrieve VF from"),
        }
    }
    if progress.vf_configured {
        if let Err(e) = manager.reset_vf_config(conf) {
            warn!("rollback: failed to reset VF {}: {e}", conf.device_id);
        }
    }
}

/// CNI DEL: undo a previous ADD from the cached configuration. A missing
/// cache entry means there is nothing to undo and reports success so the
/// runtime's retry loop terminates.
pub fn cmd_del(args: Args) -> Result<CNIResult, Error> {
    let cni_dir = state_dir(args.config.as_ref());
    let cache = NetConfCache::new(&cni_dir);

    let Some((mut conf, entry_path)) = cache.load(&args.container_id, &args.ifname)? else {
        return Ok(CNIResult::default());
    };
    config::init_logging(&conf);
    debug!("detaching VF {} from {}", conf.device_id, args.container_id);

    let has_ipam = conf
        .ipam
        .as_ref()
        .map(|ipam| !ipam.r#type.is_empty())
        .unwrap_or(false);
    if has_ipam {
        // Fatal on error: the cache entry stays so the runtime's retry can
        // finish the release.
        ipam::exec_del(&args, &conf)?;
    }

    let manager = SriovManager::new();
    let sysfs = SysFs::default();

    // Re-derive the VF index instead of trusting the cached value.
    let master = conf
        .master
        .clone()
        .ok_or_else(|| Error::InvalidNetworkConfig("cached entry lost the PF name".to_string()))?;
    conf.vf_id = Some(sysfs.vf_id(&conf.device_id, &master)?);

    // The PF-side reset must precede netdev retrieval: drivers may refuse
    // netdev operations on a VF whose trust bit is off.
    manager.reset_vf_config(&conf)?;

    if !conf.dpdk_mode {
        // An empty CNI_NETNS means the sandbox is already gone and there is
        // no netdev to pull back.
        if let Some(ns_path) = &args.netns {
            match NetNs::open(ns_path) {
                Ok(netns) => manager.release_vf(&conf, &args.ifname, &netns)?,
                // The namespace path vanished (e.g. the node rebooted); the
                // netdev came back to the host on its own.
                Err(Error::NotExist(details)) => {
                    debug!("skipping netdev retrieval: {details}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    let allocator = PciAllocator::new(&cni_dir);
    allocator.release(&conf.device_id)?;
    cache.delete(&entry_path)?;

    Ok(CNIResult::default())
}

/// CNI CHECK: no dynamic verification is implemented.
pub fn cmd_check(_args: Args) -> Result<CNIResult, Error> {
    Ok(CNIResult::default())
}

fn state_dir(conf: Option<&NetConf>) -> PathBuf {
    conf.and_then(|c| c.cni_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CNI_DIR))
}
