//! CNI specification types and SR-IOV configuration structures.
//!
//! This module contains the types defined by the [CNI specification](https://www.cni.dev/)
//! (arguments, results, IPAM/DNS blocks) together with the SR-IOV network
//! configuration this plugin consumes on stdin and persists between ADD and
//! DEL.
//!
//! # Main Types
//!
//! - [`Args`] - Input parameters for CNI operations (from environment and stdin)
//! - [`NetConf`] - SR-IOV network configuration passed to the plugin
//! - [`VfState`] - Snapshot of a VF's administrative state, kept for teardown
//! - [`CNIResult`] - Result returned by ADD/DEL/CHECK operations
//! - [`Interface`], [`IpConfig`], [`Route`] - Components of the CNI result

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(super) const CNI_COMMAND: &str = "CNI_COMMAND";
pub(super) const CNI_CONTAINERID: &str = "CNI_CONTAINERID";
pub(super) const CNI_NETNS: &str = "CNI_NETNS";
pub(super) const CNI_IFNAME: &str = "CNI_IFNAME";
pub(super) const CNI_ARGS: &str = "CNI_ARGS";
pub(super) const CNI_PATH: &str = "CNI_PATH";

/// Args is the input data for one CNI call.
///
/// All fields except for `config` are given as environment values.
/// `config` is decoded from the JSON document ([`NetConf`]) on stdin.
/// Depending on the type of command, some fields are omitted.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#parameters>.
#[derive(Debug, Default, Clone)]
pub struct Args {
    /// Container ID. A unique plaintext identifier for a container, allocated by the runtime.
    pub container_id: String,
    /// Path to the container's network namespace.
    /// May be absent on DEL when the sandbox is already gone.
    pub netns: Option<PathBuf>,
    /// Name of the interface to create inside the container.
    pub ifname: String,
    /// Extra arguments passed in by the user at invocation time.
    /// Alphanumeric key-value pairs separated by semicolons.
    pub args: Option<String>,
    /// List of paths to search for CNI plugin executables.
    pub path: Vec<PathBuf>,
    /// Please see [`NetConf`].
    pub config: Option<NetConf>,
}

/// `NetConf` is the network configuration given as JSON on stdin.
///
/// The envelope fields follow
/// <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#section-1-network-configuration-format>;
/// the rest describe the target VF and the administrative attributes to apply
/// to it through its PF. Unrecognized keys are preserved in `custom` so the
/// exact document can be re-serialized for the delegated IPAM plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    /// Semantic Version 2.0 of the CNI specification to which this configuration conforms.
    pub cni_version: String,
    /// Network name, unique across all network configurations on a host.
    pub name: String,
    /// Matches the name of the CNI plugin binary on disk.
    pub r#type: String,
    /// Name of the PF netdev that owns the target VF.
    /// Derived from `deviceID` through sysfs when not provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    /// PCI address of the VF, e.g. `0000:03:00.1`. The stable identity of the VF.
    #[serde(rename = "deviceID", default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    /// VF index within its PF. Derived from `deviceID` through sysfs when not
    /// provided; must agree with the derivation when both are present.
    #[serde(rename = "vf", default, skip_serializing_if = "Option::is_none")]
    pub vf_id: Option<u32>,
    /// Requested hardware address, normalized to lower case before use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// VLAN ID, 0-4094. 0 clears tagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u32>,
    /// VLAN priority, 0-7. Requires `vlan`.
    #[serde(rename = "vlanQoS", default, skip_serializing_if = "Option::is_none")]
    pub vlan_qos: Option<u32>,
    /// VLAN protocol, `802.1q` or `802.1ad`. Requires `vlan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_proto: Option<VlanProto>,
    /// Spoof checking on the VF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoofchk: Option<OnOff>,
    /// Trust setting on the VF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<OnOff>,
    /// Administrative link state of the VF.
    #[serde(rename = "link_state", default, skip_serializing_if = "Option::is_none")]
    pub link_state: Option<VfLinkState>,
    /// Minimum transmit rate in Mbps.
    #[serde(rename = "min_tx_rate", default, skip_serializing_if = "Option::is_none")]
    pub min_tx_rate: Option<u32>,
    /// Maximum transmit rate in Mbps.
    #[serde(rename = "max_tx_rate", default, skip_serializing_if = "Option::is_none")]
    pub max_tx_rate: Option<u32>,
    /// Directory holding the configuration cache and the PCI ownership
    /// registry. Defaults to `/var/lib/cni/sriov`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni_dir: Option<PathBuf>,
    /// Log verbosity: `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Log destination file. Defaults to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Dictionary with IPAM specific values. IPAM is skipped when absent or
    /// when its `type` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Ipam>,
    /// Dictionary with DNS specific values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
    /// Runtime configuration injected by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<RuntimeConf>,
    /// True when the VF is bound to a userspace driver and has no netdev.
    /// Derived from sysfs, never read from the input document, but persisted
    /// in the cache entry so DEL can skip the netdev steps.
    #[serde(default)]
    pub dpdk_mode: bool,
    /// Administrative state of the VF before this plugin touched it,
    /// captured on ADD and persisted for teardown.
    #[serde(rename = "orig_vf_state", default, skip_serializing_if = "Option::is_none")]
    pub orig_vf_state: Option<VfState>,
    #[serde(flatten)]
    pub custom: HashMap<String, Value>,
}

/// Runtime configuration passed through the `runtimeConfig` capability
/// channel. A MAC supplied here takes precedence over both the `MAC=` env
/// argument and the static `mac` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(flatten)]
    pub custom: HashMap<String, Value>,
}

/// A two-state administrative switch, `on` or `off`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    pub fn as_bool(self) -> bool {
        matches!(self, OnOff::On)
    }
}

impl From<bool> for OnOff {
    fn from(v: bool) -> Self {
        if v {
            OnOff::On
        } else {
            OnOff::Off
        }
    }
}

/// VLAN protocol for PF-administered VF tagging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VlanProto {
    #[serde(rename = "802.1q")]
    Dot1Q,
    #[serde(rename = "802.1ad")]
    Dot1Ad,
}

impl VlanProto {
    /// The EtherType value carried on the wire and in the VF VLAN attribute.
    pub fn ether_type(self) -> u16 {
        match self {
            VlanProto::Dot1Q => 0x8100,
            VlanProto::Dot1Ad => 0x88a8,
        }
    }

    pub fn from_ether_type(proto: u16) -> Option<Self> {
        match proto {
            0x8100 => Some(VlanProto::Dot1Q),
            0x88a8 => Some(VlanProto::Dot1Ad),
            _ => None,
        }
    }
}

/// Administrative link state of a VF as exposed by the PF.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VfLinkState {
    Auto,
    Enable,
    Disable,
}

impl VfLinkState {
    /// Kernel encoding of the state (`IFLA_VF_LINK_STATE_*`).
    pub fn as_u32(self) -> u32 {
        match self {
            VfLinkState::Auto => 0,
            VfLinkState::Enable => 1,
            VfLinkState::Disable => 2,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(VfLinkState::Auto),
            1 => Some(VfLinkState::Enable),
            2 => Some(VfLinkState::Disable),
            _ => None,
        }
    }
}

/// Administrative state of a VF, read from the PF's VF table (plus the host
/// netdev name from sysfs) before any mutation. This is the restore target
/// for every teardown path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VfState {
    /// Netdev name of the VF on the host before the move. Empty in DPDK mode.
    #[serde(rename = "hostIFName", default)]
    pub host_if_name: String,
    /// MAC administered through the PF. All-zero when unset.
    #[serde(rename = "adminMAC", default)]
    pub admin_mac: String,
    /// The address teardown restores: the administered MAC when set,
    /// otherwise the netdev's own hardware address.
    #[serde(rename = "effectiveMAC", default)]
    pub effective_mac: String,
    pub vlan: u32,
    #[serde(rename = "vlanQoS")]
    pub vlan_qos: u32,
    /// VLAN EtherType (0x8100 or 0x88a8).
    pub vlan_proto: u16,
    pub spoof_chk: bool,
    pub trust: bool,
    /// Kernel encoding, see [`VfLinkState`].
    pub link_state: u32,
    pub min_tx_rate: u32,
    pub max_tx_rate: u32,
}

/// Dictionary with IPAM (IP Address Management) specific values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ipam {
    /// Refers to the filename of the IPAM plugin executable.
    pub r#type: String,
    #[serde(flatten)]
    pub custom: HashMap<String, Value>,
}

/// DNS configuration information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dns {
    /// Priority-ordered list of DNS nameservers that this network is aware of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// The local domain used for short hostname lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Priority-ordered search domains for short hostname lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
    /// Options that can be passed to the resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Route created by plugins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    /// The destination of the route, in CIDR notation.
    pub dst: String,
    /// The next hop address.
    /// If unset, a value in `gateway` in the `ips` array may be used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

/// `CNIResult` represents the Success result type.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#success>.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CNIResult {
    /// In case of delegated plugins (IPAM), interfaces may be omitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

/// `CNIResultWithCNIVersion` is the actual output document of a successful
/// CNI call: the result plus the negotiated `cniVersion`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CNIResultWithCNIVersion {
    pub cni_version: String,
    #[serde(flatten)]
    inner: CNIResult,
}

impl CNIResultWithCNIVersion {
    pub fn new(cni_version: &str, inner: CNIResult) -> Self {
        CNIResultWithCNIVersion {
            cni_version: cni_version.to_string(),
            inner,
        }
    }
}

/// The interface created by the attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// The name of the interface.
    pub name: String,
    /// The hardware address of the interface.
    pub mac: String,
    /// The isolation domain reference (path to network namespace) for the
    /// interface, or empty if on the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// IP assigned by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfig {
    /// Index into the `interfaces` list indicating which interface this IP
    /// configuration should be applied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<u32>,
    /// An IP address in CIDR notation.
    pub address: String,
    /// The default gateway for this subnet, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// `ErrorResult` is converted from Error.
/// This is the actual data structure of the Error CNI Result Type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorResult {
    /// The same value as provided by the configuration.
    pub(crate) cni_version: String,
    /// A numeric error code.
    pub(crate) code: u32,
    /// A short message characterizing the error.
    pub(crate) msg: String,
    /// A longer message describing the error.
    pub(crate) details: String,
}
