//! SR-IOV CNI plugin: attaches a pre-provisioned SR-IOV Virtual Function to
//! a container network namespace.
//!
//! On ADD the plugin snapshots the VF's administrative state from its
//! Physical Function, applies the requested configuration (MAC, VLAN, QoS,
//! spoof checking, trust, link state, rate limits), moves the VF netdev into
//! the target namespace under the requested name, optionally delegates
//! address management to a chained IPAM plugin, announces the new binding
//! with gratuitous ARP / unsolicited neighbor advertisements, and records
//! enough state on disk for DEL to undo all of it. Any failure rolls the
//! host back to the exact pre-ADD state.
//!
//! A VF bound to a userspace driver (DPDK mode) has no netdev; for such
//! devices only the PF-administered attributes and the on-disk records are
//! managed.
//!
//! The crate is a library plus a thin `sriov` binary; the split keeps the
//! state machine and its on-disk components testable without a CNI runtime.

pub mod allocator;
pub mod announce;
pub mod cache;
pub mod config;
pub mod error;
pub mod ipam;
pub mod netlink;
pub mod netns;
pub mod skel;
pub mod sriov;
pub mod sysfs;
pub mod types;
mod util;
pub(crate) mod version;

pub use version::PluginInfo;
