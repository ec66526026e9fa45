use std::process;

use sriov_cni::{
    skel::Plugin,
    sriov::{cmd_add, cmd_check, cmd_del},
    PluginInfo,
};

const ABOUT_MSG: &str = "SR-IOV CNI plugin attaches SR-IOV Virtual Functions to containers";

fn main() {
    let mut plugin = Plugin::new(cmd_add, cmd_del, cmd_check, PluginInfo::default(), ABOUT_MSG);
    if plugin.run().is_err() {
        // The CNI error document is already on stdout.
        process::exit(1);
    }
}
