//! CNI process plumbing: command selection, argument decoding, result and
//! error emission.
//!
//! The plugin binary is short-lived: one invocation handles exactly one CNI
//! command and exits. Everything runs on the invoking OS thread and no
//! threads are spawned, so `setns(2)` affinity (a per-thread kernel state)
//! holds for the whole invocation by construction.

use std::{
    io::{Read, Write},
    path::PathBuf,
    str::FromStr,
};

use crate::{
    types::{Args, CNI_ARGS, CNI_COMMAND, CNI_CONTAINERID, CNI_IFNAME, CNI_NETNS, CNI_PATH},
    util::{get_env, IoTarget},
};

use super::{
    error::Error,
    types::{CNIResult, CNIResultWithCNIVersion, ErrorResult, NetConf},
    version::PluginInfo,
};

enum Cmd {
    Add { f: CmdFn, args: Args },
    Del { f: CmdFn, args: Args },
    Check { f: CmdFn, args: Args },
    Version(PluginInfo),
    // If CNI_COMMAND is not specified, Nop will run.
    About(PluginInfo, String),
}

impl Cmd {
    fn run(&self) -> Result<String, Error> {
        match self {
            Cmd::Add { f, args } | Cmd::Del { f, args } | Cmd::Check { f, args } => {
                let cni_version = args
                    .config
                    .as_ref()
                    .map(|c| c.cni_version.clone())
                    .unwrap_or_default();
                match f(args.clone()) {
                    Ok(res) => {
                        let out = CNIResultWithCNIVersion::new(&cni_version, res);
                        serde_json::to_string(&out)
                            .map_err(|e| Error::FailedToDecode(format!("{e}: {:?}", args.config)))
                    }
                    Err(e) => Err(e),
                }
            }
            Cmd::Version(info) => {
                let out = info.version()?;
                Ok(out)
            }
            Cmd::About(info, about) => {
                let out = info.about(about)?;
                Ok(out)
            }
        }
    }
}

/// CmdFn is the function type of callback functions for CNI Add, Del and Check commands.
/// It accepts [Args] and returns [CNIResult] or [Error].
pub type CmdFn = fn(args: Args) -> Result<CNIResult, Error>;

/// Plugin is the dispatcher for one CNI invocation.
/// It decodes the environment and stdin, routes to the Add, Del or Check
/// callback, and writes either the success result or the CNI error document
/// to stdout.
pub struct Plugin {
    /// Callback function for Add command.
    add: CmdFn,
    /// Callback function for Del command.
    del: CmdFn,
    /// Callback function for Check command.
    check: CmdFn,
    /// CNI version information this plugin supports.
    /// See [PluginInfo].
    version_info: PluginInfo,
    /// The message of this plugin.
    about: String,
    io: IoTarget,
}

impl Plugin {
    /// new() creates a Plugin instance.
    pub fn new(
        add: CmdFn,
        del: CmdFn,
        check: CmdFn,
        version_info: PluginInfo,
        about: &str,
    ) -> Plugin {
        Plugin {
            add,
            del,
            check,
            version_info,
            about: about.to_string(),
            io: IoTarget::default(),
        }
    }

    /// Plugin::run() processes given parameters and runs given callback
    /// functions depending on called command types.
    pub fn run(&mut self) -> Result<(), Error> {
        match self.inner_run(get_env) {
            Ok(res) => {
                self.io
                    .stdout
                    .write(res.as_bytes())
                    .map_err(|e| Error::IOFailure(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                let res = self.error_result(&e);
                let data =
                    serde_json::to_vec(&res).map_err(|e| Error::FailedToDecode(e.to_string()))?;
                self.io
                    .stdout
                    .write(&data)
                    .map_err(|e| Error::FailedToDecode(e.to_string()))?;
                Err(e)
            }
        }
    }

    fn inner_run<'a>(
        &mut self,
        get_env: impl Fn(&'a str) -> Result<String, Error>,
    ) -> Result<String, Error> {
        let cmd = self.get_cmd(get_env)?;
        cmd.run()
    }

    fn read_config(&mut self) -> Result<NetConf, Error> {
        let mut buf = String::new();
        self.io
            .stdin
            .read_to_string(&mut buf)
            .map_err(|e| Error::IOFailure(e.to_string()))?;

        self.version_info.validate(&buf)?;

        serde_json::from_str(&buf).map_err(|e| Error::FailedToDecode(e.to_string()))
    }

    fn get_cmd<'a>(
        &mut self,
        get_env: impl Fn(&'a str) -> Result<String, Error>,
    ) -> Result<Cmd, Error> {
        let cmd_str = get_env(CNI_COMMAND).unwrap_or_default();
        match cmd_str.as_str() {
            "ADD" => {
                let container_id = get_env(CNI_CONTAINERID)?;
                let ifname = get_env(CNI_IFNAME)?;
                let netns = PathBuf::from_str(&get_env(CNI_NETNS)?)
                    .map_err(|e| Error::InvalidEnvValue(e.to_string()))?;
                let path = plugin_paths(&get_env);
                let args = get_env(CNI_ARGS).ok();

                let config = self.read_config()?;

                Ok(Cmd::Add {
                    f: self.add,
                    args: Args {
                        container_id,
                        netns: Some(netns),
                        ifname,
                        args,
                        path,
                        config: Some(config),
                    },
                })
            }
            "DEL" => {
                let container_id = get_env(CNI_CONTAINERID)?;
                let ifname = get_env(CNI_IFNAME)?;
                // The runtime hands an empty CNI_NETNS to signal that the
                // sandbox is already gone.
                let netns = get_env(CNI_NETNS)
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from);
                let path = plugin_paths(&get_env);
                let args = get_env(CNI_ARGS).ok();

                let config = self.read_config()?;

                Ok(Cmd::Del {
                    f: self.del,
                    args: Args {
                        container_id,
                        netns,
                        ifname,
                        args,
                        path,
                        config: Some(config),
                    },
                })
            }
            "CHECK" => {
                let container_id = get_env(CNI_CONTAINERID)?;
                let ifname = get_env(CNI_IFNAME)?;
                let netns = PathBuf::from_str(&get_env(CNI_NETNS)?)
                    .map_err(|e| Error::InvalidEnvValue(e.to_string()))?;
                let path = plugin_paths(&get_env);
                let args = get_env(CNI_ARGS).ok();

                let config = self.read_config()?;

                Ok(Cmd::Check {
                    f: self.check,
                    args: Args {
                        container_id,
                        netns: Some(netns),
                        ifname,
                        args,
                        path,
                        config: Some(config),
                    },
                })
            }
            "VERSION" => Ok(Cmd::Version(self.version_info.clone())),
            _ => Ok(Cmd::About(self.version_info.clone(), self.about.clone())),
        }
    }

    fn error_result(&self, err: &Error) -> ErrorResult {
        ErrorResult {
            cni_version: self.version_info.cni_version.clone(),
            code: err.into(),
            msg: err.to_string(),
            details: err.details(),
        }
    }
}

fn plugin_paths<'a>(get_env: &impl Fn(&'a str) -> Result<String, Error>) -> Vec<PathBuf> {
    get_env(CNI_PATH)
        .map(|paths| paths.split(':').map(PathBuf::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use crate::{
        error::Error,
        types::{CNIResult, Interface},
    };

    use super::Args;
    use super::*;

    const ADD_SUCCESS_RESULT: &str = r#"{"cniVersion":"1.1.0","interfaces":[{"name":"net1","mac":"aa:bb:cc:dd:ee:01","sandbox":"/var/run/netns/pod1"}]}"#;
    const DEL_SUCCESS_RESULT: &str = r#"{"cniVersion":"1.1.0"}"#;

    const SRIOV_CONF: &str = r#"{ "cniVersion": "1.1.0", "name": "sriov-net", "type": "sriov", "master": "ens1f0", "deviceID": "0000:03:00.1", "vf": 1 }"#;
    const SRIOV_CONF_OLD_VERSION: &str = r#"{ "cniVersion": "0.1.0", "name": "sriov-net", "type": "sriov", "deviceID": "0000:03:00.1" }"#;

    fn dummy_add_success(args: Args) -> Result<CNIResult, Error> {
        Ok(CNIResult {
            interfaces: vec![Interface {
                name: args.ifname,
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                sandbox: args.netns.map(|p| p.display().to_string()),
            }],
            ips: vec![],
            routes: vec![],
            dns: None,
        })
    }

    fn dummy_del_success(_args: Args) -> Result<CNIResult, Error> {
        Ok(CNIResult::default())
    }

    fn dummy_check_success(_args: Args) -> Result<CNIResult, Error> {
        Ok(CNIResult::default())
    }

    #[rstest(
        env_values,
        stdin_data,
        expected_out,
        expected_err,
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "VERSION".to_string())
            ]),
            "{}",
            r#"{"cniVersion":"1.1.0","supportedVersions":["0.3.1","0.4.0","1.0.0","1.1.0"]}"#,
            None,
        ),
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "ADD".to_string()),
                (CNI_CONTAINERID.to_string(), "pod1-container".to_string()),
                (CNI_NETNS.to_string(), "/var/run/netns/pod1".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
                (CNI_PATH.to_string(), "/opt/cni/bin".to_string()),
            ]),
            SRIOV_CONF,
            ADD_SUCCESS_RESULT,
            None,
        ),
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "ADD".to_string()),
                (CNI_CONTAINERID.to_string(), "pod1-container".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
                (CNI_PATH.to_string(), "/opt/cni/bin".to_string()),
            ]),
            SRIOV_CONF,
            "",
            Some(Error::InvalidEnvValue("CNI_NETNS must be set".to_string())),
        ),
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "ADD".to_string()),
                (CNI_CONTAINERID.to_string(), "pod1-container".to_string()),
                (CNI_NETNS.to_string(), "/var/run/netns/pod1".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
                (CNI_PATH.to_string(), "/opt/cni/bin".to_string()),
            ]),
            SRIOV_CONF_OLD_VERSION,
            "",
            Some(Error::IncompatibleVersion("0.1.0 is not supported".to_string())),
        ),
        case(
            // DEL without CNI_NETNS: the sandbox is gone, the call must still
            // be dispatched.
            HashMap::from([
                (CNI_COMMAND.to_string(), "DEL".to_string()),
                (CNI_CONTAINERID.to_string(), "pod1-container".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
            ]),
            SRIOV_CONF,
            DEL_SUCCESS_RESULT,
            None,
        ),
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "DEL".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
            ]),
            SRIOV_CONF,
            "",
            Some(Error::InvalidEnvValue("CNI_CONTAINERID must be set".to_string())),
        ),
        case(
            HashMap::from([
                (CNI_COMMAND.to_string(), "CHECK".to_string()),
                (CNI_CONTAINERID.to_string(), "pod1-container".to_string()),
                (CNI_NETNS.to_string(), "/var/run/netns/pod1".to_string()),
                (CNI_IFNAME.to_string(), "net1".to_string()),
            ]),
            SRIOV_CONF,
            DEL_SUCCESS_RESULT,
            None,
        ),
    )]
    fn plugin_dispatcher_run<'a>(
        env_values: HashMap<String, String>,
        stdin_data: &'static str,
        expected_out: &str,
        expected_err: Option<Error>,
    ) {
        let dummy_get_env = |name: &'a str| -> Result<String, Error> {
            env_values
                .get(name)
                .map(|v| v.to_string())
                .ok_or(Error::InvalidEnvValue("dummy".to_string()))
        };

        let stdin_data = stdin_data.as_bytes();

        let dummy_in = Box::new(stdin_data);
        let stdout = Box::new(std::io::stdout());
        let stderr = Box::new(std::io::stderr());

        let mut dispatcher = Plugin {
            add: dummy_add_success,
            del: dummy_del_success,
            check: dummy_check_success,
            version_info: PluginInfo::default(),
            about: "".to_string(),
            io: IoTarget {
                stdin: dummy_in,
                stdout,
                stderr,
            },
        };
        let result = dispatcher.inner_run(dummy_get_env);

        match result {
            Ok(success) => {
                if expected_out.starts_with('{') {
                    assert_json_diff::assert_json_eq!(
                        serde_json::from_str::<serde_json::Value>(expected_out).unwrap(),
                        serde_json::from_str::<serde_json::Value>(&success).unwrap()
                    );
                } else {
                    assert_eq!(expected_out, success);
                }
            }
            Err(e) => {
                assert_eq!(u32::from(&expected_err.unwrap()), u32::from(&e));
            }
        }
    }
}
