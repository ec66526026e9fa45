use thiserror::Error;

/// Error represents the CNI error result structure.
/// The string value each variant carries becomes the `details` field of the
/// CNI error document.
/// Please see <https://github.com/containernetworking/cni/blob/v1.1.0/SPEC.md#Error>.
///
/// Codes 0-99 are reserved by the CNI specification; the SR-IOV specific
/// failures use the 100+ range.
#[derive(Debug, Error)]
pub enum Error {
    /// Incompatible CNI version
    IncompatibleVersion(String),
    /// Unsupported field in network configuration.
    /// This error message must contain the key and value of the unsupported field.
    UnsupportedNetworkConfiguration(String),
    /// Container unknown or does not exist.
    /// This error implies the runtime does not need to perform any container network cleanup.
    NotExist(String),
    /// Invalid necessary environment variables, like CNI_COMMAND, CNI_CONTAINERID, etc.
    /// The error message must contain the names of invalid variables.
    InvalidEnvValue(String),
    /// I/O failure.
    /// For example, failed to read network configuration bytes from stdin.
    IOFailure(String),
    /// Failed to decode content.
    /// For example, failed to unmarshal network configurations from bytes.
    FailedToDecode(String),
    /// Invalid network configurations.
    /// If some validations on network configurations do not pass, this error will be raised.
    InvalidNetworkConfig(String),
    /// Try again later.
    /// If the plugin detects some transient condition that should clear up,
    /// it can use this code to notify the runtime it should re-try the operation later.
    TryAgainLater(String),
    /// Could not resolve the VF identity through sysfs
    /// (vf index, PF name, netdev name or bound driver).
    Sysfs(String),
    /// A link or VF operation on the RTNL socket failed.
    /// The message preserves the kernel-level cause.
    Netlink(String),
    /// Failed to open or enter a network namespace.
    Namespace(String),
    /// The delegated IPAM plugin could not be executed or returned an error.
    Ipam(String),
    /// Failed to persist or read back the configuration cache.
    Cache(String),
    /// The VF is already attached to another sandbox.
    /// The details name the owning namespace path.
    AllocatorConflict(String),
}

impl Error {
    /// Outputs details
    pub fn details(&self) -> String {
        match self {
            Error::IncompatibleVersion(details)
            | Error::UnsupportedNetworkConfiguration(details)
            | Error::NotExist(details)
            | Error::InvalidEnvValue(details)
            | Error::IOFailure(details)
            | Error::FailedToDecode(details)
            | Error::InvalidNetworkConfig(details)
            | Error::TryAgainLater(details)
            | Error::Sysfs(details)
            | Error::Netlink(details)
            | Error::Namespace(details)
            | Error::Ipam(details)
            | Error::Cache(details)
            | Error::AllocatorConflict(details) => details.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IncompatibleVersion(_) => write!(f, "Incompatible CNI version"),
            Error::UnsupportedNetworkConfiguration(_) => {
                write!(f, "Unsupported network configuration")
            }
            Error::NotExist(_) => write!(f, "Container does not exist"),
            Error::InvalidEnvValue(_) => {
                write!(f, "Invalid necessary environment variables")
            }
            Error::IOFailure(_) => write!(f, "I/O failure"),
            Error::FailedToDecode(_) => write!(f, "Failed to decode content"),
            Error::InvalidNetworkConfig(_) => write!(f, "Invalid network config"),
            Error::TryAgainLater(_) => write!(f, "Try again later"),
            Error::Sysfs(_) => write!(f, "Failed to resolve the VF through sysfs"),
            Error::Netlink(_) => write!(f, "Netlink operation failed"),
            Error::Namespace(_) => write!(f, "Network namespace operation failed"),
            Error::Ipam(_) => write!(f, "IPAM plugin failed"),
            Error::Cache(_) => write!(f, "Configuration cache operation failed"),
            Error::AllocatorConflict(_) => {
                write!(f, "VF is already allocated to another sandbox")
            }
        }
    }
}

impl From<&Error> for u32 {
    fn from(value: &Error) -> Self {
        match value {
            Error::IncompatibleVersion(_) => 1,
            Error::UnsupportedNetworkConfiguration(_) => 2,
            Error::NotExist(_) => 3,
            Error::InvalidEnvValue(_) => 4,
            Error::IOFailure(_) => 5,
            Error::FailedToDecode(_) => 6,
            Error::InvalidNetworkConfig(_) => 7,
            Error::TryAgainLater(_) => 11,
            Error::Sysfs(_) => 100,
            Error::Netlink(_) => 101,
            Error::Namespace(_) => 102,
            Error::Ipam(_) => 103,
            Error::Cache(_) => 104,
            Error::AllocatorConflict(_) => 105,
        }
    }
}
