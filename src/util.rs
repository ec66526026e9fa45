use std::{io::Read, io::Write, str::FromStr};

use crate::error::Error;

pub(super) struct IoTarget {
    pub(super) stdin: Box<dyn Read>,
    pub(super) stdout: Box<dyn Write>,
    pub(super) stderr: Box<dyn Write>,
}

impl Default for IoTarget {
    fn default() -> Self {
        IoTarget {
            stdin: Box::new(std::io::stdin()),
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
        }
    }
}

/// This function returns the environment value.
/// If the value doesn't exist or is invalid, this returns [Error::InvalidEnvValue].
pub fn get_env<T>(name: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::error::Error + 'static,
{
    std::env::var(name)
        .map_err(|e| Error::InvalidEnvValue(e.to_string()))
        .and_then(|v| {
            v.parse()
                .map_err(|e: T::Err| Error::InvalidEnvValue(e.to_string()))
        })
}

/// Parses a colon-separated hardware address like `aa:bb:cc:dd:ee:01`.
pub fn parse_mac(s: &str) -> Result<[u8; 6], Error> {
    let octets: Vec<&str> = s.split(':').collect();
    if octets.len() != 6 {
        return Err(Error::InvalidNetworkConfig(format!(
            "invalid MAC address: {s}"
        )));
    }
    let mut mac = [0u8; 6];
    for (i, octet) in octets.iter().enumerate() {
        mac[i] = u8::from_str_radix(octet, 16)
            .map_err(|_| Error::InvalidNetworkConfig(format!("invalid MAC address: {s}")))?;
    }
    Ok(mac)
}

/// Formats a hardware address in the canonical lower-case colon-separated form.
pub fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// An all-zero hardware address means "not administered" in the PF's VF table.
pub fn is_zero_mac(mac: &[u8]) -> bool {
    mac.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{format_mac, is_zero_mac, parse_mac};

    #[rstest]
    #[case("aa:bb:cc:dd:ee:01", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01])]
    #[case("AA:BB:CC:DD:EE:FF", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])]
    #[case("00:00:00:00:00:00", [0; 6])]
    fn test_parse_mac(#[case] input: &str, #[case] expected: [u8; 6]) {
        assert_eq!(parse_mac(input).unwrap(), expected);
    }

    #[rstest]
    #[case("aa:bb:cc:dd:ee")]
    #[case("aa:bb:cc:dd:ee:ff:00")]
    #[case("aa:bb:cc:dd:ee:zz")]
    #[case("")]
    fn test_parse_mac_invalid(#[case] input: &str) {
        assert!(parse_mac(input).is_err());
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            "aa:bb:cc:dd:ee:01"
        );
    }

    #[test]
    fn test_is_zero_mac() {
        assert!(is_zero_mac(&[0; 6]));
        assert!(!is_zero_mac(&[0, 0, 0, 0, 0, 1]));
    }
}
