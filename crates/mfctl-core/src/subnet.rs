//! CIDR subnet value used by measurement networks and routes.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::TopologyError;

/// An address range in CIDR notation, e.g. `10.132.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: IpAddr,
    prefix_len: u8,
}

impl Subnet {
    /// Build a subnet, rejecting prefix lengths wider than the address family.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, TopologyError> {
        let max = max_prefix_len(&network);
        if prefix_len > max {
            return Err(TopologyError::InvalidSubnet {
                input: format!("{network}/{prefix_len}"),
                reason: format!("prefix length exceeds {max}"),
            });
        }
        Ok(Self { network, prefix_len })
    }

    /// Network address.
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for Subnet {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TopologyError::InvalidSubnet {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| invalid("missing '/<prefix>'"))?;
        let network: IpAddr = addr.parse().map_err(|_| invalid("invalid network address"))?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid("invalid prefix length"))?;
        Subnet::new(network, prefix_len).map_err(|_| invalid("prefix length exceeds address width"))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl TryFrom<String> for Subnet {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(value: Subnet) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_ipv4_subnet() {
        let subnet: Subnet = "10.132.1.0/24".parse().unwrap();
        assert_eq!(subnet.network(), "10.132.1.0".parse::<IpAddr>().unwrap());
        assert_eq!(subnet.prefix_len(), 24);
        assert_eq!(subnet.to_string(), "10.132.1.0/24");
    }

    #[test]
    fn test_parse_ipv6_subnet() {
        let subnet: Subnet = "2001:db8::/64".parse().unwrap();
        assert_eq!(subnet.prefix_len(), 64);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("10.0.0.0".parse::<Subnet>().is_err());
        assert!("10.0.0/24".parse::<Subnet>().is_err());
        assert!("10.0.0.0/33".parse::<Subnet>().is_err());
        assert!("10.0.0.0/abc".parse::<Subnet>().is_err());
    }

    #[test]
    fn test_serde_uses_cidr_string() {
        let subnet: Subnet = "192.168.5.0/24".parse().unwrap();
        let json = serde_json::to_string(&subnet).unwrap();
        assert_eq!(json, "\"192.168.5.0/24\"");
        let back: Subnet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, subnet);
    }

    proptest! {
        #[test]
        fn prop_ipv4_prefix_bound(a in any::<u8>(), b in any::<u8>(), prefix in 0u8..=255) {
            let input = format!("10.{a}.{b}.0/{prefix}");
            let parsed = input.parse::<Subnet>();
            prop_assert_eq!(parsed.is_ok(), prefix <= 32);
        }
    }
}
