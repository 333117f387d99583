//! CIDR block parsing and host enumeration.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// CIDR validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidrError {
    #[error("empty CIDR block")]
    Empty,
    #[error("invalid network address '{0}'")]
    InvalidAddress(String),
    #[error("invalid prefix length '{0}'")]
    InvalidPrefix(String),
    #[error("prefix length /{prefix} exceeds the maximum of /{max}")]
    PrefixTooLong { prefix: u8, max: u8 },
}

/// An IPv4 or IPv6 network.
///
/// Host bits in the written address are masked off, so `192.168.1.7/24`
/// is the same block as `192.168.1.0/24`. A bare address is a single-host
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CidrBlock {
    V4 { network: Ipv4Addr, prefix: u8 },
    V6 { network: Ipv6Addr, prefix: u8 },
}

impl CidrBlock {
    /// Network address.
    pub fn network(&self) -> IpAddr {
        match self {
            CidrBlock::V4 { network, .. } => IpAddr::V4(*network),
            CidrBlock::V6 { network, .. } => IpAddr::V6(*network),
        }
    }

    /// Prefix length.
    pub fn prefix(&self) -> u8 {
        match self {
            CidrBlock::V4 { prefix, .. } | CidrBlock::V6 { prefix, .. } => *prefix,
        }
    }

    /// Number of usable host addresses.
    ///
    /// IPv4 blocks wider than /31 exclude the network and broadcast
    /// addresses; /31 and /32 keep every address. IPv6 has no broadcast, so
    /// only the subnet-router anycast (network) address is excluded, and
    /// only for prefixes up to /126.
    pub fn host_count(&self) -> u128 {
        match *self {
            CidrBlock::V4 { prefix, .. } => {
                let size = 1u128 << (32 - prefix as u32);
                if prefix < 31 { size - 2 } else { size }
            }
            CidrBlock::V6 { prefix, .. } => {
                let bits = 128 - prefix as u32;
                if bits == 128 {
                    u128::MAX
                } else {
                    let size = 1u128 << bits;
                    if prefix <= 126 { size - 1 } else { size }
                }
            }
        }
    }

    /// Iterate usable host addresses in ascending order.
    pub fn hosts(&self) -> Hosts {
        let (first, last) = match *self {
            CidrBlock::V4 { network, prefix } => {
                let base = u32::from(network) as u128;
                let size = 1u128 << (32 - prefix as u32);
                if prefix < 31 {
                    (base + 1, base + size - 2)
                } else {
                    (base, base + size - 1)
                }
            }
            CidrBlock::V6 { network, prefix } => {
                let base = u128::from(network);
                let host_mask = v6_host_mask(prefix);
                let skip = if prefix <= 126 { 1 } else { 0 };
                (base + skip, base | host_mask)
            }
        };

        Hosts {
            v6: matches!(self, CidrBlock::V6 { .. }),
            next: Some(first),
            last,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn v6_host_mask(prefix: u8) -> u128 {
    match prefix {
        0 => u128::MAX,
        128.. => 0,
        p => u128::MAX >> p as u32,
    }
}

impl FromStr for CidrBlock {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CidrError::Empty);
        }

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let ip: IpAddr = addr
            .parse()
            .map_err(|_| CidrError::InvalidAddress(addr.to_string()))?;

        let max = if ip.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            None => max,
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| CidrError::InvalidPrefix(p.to_string()))?,
        };
        if prefix > max {
            return Err(CidrError::PrefixTooLong { prefix, max });
        }

        Ok(match ip {
            IpAddr::V4(ip) => CidrBlock::V4 {
                network: Ipv4Addr::from(u32::from(ip) & v4_mask(prefix)),
                prefix,
            },
            IpAddr::V6(ip) => CidrBlock::V6 {
                network: Ipv6Addr::from(u128::from(ip) & !v6_host_mask(prefix)),
                prefix,
            },
        })
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix())
    }
}

/// Iterator over the usable hosts of a [`CidrBlock`].
#[derive(Debug, Clone)]
pub struct Hosts {
    v6: bool,
    next: Option<u128>,
    last: u128,
}

impl Iterator for Hosts {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = if current == self.last {
            None
        } else {
            Some(current + 1)
        };

        Some(if self.v6 {
            IpAddr::V6(Ipv6Addr::from(current))
        } else {
            IpAddr::V4(Ipv4Addr::from(current as u32))
        })
    }
}
