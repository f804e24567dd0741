//! Network-level types that sit below individual messages: magic values,
//! addresses and inventory vectors (§4.1, §6).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, NetworkResult};

pub const MAINNET_MAGIC: [u8; 4] = [0xbf, 0x0c, 0x6b, 0xbd];
pub const TESTNET_MAGIC: [u8; 4] = [0xce, 0xe2, 0xca, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn magic(self) -> [u8; 4] {
        match self {
            Network::Mainnet => MAINNET_MAGIC,
            Network::Testnet => TESTNET_MAGIC,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 9937,
            Network::Testnet => 19937,
        }
    }
}

/// A network address as carried inside `version`/`addr` messages: services
/// bitfield plus a 16-byte (IPv4-mapped) IPv6 address and a port in network
/// byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub services: u64,
    pub addr: SocketAddr,
}

impl NetworkAddress {
    pub fn new(services: u64, addr: SocketAddr) -> Self {
        Self { services, addr }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&ipv6_mapped_bytes(self.addr.ip()));
        out.extend_from_slice(&self.addr.port().to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> NetworkResult<(Self, usize)> {
        let services_bytes = buf.get(0..8).ok_or(NetworkError::UnexpectedEof)?;
        let services = u64::from_le_bytes(services_bytes.try_into().unwrap());
        let ip_bytes: [u8; 16] = buf
            .get(8..24)
            .ok_or(NetworkError::UnexpectedEof)?
            .try_into()
            .unwrap();
        let port_bytes = buf.get(24..26).ok_or(NetworkError::UnexpectedEof)?;
        let port = u16::from_be_bytes(port_bytes.try_into().unwrap());
        let ip = unmap_ipv6(Ipv6Addr::from(ip_bytes));
        Ok((Self::new(services, SocketAddr::new(ip, port)), 26))
    }

    pub const ENCODED_LEN: usize = 26;
}

fn ipv6_mapped_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn unmap_ipv6(ip: Ipv6Addr) -> IpAddr {
    if let Some(v4) = ip.to_ipv4_mapped() {
        IpAddr::V4(v4)
    } else {
        IpAddr::V6(ip)
    }
}

impl Default for NetworkAddress {
    fn default() -> Self {
        Self::new(0, SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryType {
    Tx = 1,
    Block = 2,
    FilteredBlock = 3,
    CompactBlock = 4,
    InstantSendLock = 5,
}

impl TryFrom<u32> for InventoryType {
    type Error = NetworkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(InventoryType::Tx),
            2 => Ok(InventoryType::Block),
            3 => Ok(InventoryType::FilteredBlock),
            4 => Ok(InventoryType::CompactBlock),
            5 => Ok(InventoryType::InstantSendLock),
            other => Err(NetworkError::Protocol(format!("unknown inventory type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub inv_type: InventoryType,
    pub hash: [u8; 32],
}

impl Inventory {
    pub const ENCODED_LEN: usize = 36;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.inv_type as u32).to_le_bytes());
        out.extend_from_slice(&self.hash);
    }

    pub fn decode(buf: &[u8]) -> NetworkResult<(Self, usize)> {
        let type_bytes = buf.get(0..4).ok_or(NetworkError::UnexpectedEof)?;
        let inv_type = InventoryType::try_from(u32::from_le_bytes(type_bytes.try_into().unwrap()))?;
        let hash: [u8; 32] = buf
            .get(4..36)
            .ok_or(NetworkError::UnexpectedEof)?
            .try_into()
            .unwrap();
        Ok((Self { inv_type, hash }, 36))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_address_round_trips_ipv4() {
        let addr = NetworkAddress::new(1, "203.0.113.7:9937".parse().unwrap());
        let mut buf = Vec::new();
        addr.encode(&mut buf);
        let (decoded, consumed) = NetworkAddress::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(consumed, NetworkAddress::ENCODED_LEN);
    }

    #[test]
    fn inventory_round_trips() {
        let inv = Inventory {
            inv_type: InventoryType::Tx,
            hash: [9u8; 32],
        };
        let mut buf = Vec::new();
        inv.encode(&mut buf);
        let (decoded, consumed) = Inventory::decode(&buf).unwrap();
        assert_eq!(decoded, inv);
        assert_eq!(consumed, Inventory::ENCODED_LEN);
    }
}
