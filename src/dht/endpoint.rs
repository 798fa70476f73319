use super::error::DhtError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const PACKED_V4_LEN: usize = 6;
pub const PACKED_V6_LEN: usize = 18;

/// An IP address and port.
///
/// Equality is equality of the packed form, so IPv6 flow labels and scope
/// ids are stripped on construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    /// Parses the 6 byte (IPv4) or 18 byte (IPv6) packed form: address bytes
    /// followed by the port in network order.
    pub fn from_packed(data: &[u8]) -> Result<Self, DhtError> {
        match data.len() {
            PACKED_V4_LEN => {
                let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
                let port = u16::from_be_bytes([data[4], data[5]]);
                Ok(Self::new(IpAddr::V4(ip), port))
            }
            PACKED_V6_LEN => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[..16]);
                let port = u16::from_be_bytes([data[16], data[17]]);
                Ok(Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            n => Err(DhtError::InvalidEndpoint(n)),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Packed address bytes without the port.
    pub fn packed_host(&self) -> Vec<u8> {
        match self.0.ip() {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    pub fn to_packed(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKED_V6_LEN);
        buf.put_slice(&self.packed_host());
        buf.put_u16(self.0.port());
        buf.freeze()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
