//! Port mapping for servers behind a NAT gateway.
//!
//! The wrangler only needs something that turns a local bind address into a
//! publicly reachable one, expressed by the [`PortMapper`] trait. [`NatPmp`]
//! implements it with the NAT-PMP protocol (RFC 6886) over UDP. The module
//! is named after the wrangler's `use_upnp` switch; UPnP IGD gateways are
//! served by supplying another [`PortMapper`] implementation.
//!
//! ```no_run
//! use rdht::upnp::{NatPmp, PortMapper};
//! use std::net::Ipv4Addr;
//!
//! # async fn example() -> Result<(), rdht::upnp::MappingError> {
//! let mapper = NatPmp::new(Ipv4Addr::new(192, 168, 1, 1));
//! let mapping = mapper.map_udp("192.168.1.20:6881".parse().unwrap()).await?;
//! println!("reachable at {}", mapping.external);
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{NATPMP_LIFETIME, NATPMP_PORT, NATPMP_REQUEST_TIMEOUT};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("gateway refused mapping: result code {0}")]
    Refused(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("only IPv4 addresses can be mapped")]
    Unsupported,
}

/// An external address the gateway forwards to `internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub external: SocketAddr,
    pub internal: SocketAddr,
}

#[async_trait]
pub trait PortMapper: Send + Sync {
    /// Asks the gateway to forward UDP traffic to `internal`.
    async fn map_udp(&self, internal: SocketAddr) -> Result<PortMapping, MappingError>;
}

const OP_EXTERNAL_ADDRESS: u8 = 0;
const OP_MAP_UDP: u8 = 1;
const RESPONSE_FLAG: u8 = 128;

/// NAT-PMP client for a known gateway.
#[derive(Debug, Clone)]
pub struct NatPmp {
    gateway: SocketAddrV4,
    lifetime: u32,
    timeout: Duration,
}

impl NatPmp {
    pub fn new(gateway: Ipv4Addr) -> Self {
        Self {
            gateway: SocketAddrV4::new(gateway, NATPMP_PORT),
            lifetime: NATPMP_LIFETIME,
            timeout: NATPMP_REQUEST_TIMEOUT,
        }
    }

    /// Talks to the gateway on a non-standard port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.gateway.set_port(port);
        self
    }

    pub fn with_lifetime(mut self, seconds: u32) -> Self {
        self.lifetime = seconds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn external_ip(&self) -> Result<Ipv4Addr, MappingError> {
        let buf = self.request(&[0, OP_EXTERNAL_ADDRESS], 12).await?;
        check_header(&buf, OP_EXTERNAL_ADDRESS)?;
        Ok(Ipv4Addr::new(buf[8], buf[9], buf[10], buf[11]))
    }

    async fn map_port(&self, internal_port: u16) -> Result<u16, MappingError> {
        let mut request = Vec::with_capacity(12);
        request.push(0);
        request.push(OP_MAP_UDP);
        request.extend_from_slice(&[0, 0]);
        request.extend_from_slice(&internal_port.to_be_bytes());
        request.extend_from_slice(&internal_port.to_be_bytes());
        request.extend_from_slice(&self.lifetime.to_be_bytes());

        let buf = self.request(&request, 16).await?;
        check_header(&buf, OP_MAP_UDP)?;
        Ok(u16::from_be_bytes([buf[10], buf[11]]))
    }

    async fn request(&self, request: &[u8], expected: usize) -> Result<Vec<u8>, MappingError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(request, self.gateway).await?;

        let mut buf = vec![0u8; 16];
        let (n, _) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| MappingError::Timeout)??;

        if n < expected {
            return Err(MappingError::InvalidResponse(format!(
                "expected {} bytes, got {}",
                expected, n
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

fn check_header(buf: &[u8], opcode: u8) -> Result<(), MappingError> {
    if buf[0] != 0 || buf[1] != RESPONSE_FLAG | opcode {
        return Err(MappingError::InvalidResponse(format!(
            "unexpected version {} opcode {}",
            buf[0], buf[1]
        )));
    }
    match u16::from_be_bytes([buf[2], buf[3]]) {
        0 => Ok(()),
        code => Err(MappingError::Refused(code)),
    }
}

#[async_trait]
impl PortMapper for NatPmp {
    async fn map_udp(&self, internal: SocketAddr) -> Result<PortMapping, MappingError> {
        if !matches!(internal.ip(), IpAddr::V4(_)) {
            return Err(MappingError::Unsupported);
        }

        let ip = self.external_ip().await?;
        let port = self.map_port(internal.port()).await?;
        let external = SocketAddr::new(IpAddr::V4(ip), port);
        debug!(%internal, %external, "port mapped");

        Ok(PortMapping { external, internal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fake_gateway(replies: Vec<Vec<u8>>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            for reply in replies {
                let (_, from) = socket.recv_from(&mut buf).await.unwrap();
                socket.send_to(&reply, from).await.unwrap();
            }
        });
        port
    }

    fn address_reply(ip: [u8; 4]) -> Vec<u8> {
        let mut reply = vec![0, 128, 0, 0, 0, 0, 0, 1];
        reply.extend_from_slice(&ip);
        reply
    }

    fn mapping_reply(internal: u16, external: u16, result: u16) -> Vec<u8> {
        let mut reply = vec![0, 129];
        reply.extend_from_slice(&result.to_be_bytes());
        reply.extend_from_slice(&[0, 0, 0, 1]);
        reply.extend_from_slice(&internal.to_be_bytes());
        reply.extend_from_slice(&external.to_be_bytes());
        reply.extend_from_slice(&7200u32.to_be_bytes());
        reply
    }

    #[tokio::test]
    async fn test_map_udp() {
        let port = fake_gateway(vec![
            address_reply([203, 0, 113, 7]),
            mapping_reply(6881, 40000, 0),
        ])
        .await;

        let mapper = NatPmp::new(Ipv4Addr::LOCALHOST).with_port(port);
        let internal: SocketAddr = "192.168.1.20:6881".parse().unwrap();
        let mapping = mapper.map_udp(internal).await.unwrap();

        assert_eq!(mapping.internal, internal);
        assert_eq!(mapping.external, "203.0.113.7:40000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_map_udp_refused() {
        let port = fake_gateway(vec![
            address_reply([203, 0, 113, 7]),
            mapping_reply(6881, 0, 2),
        ])
        .await;

        let mapper = NatPmp::new(Ipv4Addr::LOCALHOST).with_port(port);
        let result = mapper.map_udp("192.168.1.20:6881".parse().unwrap()).await;
        assert!(matches!(result, Err(MappingError::Refused(2))));
    }

    #[tokio::test]
    async fn test_map_udp_timeout() {
        let port = fake_gateway(Vec::new()).await;
        let mapper = NatPmp::new(Ipv4Addr::LOCALHOST)
            .with_port(port)
            .with_timeout(Duration::from_millis(50));

        let result = mapper.map_udp("192.168.1.20:6881".parse().unwrap()).await;
        assert!(matches!(result, Err(MappingError::Timeout)));
    }

    #[tokio::test]
    async fn test_ipv6_unsupported() {
        let mapper = NatPmp::new(Ipv4Addr::LOCALHOST);
        let result = mapper.map_udp("[::1]:6881".parse().unwrap()).await;
        assert!(matches!(result, Err(MappingError::Unsupported)));
    }
}
