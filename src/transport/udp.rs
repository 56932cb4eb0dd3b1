use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::Transport;
use crate::error::{Error, Result};

/// Builder for [`UdpTransport`].
#[derive(Debug, Clone)]
pub struct UdpTransportBuilder {
    bind_addr: SocketAddr,
    recv_buffer_size: Option<usize>,
}

impl Default for UdpTransportBuilder {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            recv_buffer_size: None,
        }
    }
}

impl UdpTransportBuilder {
    /// Local bind address. Use `[::]:port` for a dual-stack socket.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Kernel receive buffer size; the kernel may cap it.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub async fn build(self) -> Result<UdpTransport> {
        let socket = open_socket(self.bind_addr, self.recv_buffer_size).map_err(|source| Error::Io {
            target: Some(self.bind_addr),
            source,
        })?;
        let local_addr = socket.local_addr().map_err(|source| Error::Io {
            target: None,
            source,
        })?;

        tracing::debug!(target: "snmp_engine::transport", { snmp.local_addr = %local_addr }, "UDP transport bound");

        Ok(UdpTransport { socket, local_addr })
    }
}

/// Non-blocking UDP socket; IPv6 binds are dual-stack.
fn open_socket(addr: SocketAddr, recv_buffer_size: Option<usize>) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    if let Some(size) = recv_buffer_size
        && let Err(err) = socket.set_recv_buffer_size(size)
    {
        tracing::debug!(target: "snmp_engine::transport", { size, error = %err }, "receive buffer size not applied");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// UDP transport over a single tokio socket.
///
/// On an IPv6 dual-stack socket, IPv4 destinations are sent as IPv4-mapped
/// addresses and mapped sources are reported in their canonical IPv4 form,
/// so responses match the address the request was sent to.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn builder() -> UdpTransportBuilder {
        UdpTransportBuilder::default()
    }

    /// Bind with default options.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::builder().bind(addr).build().await
    }

    fn outbound_addr(&self, target: SocketAddr) -> SocketAddr {
        match (self.local_addr.ip(), target.ip()) {
            (IpAddr::V6(_), IpAddr::V4(v4)) => SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), target.port()),
            _ => target,
        }
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        tracing::trace!(target: "snmp_engine::transport", { snmp.target = %target, snmp.bytes = data.len() }, "UDP send");
        self.socket
            .send_to(data, self.outbound_addr(target))
            .await
            .map_err(|source| Error::Io {
                target: Some(target),
                source,
            })?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (len, source) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|source| Error::Io { target: None, source })?;
        let source = SocketAddr::new(source.ip().to_canonical(), source.port());
        tracing::trace!(target: "snmp_engine::transport", { snmp.source = %source, snmp.bytes = len }, "UDP recv");
        Ok((len, source))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_exchange() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send_to(b"ping", b.local_addr()).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr());
    }

    #[tokio::test]
    async fn binds_ipv6_loopback() {
        let Ok(transport) = UdpTransport::bind("[::1]:0".parse().unwrap()).await else {
            return;
        };
        assert!(transport.local_addr().is_ipv6());
        assert_ne!(transport.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn recv_buffer_size_is_best_effort() {
        let transport = UdpTransport::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .recv_buffer_size(4 * 1024 * 1024)
            .build()
            .await
            .unwrap();
        assert_ne!(transport.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn ipv4_target_mapped_on_dual_stack() {
        let Ok(transport) = UdpTransport::bind("[::]:0".parse().unwrap()).await else {
            return;
        };
        let mapped = transport.outbound_addr("192.0.2.1:161".parse().unwrap());
        assert_eq!(mapped, "[::ffff:192.0.2.1]:161".parse::<SocketAddr>().unwrap());
    }
}
