//! Datagram transport boundary.
//!
//! The dispatcher only needs to send a datagram to an address and to receive
//! the next datagram from anyone. Delivery is treated as unreliable,
//! unordered and at-most-once; retries live in the dispatcher.

mod mock;
mod udp;

pub use mock::MockTransport;
pub use udp::{UdpTransport, UdpTransportBuilder};

use std::future::Future;
use std::net::SocketAddr;

use crate::error::Result;

/// Connectionless datagram transport.
///
/// One transport serves every destination; the dispatcher's receive loop is
/// the only caller of [`recv_from`](Transport::recv_from).
pub trait Transport: Send + Sync + 'static {
    /// Send one datagram to `target`.
    fn send_to(&self, data: &[u8], target: SocketAddr) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next datagram, returning its length and source.
    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = Result<(usize, SocketAddr)>> + Send;

    /// Local bind address.
    fn local_addr(&self) -> SocketAddr;
}
