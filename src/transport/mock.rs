use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{Notify, mpsc};

use super::Transport;
use crate::error::{Error, Result};

type Responder = Box<dyn Fn(&[u8], SocketAddr) -> Option<(Bytes, SocketAddr)> + Send + Sync>;

struct Inner {
    local_addr: SocketAddr,
    inbound_tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    sent: Mutex<VecDeque<(Bytes, SocketAddr)>>,
    sent_total: Mutex<usize>,
    sent_notify: Notify,
    responder: Mutex<Option<Responder>>,
}

/// In-memory transport for tests.
///
/// Every sent datagram is recorded; inbound datagrams are injected with
/// [`deliver`](MockTransport::deliver) or produced by a responder closure.
/// Clones share state.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("sent_count", &self.sent_count())
            .finish()
    }
}

impl MockTransport {
    pub fn new(local_addr: SocketAddr) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                local_addr,
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                sent: Mutex::new(VecDeque::new()),
                sent_total: Mutex::new(0),
                sent_notify: Notify::new(),
                responder: Mutex::new(None),
            }),
        }
    }

    /// Queue a datagram as if it arrived from `from`.
    pub fn deliver(&self, data: impl Into<Bytes>, from: SocketAddr) {
        // The receiver lives in `inner`, so the channel cannot be closed.
        let _ = self.inner.inbound_tx.send((data.into(), from));
    }

    /// Answer each sent datagram with the closure's reply, if any.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8], SocketAddr) -> Option<(Bytes, SocketAddr)> + Send + Sync + 'static,
    {
        *self.inner.responder.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(responder));
    }

    /// Total datagrams sent so far.
    pub fn sent_count(&self) -> usize {
        *self.inner.sent_total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the oldest recorded datagram, if any.
    pub fn try_next_sent(&self) -> Option<(Bytes, SocketAddr)> {
        self.inner.sent.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    /// Wait for the next recorded datagram.
    pub async fn next_sent(&self) -> (Bytes, SocketAddr) {
        loop {
            let notified = self.inner.sent_notify.notified();
            if let Some(sent) = self.try_next_sent() {
                return sent;
            }
            notified.await;
        }
    }
}

impl Transport for MockTransport {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        let data = Bytes::copy_from_slice(data);
        {
            let mut sent = self.inner.sent.lock().unwrap_or_else(PoisonError::into_inner);
            sent.push_back((data.clone(), target));
            *self.inner.sent_total.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        }
        self.inner.sent_notify.notify_waiters();

        let reply = self
            .inner
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|responder| responder(&data, target));
        if let Some((reply, from)) = reply {
            self.deliver(reply, from);
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut rx = self.inner.inbound_rx.lock().await;
        let (data, from) = rx.recv().await.ok_or(Error::Closed)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn records_and_delivers() {
        let mock = MockTransport::new(addr(1));
        mock.send_to(b"abc", addr(161)).await.unwrap();
        assert_eq!(mock.sent_count(), 1);
        assert_eq!(mock.next_sent().await, (Bytes::from_static(b"abc"), addr(161)));

        mock.deliver(Bytes::from_static(b"xyz"), addr(161));
        let mut buf = [0u8; 8];
        let (len, from) = mock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"xyz");
        assert_eq!(from, addr(161));
    }

    #[tokio::test]
    async fn responder_echoes() {
        let mock = MockTransport::new(addr(1));
        mock.set_responder(|data, target| Some((Bytes::copy_from_slice(data), target)));
        mock.send_to(b"echo", addr(162)).await.unwrap();

        let mut buf = [0u8; 8];
        let (len, from) = mock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"echo");
        assert_eq!(from, addr(162));
    }
}
