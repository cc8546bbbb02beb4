//! C6's datagram boundary: an `unreliable, unordered, possibly-duplicating
//! datagram channel between named peers`, realized over a real UDP socket.
//!
//! Per §6, a replica is handed a single shared rendezvous port on the
//! command line and addresses every peer -- and every client -- by logical
//! id in the JSON envelope, not by socket address; routing `dst` to an
//! actual destination is the relay's job, external to the core (§1: "the
//! lossy UDP transport chosen by the simulator ... not specified here").
//! `UdpTransport` is that relay-facing leaf: every send goes to the one
//! configured relay address regardless of logical `dst`, and `broadcast`
//! is simply `send` once, since the relay fans a `dst == "FFFF"` envelope
//! out to the whole cluster on our behalf.
//!
//! The event loop only ever depends on the `Transport` trait, never on
//! `UdpSocket` directly -- that's what lets the test suite drive the whole
//! replication core through an in-memory network with full control over
//! drops, duplication, and partitions (see `tests/support/mod.rs`).

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::warn;

use crate::error::RaftError;
use crate::message::{Message, ReplicaId};

/// Fire-and-forget send, blocking-with-deadline receive. A replica must
/// never block waiting for any single peer (§4.6), so `send` never waits
/// for acknowledgement and `recv_timeout` bounds how long the loop sleeps.
pub trait Transport {
    fn send(&mut self, dst: &ReplicaId, msg: &Message) -> Result<(), RaftError>;

    /// Sends to every peer (used for `dst == "FFFF"`).
    fn broadcast(&mut self, msg: &Message) -> Result<(), RaftError>;

    /// Blocks for at most `timeout`. Returns `Ok(None)` on timeout,
    /// `Ok(Some(_))` on a datagram that parsed as a `Message`. A datagram
    /// that fails to parse is logged and discarded (§7: malformed message),
    /// never surfaced as an error.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, RaftError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
    relay_addr: SocketAddr,
}

impl UdpTransport {
    /// Binds an ephemeral local socket and remembers the one address every
    /// outbound datagram is sent to.
    pub fn connect(relay_addr: SocketAddr) -> Result<Self, RaftError> {
        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        Ok(UdpTransport { socket, relay_addr })
    }

    fn send_envelope(&mut self, msg: &Message) -> Result<(), RaftError> {
        let bytes = serde_json::to_vec(msg)?;
        // Fire-and-forget: a send failure here is the same kind of
        // transient network condition UDP already models, so it is logged
        // rather than propagated.
        if let Err(e) = self.socket.send_to(&bytes, self.relay_addr) {
            warn!("send to relay failed: {}", e);
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, _dst: &ReplicaId, msg: &Message) -> Result<(), RaftError> {
        self.send_envelope(msg)
    }

    fn broadcast(&mut self, msg: &Message) -> Result<(), RaftError> {
        self.send_envelope(msg)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, RaftError> {
        // A zero-duration read timeout means "poll forever" on some
        // platforms; round tiny or zero deadlines up to a minimal sleep.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; 65536];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _from)) => match serde_json::from_slice::<Message>(&buf[..len]) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => {
                    warn!("discarding malformed datagram: {}", e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(RaftError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback(port: u16) -> SocketAddr {
        (Ipv4Addr::LOCALHOST, port).into()
    }

    #[test]
    fn recv_timeout_returns_none_when_nothing_arrives() {
        let mut t = UdpTransport::connect(loopback(0)).unwrap();
        let got = t.recv_timeout(Duration::from_millis(10)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn send_then_recv_round_trips_a_message_over_loopback() {
        let mut a = UdpTransport::connect(loopback(0)).unwrap();
        let a_addr = a.socket.local_addr().unwrap();

        let mut b = UdpTransport::connect(a_addr).unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        // `a` was bound before `b` existed, so point it back at `b` now
        // that `b`'s ephemeral port is known.
        a.relay_addr = b_addr;

        let msg = Message::Hello {
            src: "0000".to_string(),
            dst: crate::message::BROADCAST.to_string(),
            leader: crate::message::BROADCAST.to_string(),
        };
        a.send(&"0001".to_string(), &msg).unwrap();

        let received = b
            .recv_timeout(Duration::from_millis(500))
            .unwrap()
            .expect("expected the message to arrive");
        assert!(matches!(received, Message::Hello { src, .. } if src == "0000"));
    }
}
