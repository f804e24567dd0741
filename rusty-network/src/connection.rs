//! Peer connection state machine (§4.2): `Opening → VersionSent →
//! {VersionReceived, VerackReceived} → Ready → Closed`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{NetworkError, NetworkResult};
use crate::message::{Message, MessageHeader, MAX_MESSAGE_SIZE};
use crate::protocol::Network;
use crate::socks::dial;

pub const READ_BUFFER_CAP: usize = 64 * 1024;
pub const PING_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    VersionSent,
    VersionReceived,
    VerackReceived,
    Ready,
    Closed,
}

/// Where to reach a peer: direct TCP, or tunneled through a local SOCKS5 proxy.
#[derive(Debug, Clone)]
pub enum Dialer {
    Direct,
    Socks5 { proxy: SocketAddr },
}

struct ReadHalfState {
    stream: tokio::net::tcp::OwnedReadHalf,
    buffer: Vec<u8>,
}

impl ReadHalfState {
    async fn read_frame(&mut self, network: Network) -> NetworkResult<(String, Vec<u8>)> {
        let mut header_buf = [0u8; MessageHeader::ENCODED_LEN];
        self.stream.read_exact(&mut header_buf).await?;
        let header = MessageHeader::decode(&header_buf);
        if header.magic != network.magic() {
            return Err(NetworkError::InvalidMagic {
                expected: network.magic(),
                actual: header.magic,
            });
        }
        if header.length as usize > MAX_MESSAGE_SIZE {
            return Err(NetworkError::PayloadTooLarge {
                len: header.length as usize,
                max: MAX_MESSAGE_SIZE,
            });
        }
        self.buffer.clear();
        self.buffer.resize(header.length as usize, 0);
        self.stream.read_exact(&mut self.buffer).await?;
        let command = header.command_str()?.to_string();
        if !header.verify_checksum(&self.buffer) {
            // Bad checksum: silently drop this frame and let the caller retry (§4.1).
            return Err(NetworkError::Protocol("checksum mismatch, frame dropped".to_string()));
        }
        Ok((command, std::mem::take(&mut self.buffer)))
    }
}

/// A live peer connection. Cloning shares the outbound half and liveness
/// bookkeeping; only one task should drive `read_message_loop`.
#[derive(Clone)]
pub struct PeerConnection {
    pub addr: SocketAddr,
    network: Network,
    write_half: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    pub cancel: CancellationToken,
    last_write: Arc<AtomicInstant>,
    last_read: Arc<AtomicInstant>,
}

/// `Instant` isn't naturally atomic; we track elapsed millis since connection start.
struct AtomicInstant {
    origin: Instant,
    millis: AtomicU64,
}

impl AtomicInstant {
    fn new(origin: Instant) -> Self {
        Self { origin, millis: AtomicU64::new(0) }
    }

    fn touch(&self) {
        self.millis.store(self.origin.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn elapsed_since_touch(&self) -> Duration {
        let touched = Duration::from_millis(self.millis.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(touched)
    }
}

impl PeerConnection {
    /// Runs the handshake (§4.2) and returns a ready connection plus the
    /// inbound message stream for the reader task.
    pub async fn connect(
        addr: SocketAddr,
        network: Network,
        dialer: &Dialer,
        user_agent: &str,
        start_height: i32,
    ) -> NetworkResult<(Self, mpsc::Receiver<Message>)> {
        let stream = match dialer {
            Dialer::Direct => TcpStream::connect(addr).await?,
            Dialer::Socks5 { proxy } => dial(*proxy, addr).await?,
        };
        let (read_half, write_half) = stream.into_split();
        let origin = Instant::now();
        let conn = Self {
            addr,
            network,
            write_half: Arc::new(Mutex::new(write_half)),
            cancel: CancellationToken::new(),
            last_write: Arc::new(AtomicInstant::new(origin)),
            last_read: Arc::new(AtomicInstant::new(origin)),
        };

        let version = Message::Version(crate::message::VersionPayload {
            version: 70216,
            services: 0,
            timestamp: 0,
            recv: crate::protocol::NetworkAddress::new(0, addr),
            trans: crate::protocol::NetworkAddress::default(),
            nonce: rand::random(),
            user_agent: user_agent.to_string(),
            start_height,
            relay: true,
        });
        conn.send(&version).await?;

        let mut read_state = ReadHalfState { stream: read_half, buffer: Vec::with_capacity(READ_BUFFER_CAP) };
        let mut got_version = false;
        let mut got_verack = false;
        while !(got_version && got_verack) {
            let (command, payload) = read_state.read_frame(network).await?;
            conn.last_read.touch();
            match command.as_str() {
                "version" => {
                    Message::decode_payload("version", &payload)?;
                    got_version = true;
                }
                "verack" => got_verack = true,
                other => {
                    return Err(NetworkError::HandshakeFailed(format!(
                        "unexpected message {other:?} during handshake"
                    )))
                }
            }
        }
        conn.send(&Message::Verack).await?;
        conn.send(&Message::SendDsq(true)).await?;

        let (tx, rx) = mpsc::channel(256);
        let reader_conn = conn.clone();
        let cancel = conn.cancel.clone();
        tokio::spawn(async move {
            reader_conn.read_message_loop(read_state, tx, cancel).await;
        });
        let pinger_conn = conn.clone();
        tokio::spawn(async move {
            pinger_conn.ping_loop().await;
        });

        Ok((conn, rx))
    }

    async fn read_message_loop(
        &self,
        mut read_state: ReadHalfState,
        tx: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = read_state.read_frame(self.network) => frame,
            };
            match frame {
                Ok((command, payload)) => {
                    self.last_read.touch();
                    match Message::decode_payload(&command, &payload) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            log::warn!("dropping malformed {command} from {}: {err}", self.addr);
                        }
                    }
                }
                Err(NetworkError::Io(_)) => break,
                Err(_) => continue, // checksum mismatch etc: drop and keep reading
            }
        }
    }

    async fn ping_loop(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(PING_INTERVAL) => {}
            }
            if self.last_write.elapsed_since_touch() >= PING_INTERVAL {
                let nonce: u64 = rand::random();
                if self.send(&Message::Ping(nonce)).await.is_err() {
                    break;
                }
            }
        }
    }

    /// Spawns the watchdog that disconnects on read/write imbalance timeout.
    pub fn spawn_watchdog(&self, network_timeout: Duration) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = conn.cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
                let write_elapsed = conn.last_write.elapsed_since_touch();
                let read_elapsed = conn.last_read.elapsed_since_touch();
                if write_elapsed > read_elapsed && write_elapsed - read_elapsed > network_timeout {
                    log::warn!("peer {} read timeout, disconnecting", conn.addr);
                    conn.close();
                    break;
                }
            }
        });
    }

    pub async fn send(&self, message: &Message) -> NetworkResult<()> {
        let payload = message.encode_payload()?;
        let header = MessageHeader::new(self.network, message.command(), &payload)?;
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&header.encode()).await?;
        write_half.write_all(&payload).await?;
        write_half.flush().await?;
        drop(write_half);
        self.last_write.touch();
        Ok(())
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// A 10-slot ring of recently-used masternodes, preventing the same
/// masternode from being re-selected for back-to-back mix sessions (§4.7).
pub struct RecentMixMasternodes {
    ring: VecDeque<SocketAddr>,
    capacity: usize,
}

impl RecentMixMasternodes {
    pub fn new() -> Self {
        Self { ring: VecDeque::with_capacity(10), capacity: 10 }
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.ring.contains(addr)
    }

    pub fn push(&mut self, addr: SocketAddr) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(addr);
    }
}

impl Default for RecentMixMasternodes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_mix_ring_evicts_oldest() {
        let mut ring = RecentMixMasternodes::new();
        for i in 0..12u8 {
            ring.push(SocketAddr::from(([127, 0, 0, 1], 10_000 + i as u16)));
        }
        assert_eq!(ring.ring.len(), 10);
        assert!(!ring.contains(&SocketAddr::from(([127, 0, 0, 1], 10_000))));
        assert!(ring.contains(&SocketAddr::from(([127, 0, 0, 1], 10_011))));
    }
}
