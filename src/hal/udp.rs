//! UDP-backed HAL for running nodes as ordinary processes.
//!
//! Each radio frame travels as one UDP datagram prefixed with the
//! 8-byte source and 8-byte destination link addresses. Every datagram
//! goes to every configured peer; receivers keep only frames addressed
//! to them or to the broadcast address.
//!
//! `Hal::send` only queues the datagram. A send task delivers it to each
//! peer in turn, so a frame is accepted or refused as a whole and a
//! retried frame never reaches a peer twice.

use super::{Hal, HalError};
use crate::config::UdpConfig;
use crate::identity::ExtAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Link addresses in front of each frame.
pub const UDP_LINK_HEADER_SIZE: usize = 2 * ExtAddr::LEN;

/// A frame received from the UDP medium.
#[derive(Clone, Debug)]
pub struct ReceivedFrame {
    pub src: ExtAddr,
    pub frame: Vec<u8>,
}

/// Datagrams waiting for the send task.
const SEND_QUEUE: usize = 64;

pub struct UdpHal {
    ext: ExtAddr,
    socket: Arc<UdpSocket>,
    mtu: usize,
    channel: u8,
    send_tx: mpsc::Sender<Vec<u8>>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl UdpHal {
    /// Bind the socket and start the receive loop.
    pub async fn bind(
        ext: ExtAddr,
        config: &UdpConfig,
    ) -> Result<(Self, mpsc::Receiver<ReceivedFrame>), HalError> {
        let bind_addr: SocketAddr = config
            .bind_addr()
            .parse()
            .map_err(|e| HalError::Failed(format!("invalid bind address: {}", e)))?;
        let peers = config
            .peers
            .iter()
            .map(|p| p.parse::<SocketAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HalError::Failed(format!("invalid peer address: {}", e)))?;

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| HalError::Failed(format!("bind failed: {}", e)))?;
        let local = socket
            .local_addr()
            .map_err(|e| HalError::Failed(format!("get local addr: {}", e)))?;
        let socket = Arc::new(socket);
        let mtu = config.mtu() as usize;

        info!(local_addr = %local, peers = peers.len(), mac = %ext, "UDP HAL started");

        let (tx, rx) = mpsc::channel(256);
        let recv_socket = Arc::clone(&socket);
        let recv_task = tokio::spawn(async move {
            udp_receive_loop(recv_socket, ext, tx, mtu).await;
        });

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE);
        let send_socket = Arc::clone(&socket);
        let send_task = tokio::spawn(async move {
            udp_send_loop(send_socket, peers, send_rx).await;
        });

        Ok((
            Self {
                ext,
                socket,
                mtu,
                channel: 1,
                send_tx,
                recv_task,
                send_task,
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

impl Drop for UdpHal {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.send_task.abort();
    }
}

impl Hal for UdpHal {
    fn send(&mut self, dest: &ExtAddr, frame: &[u8]) -> Result<(), HalError> {
        if frame.len() > self.mtu {
            return Err(HalError::Failed(format!(
                "frame {} exceeds mtu {}",
                frame.len(),
                self.mtu
            )));
        }
        let mut datagram = Vec::with_capacity(UDP_LINK_HEADER_SIZE + frame.len());
        datagram.extend_from_slice(self.ext.as_bytes());
        datagram.extend_from_slice(dest.as_bytes());
        datagram.extend_from_slice(frame);

        match self.send_tx.try_send(datagram) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(HalError::Busy),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HalError::Failed("send task stopped".into()))
            }
        }
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), HalError> {
        if channel == 0 {
            return Err(HalError::InvalidChannel(channel));
        }
        self.channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn link_quality(&self, _neighbor: &ExtAddr) -> Option<i8> {
        None
    }

    fn mac_address(&self) -> ExtAddr {
        self.ext
    }

    fn bcast_mtu(&self) -> usize {
        self.mtu
    }

    fn ucast_mtu(&self) -> usize {
        self.mtu
    }
}

/// Split a UDP datagram into link addresses and frame.
pub fn parse_datagram(data: &[u8]) -> Option<(ExtAddr, ExtAddr, &[u8])> {
    if data.len() <= UDP_LINK_HEADER_SIZE {
        return None;
    }
    let src = ExtAddr::from_slice(&data[..ExtAddr::LEN]).ok()?;
    let dest = ExtAddr::from_slice(&data[ExtAddr::LEN..UDP_LINK_HEADER_SIZE]).ok()?;
    Some((src, dest, &data[UDP_LINK_HEADER_SIZE..]))
}

async fn udp_send_loop(
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(datagram) = rx.recv().await {
        for peer in &peers {
            match socket.send_to(&datagram, *peer).await {
                Ok(bytes) => trace!(peer = %peer, bytes, "UDP datagram sent"),
                Err(e) => debug!(peer = %peer, error = %e, "UDP send failed"),
            }
        }
    }
    debug!("Send queue closed, stopping send loop");
}

async fn udp_receive_loop(
    socket: Arc<UdpSocket>,
    ext: ExtAddr,
    tx: mpsc::Sender<ReceivedFrame>,
    mtu: usize,
) {
    let mut buf = vec![0u8; mtu + UDP_LINK_HEADER_SIZE + 64];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote)) => {
                let Some((src, dest, frame)) = parse_datagram(&buf[..len]) else {
                    debug!(remote = %remote, bytes = len, "Dropping short UDP datagram");
                    continue;
                };
                if src == ext || (dest != ext && !dest.is_broadcast()) {
                    continue;
                }
                let frame = ReceivedFrame {
                    src,
                    frame: frame.to_vec(),
                };
                if tx.send(frame).await.is_err() {
                    info!("Frame channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "UDP receive error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_parse_datagram() {
        let mut data = vec![0u8; UDP_LINK_HEADER_SIZE];
        data[7] = 1;
        data[8..16].copy_from_slice(&[0xff; 8]);
        assert!(parse_datagram(&data).is_none());
        data.push(0xaa);
        let (src, dest, frame) = parse_datagram(&data).unwrap();
        assert_eq!(src, ExtAddr::from_u64(1));
        assert!(dest.is_broadcast());
        assert_eq!(frame, &[0xaa]);
    }

    #[tokio::test]
    async fn test_send_between_two_hals() {
        let listen = UdpConfig {
            bind_addr: Some("127.0.0.1:0".into()),
            mtu: Some(256),
            peers: Vec::new(),
        };
        let (b, mut rx_b) = UdpHal::bind(ExtAddr::from_u64(2), &listen).await.unwrap();
        let to_b = UdpConfig {
            peers: vec![b.local_addr().unwrap().to_string()],
            ..listen
        };
        let (mut a, _rx_a) = UdpHal::bind(ExtAddr::from_u64(1), &to_b).await.unwrap();

        a.send(&ExtAddr::BROADCAST, b"hello").unwrap();
        a.send(&ExtAddr::from_u64(2), b"again").unwrap();
        for expected in [&b"hello"[..], &b"again"[..]] {
            let frame = timeout(Duration::from_secs(1), rx_b.recv())
                .await
                .expect("timeout")
                .expect("channel closed");
            assert_eq!(frame.src, ExtAddr::from_u64(1));
            assert_eq!(frame.frame, expected);
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_refused() {
        let config = UdpConfig {
            bind_addr: Some("127.0.0.1:0".into()),
            mtu: Some(64),
            peers: Vec::new(),
        };
        let (mut hal, _rx) = UdpHal::bind(ExtAddr::from_u64(1), &config).await.unwrap();
        assert!(matches!(hal.send(&ExtAddr::BROADCAST, &[0; 65]), Err(HalError::Failed(_))));
    }
}
