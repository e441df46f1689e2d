//! UDP audio tap: receives RTP frames from the PBX's
//! ExternalMedia channel, strips the fixed 12-byte RTP header, and forwards
//! the raw mu-law payload downstream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Standard RTP header with no CSRC list or extensions.
const RTP_HEADER_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum UdpTapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UdpTapError>;

/// A single received payload, already stripped of its RTP header.
#[derive(Debug, Clone)]
pub struct RtpPayload {
    pub bytes: Vec<u8>,
}

pub struct UdpTap {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTap {
    /// Binds an ephemeral UDP port on the given host interface.
    pub async fn bind(host: &str) -> Result<Self> {
        let socket = UdpSocket::bind((host, 0)).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Spawns the receive loop: reads datagrams, strips the RTP header, and
    /// forwards payloads on `tx` until `cancel` fires or the socket errors.
    /// The socket is the tap's single owner and is dropped (closed exactly
    /// once) when this task ends.
    pub fn spawn_receiver(self, tx: mpsc::Sender<RtpPayload>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(port = self.port(), "udp tap cancelled");
                        break;
                    }
                    result = self.socket.recv(&mut buf) => {
                        match result {
                            Ok(n) => {
                                if let Some(payload) = strip_rtp_header(&buf[..n]) {
                                    if tx.send(RtpPayload { bytes: payload.to_vec() }).await.is_err() {
                                        break;
                                    }
                                } else {
                                    tracing::warn!(len = n, "dropping RTP frame shorter than the header");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(%err, "udp tap recv error");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }
}

fn strip_rtp_header(frame: &[u8]) -> Option<&[u8]> {
    frame.get(RTP_HEADER_LEN..)
}
