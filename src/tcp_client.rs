//! TCP client towards the gateway
//!
//! One embassy-net socket, reused for every command: connect, write the
//! record, close.

use crate::transport::GatewaySocket;
use crate::{TransportError, config};
use core::net::SocketAddrV4;
use embassy_net::tcp::{State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::Duration;

pub struct TcpGateway<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpGateway<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(Duration::from_millis(config::TCP_SOCKET_TIMEOUT_MS)));
        Self { socket }
    }
}

impl GatewaySocket for TcpGateway<'_> {
    async fn connect(&mut self, endpoint: SocketAddrV4) -> Result<(), TransportError> {
        // The previous connection may still be lingering in TIME-WAIT
        if self.socket.state() != State::Closed {
            self.socket.abort();
            if let Err(e) = self.socket.flush().await {
                log::debug!("[TCP] Flush after abort failed: {:?}", e);
            }
        }

        let remote = IpEndpoint::new(IpAddress::Ipv4(*endpoint.ip()), endpoint.port());
        self.socket.connect(remote).await.map_err(|e| {
            log::error!("[TCP] Connect to {} failed: {:?}", endpoint, e);
            TransportError::Connect
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            match self.socket.write(remaining).await {
                Ok(0) => {
                    log::error!("[TCP] Connection closed during write");
                    return Err(TransportError::Write);
                }
                Ok(n) => remaining = &remaining[n..],
                Err(e) => {
                    log::error!("[TCP] Write failed: {:?}", e);
                    return Err(TransportError::Write);
                }
            }
        }

        self.socket.flush().await.map_err(|e| {
            log::error!("[TCP] Flush failed: {:?}", e);
            TransportError::Write
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket.close();
        self.socket.flush().await.map_err(|e| {
            log::error!("[TCP] Close failed: {:?}", e);
            TransportError::Close
        })
    }

    fn abort(&mut self) {
        self.socket.abort();
    }
}
