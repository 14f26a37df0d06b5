//! Interfaces to the network collaborators
//!
//! The WiFi bring-up side (`LinkControl`) and the per-command TCP socket
//! (`GatewaySocket`) are implemented by the ESP32-C3 drivers in `wifi` and
//! `tcp_client`, and by mocks in the tests.

use crate::{TransportError, config};
use core::net::{Ipv4Addr, SocketAddrV4};

/// Station credentials handed to the link on every connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiCredentials {
    /// Credentials baked in at build time
    pub const fn from_build_env() -> Self {
        Self {
            ssid: config::WIFI_SSID,
            password: config::WIFI_PASSWORD,
        }
    }
}

/// IPv4 configuration obtained from DHCP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetInfo {
    pub address: Ipv4Addr,
    /// Router offered by the DHCP server, if any
    pub gateway: Option<Ipv4Addr>,
}

/// Connectivity notifications from the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    LinkUp,
    LinkDown,
    AddressAcquired(NetInfo),
}

/// Where commands are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEndpoint {
    /// Address fixed at build time
    Fixed(SocketAddrV4),
    /// Router address from DHCP, on the given port
    DhcpRouter { port: u16 },
}

impl GatewayEndpoint {
    /// `GATEWAY_IP:GATEWAY_PORT` if an address was configured, the DHCP router otherwise
    pub const fn from_build_env() -> Self {
        match config::GATEWAY_FIXED_IP {
            Some(ip) => GatewayEndpoint::Fixed(SocketAddrV4::new(ip, config::GATEWAY_PORT)),
            None => GatewayEndpoint::DhcpRouter {
                port: config::GATEWAY_PORT,
            },
        }
    }

    pub fn resolve(&self, net: &NetInfo) -> Option<SocketAddrV4> {
        match *self {
            GatewayEndpoint::Fixed(endpoint) => Some(endpoint),
            GatewayEndpoint::DhcpRouter { port } => {
                net.gateway.map(|router| SocketAddrV4::new(router, port))
            }
        }
    }
}

/// WiFi station bring-up and connectivity events
#[allow(async_fn_in_trait)]
pub trait LinkControl {
    /// Request association with the access point. Completion is reported
    /// through `next_event`.
    async fn connect(&mut self, credentials: &WifiCredentials) -> Result<(), TransportError>;

    /// Drop the association and stop the radio
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Wait for the next connectivity change. Must be cancel safe: dropping
    /// the future before it completes loses no event.
    async fn next_event(&mut self) -> LinkEvent;
}

/// Blocking-style TCP client socket, used for exactly one command per connection
#[allow(async_fn_in_trait)]
pub trait GatewaySocket {
    async fn connect(&mut self, endpoint: SocketAddrV4) -> Result<(), TransportError>;

    /// Write the whole buffer
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Graceful close
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Reset the connection immediately, used when a session is cancelled
    fn abort(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcp_router_endpoint_needs_a_router() {
        let endpoint = GatewayEndpoint::DhcpRouter { port: 5000 };
        let with_router = NetInfo {
            address: Ipv4Addr::new(192, 168, 1, 40),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        };
        let without_router = NetInfo {
            gateway: None,
            ..with_router
        };

        assert_eq!(
            endpoint.resolve(&with_router),
            Some(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 5000))
        );
        assert_eq!(endpoint.resolve(&without_router), None);
    }

    #[test]
    fn fixed_endpoint_ignores_dhcp() {
        let fixed = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 7000);
        let net = NetInfo {
            address: Ipv4Addr::new(10, 0, 0, 9),
            gateway: None,
        };
        assert_eq!(GatewayEndpoint::Fixed(fixed).resolve(&net), Some(fixed));
    }
}
