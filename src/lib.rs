#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Remote Switch Library
//!
//! This library turns debounced button interrupts into light commands and
//! delivers them over short-lived TCP connections to a gateway, keeping the
//! WiFi link alive with an automatic reconnecting state machine.
//!
//! Everything outside the `esp32c3` feature is hardware independent and runs
//! on the host, which is where the tests live.

use core::fmt;

pub mod bridge;
pub mod button;
pub mod command;
pub mod guard;
pub mod queue;
pub mod remote_switch;
pub mod session;
pub mod state_machine;
pub mod transport;

#[cfg(feature = "esp32c3")]
pub mod board;
#[cfg(feature = "esp32c3")]
pub mod tcp_client;
#[cfg(feature = "esp32c3")]
pub mod wifi;

pub use remote_switch::{RemoteSwitch, SwitchConfig};

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    use core::net::Ipv4Addr;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// Gateway address as given at build time, empty when the DHCP router should be used
    pub const GATEWAY_IP: &str = env!("GATEWAY_IP");

    /// Fixed gateway address, `None` falls back to the DHCP router
    pub const GATEWAY_FIXED_IP: Option<Ipv4Addr> = parse_ipv4(GATEWAY_IP);

    /// TCP port the gateway listens on when `GATEWAY_PORT` is not set
    pub const DEFAULT_GATEWAY_PORT: u16 = 5000;

    /// TCP port of the gateway command server
    pub const GATEWAY_PORT: u16 = parse_port(env!("GATEWAY_PORT"), DEFAULT_GATEWAY_PORT);

    /// Number of commands the queue holds before producers start waiting
    pub const COMMAND_QUEUE_DEPTH: usize = 10;

    /// Brightness bounds for level-cycling commands, in percent
    pub const MIN_LEVEL: u8 = 20;
    pub const MAX_LEVEL: u8 = 100;

    /// Brightness added per press and the number of distinct steps in a cycle
    pub const LEVEL_STEP: u8 = 10;
    pub const LEVEL_STEPS: u32 = 9;

    /// Number of physical buttons on the board
    pub const BUTTON_COUNT: usize = 2;

    /// Button GPIO pins
    pub const BUTTON_0_GPIO: u8 = 4;
    pub const BUTTON_1_GPIO: u8 = 5;

    /// Minimum spacing between two accepted button edges in milliseconds
    pub const BUTTON_DEBOUNCE_MS: u64 = 800;

    /// Maximum wait for a free queue slot in milliseconds
    pub const SEND_WAIT_MS: u64 = 1000;

    /// Maximum wait for the connection state lock in milliseconds
    pub const STATE_LOCK_WAIT_MS: u64 = 1000;

    /// Interval between connection checks while starting the client
    pub const CONNECT_POLL_INTERVAL_MS: u64 = 1000;

    /// WiFi reconnection interval in milliseconds
    pub const WIFI_RECONNECT_INTERVAL_MS: u64 = 5000;

    /// Interval between WiFi driver status polls in milliseconds
    pub const WIFI_POLL_INTERVAL_MS: u64 = 250;

    /// Inactivity timeout of a single gateway TCP connection in milliseconds
    pub const TCP_SOCKET_TIMEOUT_MS: u64 = 5000;

    /// Parse a dotted IPv4 address, `None` for empty or malformed input
    pub const fn parse_ipv4(text: &str) -> Option<Ipv4Addr> {
        let bytes = text.as_bytes();
        let mut octets = [0u8; 4];
        let mut index = 0;
        let mut value: u16 = 0;
        let mut digits = 0;
        let mut i = 0;

        while i < bytes.len() {
            let byte = bytes[i];
            if byte == b'.' {
                if digits == 0 || index == 3 {
                    return None;
                }
                octets[index] = value as u8;
                index += 1;
                value = 0;
                digits = 0;
            } else if byte.is_ascii_digit() {
                value = value * 10 + (byte - b'0') as u16;
                digits += 1;
                if digits > 3 || value > 255 {
                    return None;
                }
            } else {
                return None;
            }
            i += 1;
        }

        if digits == 0 || index != 3 {
            return None;
        }
        octets[3] = value as u8;

        Some(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
    }

    /// Parse a decimal TCP port, returning `default` for empty or malformed input
    pub const fn parse_port(text: &str, default: u16) -> u16 {
        let bytes = text.as_bytes();
        if bytes.is_empty() || bytes.len() > 5 {
            return default;
        }

        let mut value: u32 = 0;
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            if !byte.is_ascii_digit() {
                return default;
            }
            value = value * 10 + (byte - b'0') as u32;
            i += 1;
        }

        if value == 0 || value > u16::MAX as u32 {
            default
        } else {
            value as u16
        }
    }
}

/// Resource that could not be brought up or torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Button GPIO line and its interrupt
    Button,
    /// WiFi link
    Transport,
}

/// Failure at the socket or WiFi driver boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// TCP connection to the gateway failed
    Connect,
    /// Writing the command record failed or was short
    Write,
    /// Closing the TCP connection failed
    Close,
    /// WiFi driver rejected a configuration, start or connect request
    Link,
}

/// Error types for the remote switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchError {
    /// A resource could not be created or configured
    InitializationFailure(Resource),
    /// A resource could not be released
    DeinitializationFailure(Resource),
    /// Operation attempted before the first successful connection
    NotInitialized,
    /// No queue slot became free within the send wait
    QueueFullOrTimeout,
    /// The connection state read false when a send was attempted
    SendTimeout,
    /// The connection state lock could not be taken in time
    StateLockTimeout,
    /// Socket or driver error
    TransportFailure(TransportError),
}

impl From<TransportError> for SwitchError {
    fn from(e: TransportError) -> Self {
        SwitchError::TransportFailure(e)
    }
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchError::InitializationFailure(resource) => {
                write!(f, "initialization of {:?} failed", resource)
            }
            SwitchError::DeinitializationFailure(resource) => {
                write!(f, "de-initialization of {:?} failed", resource)
            }
            SwitchError::NotInitialized => f.write_str("client was never connected"),
            SwitchError::QueueFullOrTimeout => f.write_str("command queue full"),
            SwitchError::SendTimeout => f.write_str("not connected to the gateway"),
            SwitchError::StateLockTimeout => f.write_str("connection state lock timed out"),
            SwitchError::TransportFailure(e) => write!(f, "transport failure: {:?}", e),
        }
    }
}

/// Log the outcome of an operation and hand the result back unchanged
pub fn log_result<T>(operation: &str, result: Result<T, SwitchError>) -> Result<T, SwitchError> {
    match &result {
        Ok(_) => log::info!("{} ok", operation),
        Err(e) => log::error!("{} failed: {}", operation, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::config::{parse_ipv4, parse_port};
    use super::*;
    use core::net::Ipv4Addr;

    #[test]
    fn parses_dotted_ipv4() {
        assert_eq!(parse_ipv4("192.168.4.1"), Some(Ipv4Addr::new(192, 168, 4, 1)));
        assert_eq!(parse_ipv4("0.0.0.0"), Some(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn rejects_malformed_ipv4() {
        assert_eq!(parse_ipv4(""), None);
        assert_eq!(parse_ipv4("192.168.4"), None);
        assert_eq!(parse_ipv4("192.168.4.1.7"), None);
        assert_eq!(parse_ipv4("192.168..1"), None);
        assert_eq!(parse_ipv4("256.1.1.1"), None);
        assert_eq!(parse_ipv4("10.0.0.x"), None);
    }

    #[test]
    fn port_falls_back_to_default() {
        assert_eq!(parse_port("8080", 5000), 8080);
        assert_eq!(parse_port("", 5000), 5000);
        assert_eq!(parse_port("0", 5000), 5000);
        assert_eq!(parse_port("65536", 5000), 5000);
        assert_eq!(parse_port("80a", 5000), 5000);
    }

    #[test]
    fn transport_errors_convert() {
        let e: SwitchError = TransportError::Write.into();
        assert_eq!(e, SwitchError::TransportFailure(TransportError::Write));
    }

    #[test]
    fn log_result_passes_value_through() {
        assert_eq!(log_result("probe", Ok::<u8, SwitchError>(3)), Ok(3));
        assert_eq!(
            log_result::<()>("probe", Err(SwitchError::SendTimeout)),
            Err(SwitchError::SendTimeout)
        );
    }
}
