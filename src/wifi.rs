//! WiFi module for ESP32-C3 board
//!
//! Handles WiFi station bring-up using esp-wifi 0.14.1, with the DHCP lease
//! read back from the embassy-net stack

use crate::transport::{LinkControl, LinkEvent, NetInfo, WifiCredentials};
use crate::{TransportError, config};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController};

/// WiFi manager for handling network connectivity with real DHCP
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
    link_up: bool,
    lease: Option<NetInfo>,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self {
            controller,
            stack,
            link_up: false,
            lease: None,
        }
    }

    /// Check if WiFi is connected
    pub fn is_connected(&self) -> bool {
        self.controller.is_connected().unwrap_or(false)
    }

    /// Current DHCP lease, if any
    pub fn lease(&self) -> Option<NetInfo> {
        self.stack.config_v4().map(|config| NetInfo {
            address: config.address.address(),
            gateway: config.gateway,
        })
    }

    /// Compare driver and stack status with the last report.
    /// Updates the remembered state only when an event is returned.
    fn poll_event(&mut self) -> Option<LinkEvent> {
        let associated = self.is_connected();

        if associated != self.link_up {
            self.link_up = associated;
            if associated {
                log::info!("[WIFI] Associated with access point");
                return Some(LinkEvent::LinkUp);
            }
            log::warn!("[WIFI] WiFi connection lost!");
            self.lease = None;
            return Some(LinkEvent::LinkDown);
        }

        if !associated {
            return None;
        }

        let lease = self.lease();
        if lease != self.lease {
            self.lease = lease;
            if let Some(net) = lease {
                return Some(LinkEvent::AddressAcquired(net));
            }
            log::warn!("[DHCP] Lease lost");
        }
        None
    }
}

impl LinkControl for WiFiManager<'_> {
    async fn connect(&mut self, credentials: &WifiCredentials) -> Result<(), TransportError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let client_config = ClientConfiguration {
            ssid: credentials
                .ssid
                .try_into()
                .map_err(|_| TransportError::Link)?,
            password: credentials
                .password
                .try_into()
                .map_err(|_| TransportError::Link)?,
            auth_method,
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|e| {
                log::error!("[WIFI] Configuration rejected: {:?}", e);
                TransportError::Link
            })?;

        if !self.controller.is_started().unwrap_or(false) {
            self.controller.start_async().await.map_err(|e| {
                log::error!("[WIFI] Failed to start radio: {:?}", e);
                TransportError::Link
            })?;
            log::info!("[WIFI] Radio started");
        }

        self.controller.connect_async().await.map_err(|e| {
            log::error!("[WIFI] Association failed: {:?}", e);
            TransportError::Link
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            if let Err(e) = self.controller.disconnect_async().await {
                log::warn!("[WIFI] Disconnect failed: {:?}", e);
            }
        }

        self.link_up = false;
        self.lease = None;

        self.controller.stop_async().await.map_err(|e| {
            log::error!("[WIFI] Failed to stop radio: {:?}", e);
            TransportError::Link
        })?;
        log::info!("[WIFI] Radio stopped");
        Ok(())
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            if let Some(event) = self.poll_event() {
                return event;
            }
            Timer::after(Duration::from_millis(config::WIFI_POLL_INTERVAL_MS)).await;
        }
    }
}
