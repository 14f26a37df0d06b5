//! Connection lifecycle state machine
//!
//! Pure transition logic for the WiFi/TCP client. The lifecycle runner in
//! `remote_switch` feeds it events and executes the returned actions.

use crate::transport::{GatewayEndpoint, NetInfo};
use core::net::SocketAddrV4;
use heapless::Vec;

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client not started, or stopped
    Disconnected,
    /// WiFi bring-up requested, waiting for an address
    Connecting,
    /// Address acquired, session worker running
    Connected,
}

/// Events driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    // Client requests
    ClientStarted,
    ClientStopped,

    // Link events
    LinkUp,
    LinkDown,
    AddressAcquired(NetInfo),

    // The driver rejected a connect request
    ConnectFailed,
}

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// Keep the current state
    Stay,
    /// Move to a new state
    Transition(ConnectionState),
}

/// Errors the state machine reports but does not act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// Address acquired but no gateway endpoint could be derived from it
    NoGatewayEndpoint,
}

/// Actions the lifecycle runner performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Ask the link to (re)associate now
    RequestConnection,
    /// Ask the link to associate again after the reconnect interval
    RetryConnectionLater,
    /// Drop the association
    Disconnect,
    /// Update the connection state guard
    MarkConnected(bool),
    /// Start (or restart) the session worker against the endpoint
    StartSession(SocketAddrV4),
    /// Cancel the session worker
    StopSession,
    /// Drop every queued command
    DrainQueue,
    /// Report an error
    LogError(LifecycleError),
}

/// Actions produced by one event
pub type Actions = Vec<Action, 4>;

pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    previous_state: Option<ConnectionState>,
    gateway: GatewayEndpoint,
    session_endpoint: Option<SocketAddrV4>,
    reconnect_count: u32,
}

impl ConnectionStateMachine {
    pub const fn new(gateway: GatewayEndpoint) -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            previous_state: None,
            gateway,
            session_endpoint: None,
            reconnect_count: 0,
        }
    }

    pub fn get_current_state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn get_previous_state(&self) -> Option<ConnectionState> {
        self.previous_state
    }

    /// Number of link losses recovered from while connected
    pub fn get_reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    /// Endpoint of the running session
    pub fn session_endpoint(&self) -> Option<SocketAddrV4> {
        self.session_endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Apply `event` and return what has to happen because of it
    pub fn handle_event(&mut self, event: SystemEvent) -> Actions {
        let mut actions = Actions::new();
        let transition = self.get_state_transition(self.current_state, event, &mut actions);

        if let StateTransition::Transition(new_state) = transition {
            self.transition_to_state(new_state);
        }

        actions
    }

    fn transition_to_state(&mut self, new_state: ConnectionState) {
        if new_state != self.current_state {
            match new_state {
                ConnectionState::Connected => log::info!("[STATE] Connected to gateway network"),
                ConnectionState::Connecting => log::info!("[STATE] Connecting..."),
                ConnectionState::Disconnected => log::info!("[STATE] Disconnected"),
            }

            self.previous_state = Some(self.current_state);
            self.current_state = new_state;
        }
    }

    /// Transition table. Pushes the transition's effects into `actions`.
    fn get_state_transition(
        &mut self,
        current_state: ConnectionState,
        event: SystemEvent,
        actions: &mut Actions,
    ) -> StateTransition {
        // Capacity 4 covers the longest effect list below
        let mut push = |action| {
            let _ = actions.push(action);
        };

        match (current_state, event) {
            // Client start
            (ConnectionState::Disconnected, SystemEvent::ClientStarted) => {
                push(Action::RequestConnection);
                StateTransition::Transition(ConnectionState::Connecting)
            }
            (_, SystemEvent::ClientStarted) => StateTransition::Stay,

            // Client stop
            (ConnectionState::Disconnected, SystemEvent::ClientStopped) => StateTransition::Stay,
            (_, SystemEvent::ClientStopped) => {
                push(Action::MarkConnected(false));
                push(Action::StopSession);
                push(Action::DrainQueue);
                push(Action::Disconnect);
                self.session_endpoint = None;
                StateTransition::Transition(ConnectionState::Disconnected)
            }

            // Bring-up in progress
            (ConnectionState::Connecting, SystemEvent::LinkUp) => StateTransition::Stay,
            (ConnectionState::Connecting, SystemEvent::LinkDown) => {
                push(Action::RequestConnection);
                StateTransition::Stay
            }
            (ConnectionState::Connecting, SystemEvent::ConnectFailed) => {
                push(Action::RetryConnectionLater);
                StateTransition::Stay
            }
            (ConnectionState::Connecting, SystemEvent::AddressAcquired(net)) => {
                match self.gateway.resolve(&net) {
                    Some(endpoint) => {
                        push(Action::MarkConnected(true));
                        push(Action::StartSession(endpoint));
                        self.session_endpoint = Some(endpoint);
                        StateTransition::Transition(ConnectionState::Connected)
                    }
                    None => {
                        push(Action::LogError(LifecycleError::NoGatewayEndpoint));
                        StateTransition::Stay
                    }
                }
            }

            // Connected
            (ConnectionState::Connected, SystemEvent::LinkDown) => {
                push(Action::MarkConnected(false));
                push(Action::StopSession);
                push(Action::DrainQueue);
                push(Action::RequestConnection);
                self.session_endpoint = None;
                self.reconnect_count = self.reconnect_count.wrapping_add(1);
                StateTransition::Transition(ConnectionState::Connecting)
            }
            (ConnectionState::Connected, SystemEvent::AddressAcquired(net)) => {
                // Lease renewal; restart the session only if the gateway moved
                if let Some(endpoint) = self.gateway.resolve(&net) {
                    if self.session_endpoint != Some(endpoint) {
                        push(Action::StartSession(endpoint));
                        self.session_endpoint = Some(endpoint);
                    }
                }
                StateTransition::Stay
            }

            // Link noise after a stop, or while already connected
            _ => StateTransition::Stay,
        }
    }
}
