//! Network session worker
//!
//! Drains the command queue while the client is connected. Each command gets
//! its own TCP connection: connect, one write of the wire record, close.
//! Failures are logged and the command is dropped.
//!
//! A session is started and cancelled through [`SessionControl`]. Cancelling
//! races a stop signal against the drain loop, so a send in progress is
//! dropped at its current await point and its socket aborted. Commands that
//! were in flight at that moment are not delivered.

use crate::TransportError;
use crate::command::Command;
use crate::queue::CommandQueue;
use crate::transport::GatewaySocket;
use core::cell::Cell;
use core::net::SocketAddrV4;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Request to the session worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start draining towards the gateway, replacing a running session
    Start(SocketAddrV4),
    /// Cancel the running session
    Stop,
}

/// Start/stop channel between the lifecycle and the session worker
pub struct SessionControl {
    command: Signal<CriticalSectionRawMutex, SessionCommand>,
    active: critical_section::Mutex<Cell<bool>>,
}

impl SessionControl {
    pub const fn new() -> Self {
        Self {
            command: Signal::new(),
            active: critical_section::Mutex::new(Cell::new(false)),
        }
    }

    pub fn start(&self, endpoint: SocketAddrV4) {
        self.command.signal(SessionCommand::Start(endpoint));
    }

    pub fn stop(&self) {
        self.command.signal(SessionCommand::Stop);
    }

    /// Whether a session is currently draining the queue
    pub fn is_active(&self) -> bool {
        critical_section::with(|cs| self.active.borrow(cs).get())
    }

    fn set_active(&self, active: bool) {
        critical_section::with(|cs| self.active.borrow(cs).set(active));
    }

    async fn wait_command(&self) -> SessionCommand {
        self.command.wait().await
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// One session against one gateway endpoint
pub struct SessionWorker<'a, S: GatewaySocket> {
    socket: &'a mut S,
    endpoint: SocketAddrV4,
    in_flight: Option<Command>,
    delivered: u32,
    dropped: u32,
}

impl<'a, S: GatewaySocket> SessionWorker<'a, S> {
    pub fn new(socket: &'a mut S, endpoint: SocketAddrV4) -> Self {
        Self {
            socket,
            endpoint,
            in_flight: None,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Send one command on a fresh connection
    pub async fn deliver(&mut self, command: Command) -> Result<(), TransportError> {
        if let Err(e) = self.socket.connect(self.endpoint).await {
            self.socket.abort();
            return Err(e);
        }

        let written = self.socket.write(&command.to_wire()).await;

        // Close even after a failed write, the connection is never reused
        let closed = self.socket.close().await;
        if closed.is_err() {
            self.socket.abort();
        }

        written.and(closed)
    }

    /// Deliver queued commands until the future is dropped
    pub async fn drain(&mut self, queue: &CommandQueue) {
        loop {
            let command = queue.pop().await;
            self.in_flight = Some(command);

            match self.deliver(command).await {
                Ok(()) => {
                    self.delivered = self.delivered.wrapping_add(1);
                    log::info!("[TCP] Sent {:?} to {}", command, self.endpoint);
                }
                Err(e) => {
                    self.dropped = self.dropped.wrapping_add(1);
                    log::error!("[TCP] Dropped {:?}: {:?}", command, e);
                }
            }

            self.in_flight = None;
        }
    }

    /// Give up on the command interrupted by a cancellation, if any
    pub fn abandon(&mut self) -> Option<Command> {
        let command = self.in_flight.take()?;
        self.socket.abort();
        self.dropped = self.dropped.wrapping_add(1);
        log::warn!("[TCP] Abandoned in-flight {:?}", command);
        Some(command)
    }
}

/// Serve sessions forever: idle until started, drain until stopped
pub async fn run_sessions<S: GatewaySocket>(
    control: &SessionControl,
    queue: &CommandQueue,
    socket: &mut S,
) {
    let mut next: Option<SessionCommand> = None;

    loop {
        let command = match next.take() {
            Some(command) => command,
            None => control.wait_command().await,
        };

        let SessionCommand::Start(endpoint) = command else {
            // Nothing running to stop
            continue;
        };

        log::info!("[TCP] Session started, gateway {}", endpoint);
        control.set_active(true);

        let mut worker = SessionWorker::new(&mut *socket, endpoint);
        let interrupt = match select(control.wait_command(), worker.drain(queue)).await {
            Either::First(command) => command,
            Either::Second(()) => SessionCommand::Stop,
        };

        worker.abandon();
        control.set_active(false);
        log::info!(
            "[TCP] Session ended: {} delivered, {} dropped",
            worker.delivered(),
            worker.dropped()
        );

        if let SessionCommand::Start(_) = interrupt {
            next = Some(interrupt);
        }
    }
}
