//! Remote switch context
//!
//! Owns everything the button path, the lifecycle supervisor and the session
//! worker share. The firmware keeps one instance in a `static` and runs
//! `run_lifecycle`, `run_session` and one `run_dispatch` per button as
//! executor tasks; the GPIO interrupt handler calls `on_button_edge`.

use crate::bridge::PressBridge;
use crate::button::{Button, ButtonDriver, ButtonId};
use crate::command::{Command, Keymap, LevelPolicy};
use crate::guard::ConnectionGuard;
use crate::queue::CommandQueue;
use crate::session::{self, SessionControl};
use crate::state_machine::{Action, ConnectionState, ConnectionStateMachine, SystemEvent};
use crate::transport::{GatewayEndpoint, GatewaySocket, LinkControl, LinkEvent, WifiCredentials};
use crate::{Resource, SwitchError, TransportError, config};
use core::cell::Cell;
use embassy_futures::select::{Either3, select3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer, with_timeout};

/// Pending client start/stop requests
const REQUEST_DEPTH: usize = 4;

/// Runtime parameters, all fixed at build time in the firmware
#[derive(Debug, Clone, Copy)]
pub struct SwitchConfig {
    pub credentials: WifiCredentials,
    pub gateway: GatewayEndpoint,
    pub keymap: Keymap,
    pub levels: LevelPolicy,
    /// Minimum spacing of accepted button edges
    pub debounce: Duration,
    /// Wait for a free queue slot
    pub send_wait: Duration,
    /// Wait for the connection state lock
    pub state_lock_wait: Duration,
    /// Guard polling interval while `start_client` blocks
    pub connect_poll_interval: Duration,
    /// Delay before retrying a rejected connect request
    pub reconnect_interval: Duration,
}

impl SwitchConfig {
    pub const fn from_build_env() -> Self {
        Self {
            credentials: WifiCredentials::from_build_env(),
            gateway: GatewayEndpoint::from_build_env(),
            keymap: Keymap::DEFAULT,
            levels: LevelPolicy::DEFAULT,
            debounce: Duration::from_millis(config::BUTTON_DEBOUNCE_MS),
            send_wait: Duration::from_millis(config::SEND_WAIT_MS),
            state_lock_wait: Duration::from_millis(config::STATE_LOCK_WAIT_MS),
            connect_poll_interval: Duration::from_millis(config::CONNECT_POLL_INTERVAL_MS),
            reconnect_interval: Duration::from_millis(config::WIFI_RECONNECT_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientRequest {
    Start,
    Stop,
}

pub struct RemoteSwitch {
    config: SwitchConfig,
    buttons: [Button; config::BUTTON_COUNT],
    bridge: PressBridge,
    guard: ConnectionGuard,
    queue: CommandQueue,
    session: SessionControl,
    requests: Channel<CriticalSectionRawMutex, ClientRequest, REQUEST_DEPTH>,
    /// Raised by the lifecycle once a `Start` request has been applied
    started: Signal<CriticalSectionRawMutex, ()>,
    initialized: critical_section::Mutex<Cell<bool>>,
    registered: critical_section::Mutex<Cell<[bool; config::BUTTON_COUNT]>>,
}

impl RemoteSwitch {
    pub const fn new(config: SwitchConfig) -> Self {
        Self {
            config,
            buttons: [
                Button::new(ButtonId::Button0, config.debounce),
                Button::new(ButtonId::Button1, config.debounce),
            ],
            bridge: PressBridge::new(),
            guard: ConnectionGuard::new(config.state_lock_wait),
            queue: CommandQueue::new(),
            session: SessionControl::new(),
            requests: Channel::new(),
            started: Signal::new(),
            initialized: critical_section::Mutex::new(Cell::new(false)),
            registered: critical_section::Mutex::new(Cell::new([false; config::BUTTON_COUNT])),
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn button(&self, id: ButtonId) -> &Button {
        &self.buttons[id.index()]
    }

    pub fn bridge(&self) -> &PressBridge {
        &self.bridge
    }

    pub fn guard(&self) -> &ConnectionGuard {
        &self.guard
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn session(&self) -> &SessionControl {
        &self.session
    }

    /// Whether `start_client` has seen the first connection since the last stop
    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.initialized.borrow(cs).get())
    }

    fn set_initialized(&self, initialized: bool) {
        critical_section::with(|cs| self.initialized.borrow(cs).set(initialized));
    }

    /// Whether edges of `id` are currently accepted
    pub fn is_registered(&self, id: ButtonId) -> bool {
        critical_section::with(|cs| self.registered.borrow(cs).get()[id.index()])
    }

    fn set_registered(&self, id: ButtonId, registered: bool) {
        critical_section::with(|cs| {
            let cell = self.registered.borrow(cs);
            let mut mask = cell.get();
            mask[id.index()] = registered;
            cell.set(mask);
        });
    }

    // ========================================================================
    // Buttons
    // ========================================================================

    /// Configure the button line and start accepting its edges
    pub fn init_button<D: ButtonDriver>(
        &self,
        driver: &mut D,
        id: ButtonId,
    ) -> Result<(), SwitchError> {
        self.button(id).reset();
        self.bridge.clear(id);

        driver.init(id).map_err(|e| {
            log::error!("[BUTTON] {:?} init on GPIO{} failed: {}", id, id.gpio(), e);
            SwitchError::InitializationFailure(Resource::Button)
        })?;

        self.set_registered(id, true);
        log::info!("[BUTTON] {:?} ready on GPIO{}", id, id.gpio());
        Ok(())
    }

    /// Release the button line, then stop the client
    pub async fn deinit_button<D: ButtonDriver>(
        &self,
        driver: &mut D,
        id: ButtonId,
    ) -> Result<(), SwitchError> {
        self.set_registered(id, false);
        self.bridge.clear(id);

        driver.deinit(id).map_err(|e| {
            log::error!("[BUTTON] {:?} deinit failed: {}", id, e);
            SwitchError::DeinitializationFailure(Resource::Button)
        })?;
        log::info!("[BUTTON] {:?} released", id);

        self.stop_client().await
    }

    /// Interrupt entry for an edge on `id`. `pressed` is the line level after
    /// the edge. Never blocks.
    pub fn on_button_edge(&self, id: ButtonId, pressed: bool, now: Instant) {
        if !self.is_registered(id) {
            return;
        }

        let button = self.button(id);
        if pressed {
            if let Some(press) = button.record_press(now) {
                self.bridge.notify(press);
            }
        } else {
            button.record_release();
        }
    }

    /// Wait for the next press of `id` and forward its command.
    ///
    /// Returns the forwarded command, or `None` when the button is unbound.
    pub async fn dispatch_once(&self, id: ButtonId) -> Result<Option<Command>, SwitchError> {
        let press = self.bridge.wait(id).await;

        let Some(command) = self.config.keymap.encode(press, &self.config.levels) else {
            log::warn!("[BUTTON] {:?} has no binding, press #{} dropped", id, press.count);
            return Ok(None);
        };

        log::debug!("[BUTTON] {:?} press #{} -> {:?}", id, press.count, command);
        match self.send(command).await {
            Ok(()) => Ok(Some(command)),
            Err(e) => {
                log::error!("[BUTTON] {:?} command not forwarded: {}", id, e);
                Err(e)
            }
        }
    }

    /// Dispatch task body for one button
    pub async fn run_dispatch(&self, id: ButtonId) {
        log::info!("[BUTTON] Dispatch task for {:?} started", id);
        loop {
            // Failures are logged by dispatch_once and never retried
            let _ = self.dispatch_once(id).await;
        }
    }

    // ========================================================================
    // Client
    // ========================================================================

    /// Bring the link up and wait until the gateway is reachable
    pub async fn start_client(&self) -> Result<(), SwitchError> {
        self.started.reset();
        self.request(ClientRequest::Start)
            .await
            .map_err(|_| SwitchError::InitializationFailure(Resource::Transport))?;

        // The guard only means something once every earlier stop is applied
        self.started.wait().await;

        log::info!("[SWITCH] Waiting for connection...");
        while !self.guard.read().await {
            Timer::after(self.config.connect_poll_interval).await;
        }

        self.set_initialized(true);
        log::info!("[SWITCH] Client started");
        Ok(())
    }

    /// Shut the link down. Sends are refused until the next `start_client`.
    pub async fn stop_client(&self) -> Result<(), SwitchError> {
        self.set_initialized(false);
        self.request(ClientRequest::Stop)
            .await
            .map_err(|_| SwitchError::DeinitializationFailure(Resource::Transport))?;
        log::info!("[SWITCH] Client stop requested");
        Ok(())
    }

    async fn request(&self, request: ClientRequest) -> Result<(), SwitchError> {
        with_timeout(self.config.state_lock_wait, self.requests.send(request))
            .await
            .map_err(|_| {
                log::error!("[SWITCH] Lifecycle did not take {:?} request", request);
                SwitchError::StateLockTimeout
            })
    }

    /// Queue a command for the gateway
    pub async fn send(&self, command: Command) -> Result<(), SwitchError> {
        if !self.is_initialized() {
            return Err(SwitchError::NotInitialized);
        }
        if !self.guard.read().await {
            return Err(SwitchError::SendTimeout);
        }
        self.queue.push(command, self.config.send_wait).await
    }

    // ========================================================================
    // Executor task bodies
    // ========================================================================

    /// Lifecycle supervisor: feeds client requests and link events through the
    /// state machine and carries out the resulting actions
    pub async fn run_lifecycle<L: LinkControl>(&self, link: &mut L) {
        let mut machine = ConnectionStateMachine::new(self.config.gateway);
        let mut retry_at: Option<Instant> = None;

        log::info!("[STATE] Lifecycle supervisor started");

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => Timer::at(at).await,
                    None => core::future::pending::<()>().await,
                }
            };

            let outcome = select3(self.requests.receive(), link.next_event(), retry).await;

            let event = match outcome {
                Either3::First(ClientRequest::Start) => SystemEvent::ClientStarted,
                Either3::First(ClientRequest::Stop) => {
                    // A pending retry belongs to the stopped client run
                    retry_at = None;
                    SystemEvent::ClientStopped
                }
                Either3::Second(LinkEvent::LinkUp) => SystemEvent::LinkUp,
                Either3::Second(LinkEvent::LinkDown) => SystemEvent::LinkDown,
                Either3::Second(LinkEvent::AddressAcquired(net)) => {
                    log::info!("[WIFI] Got IP {}, router {:?}", net.address, net.gateway);
                    SystemEvent::AddressAcquired(net)
                }
                Either3::Third(()) => {
                    retry_at = None;
                    if machine.get_current_state() != ConnectionState::Connecting {
                        continue;
                    }
                    log::info!("[WIFI] Retrying connection");
                    match self.connect_link(link).await {
                        Ok(()) => continue,
                        Err(_) => SystemEvent::ConnectFailed,
                    }
                }
            };

            if let Some(at) = self.apply(&mut machine, link, event).await {
                retry_at = Some(at);
            }
            if event == SystemEvent::ClientStarted {
                self.started.signal(());
            }
        }
    }

    /// Run one event, and any follow-up events, through the state machine.
    /// Returns the deadline of a scheduled connect retry.
    async fn apply<L: LinkControl>(
        &self,
        machine: &mut ConnectionStateMachine,
        link: &mut L,
        event: SystemEvent,
    ) -> Option<Instant> {
        let mut next = Some(event);
        let mut retry_at = None;

        while let Some(event) = next.take() {
            log::debug!("[STATE] {:?} in {:?}", event, machine.get_current_state());

            for action in machine.handle_event(event) {
                match action {
                    Action::RequestConnection => {
                        if self.connect_link(link).await.is_err() {
                            next = Some(SystemEvent::ConnectFailed);
                        }
                    }
                    Action::RetryConnectionLater => {
                        log::warn!(
                            "[WIFI] Retrying in {} ms",
                            self.config.reconnect_interval.as_millis()
                        );
                        retry_at = Some(Instant::now() + self.config.reconnect_interval);
                    }
                    Action::Disconnect => {
                        if let Err(e) = link.disconnect().await {
                            log::error!("[WIFI] Disconnect failed: {:?}", e);
                        }
                    }
                    Action::MarkConnected(connected) => {
                        if let Err(e) = self.guard.write(connected).await {
                            log::error!("[STATE] Connection state not updated: {}", e);
                        }
                    }
                    Action::StartSession(endpoint) => self.session.start(endpoint),
                    Action::StopSession => self.session.stop(),
                    Action::DrainQueue => {
                        let dropped = self.queue.drain();
                        if dropped > 0 {
                            log::warn!("[TCP] Dropped {} queued commands", dropped);
                        }
                    }
                    Action::LogError(e) => log::error!("[STATE] {:?}", e),
                }
            }
        }

        retry_at
    }

    async fn connect_link<L: LinkControl>(&self, link: &mut L) -> Result<(), TransportError> {
        log::info!("[WIFI] Connecting to {}", self.config.credentials.ssid);
        link.connect(&self.config.credentials).await.inspect_err(|e| {
            log::error!("[WIFI] Connect request rejected: {:?}", e);
        })
    }

    /// Session worker host loop
    pub async fn run_session<S: GatewaySocket>(&self, socket: &mut S) {
        session::run_sessions(&self.session, &self.queue, socket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::ButtonState;
    use crate::command::{ActuatorId, ButtonBinding};
    use embassy_futures::block_on;

    #[derive(Default)]
    struct MockDriver {
        active: Vec<ButtonId>,
        fail: bool,
    }

    impl ButtonDriver for MockDriver {
        fn init(&mut self, id: ButtonId) -> Result<(), SwitchError> {
            if self.fail {
                return Err(SwitchError::InitializationFailure(Resource::Button));
            }
            self.active.push(id);
            Ok(())
        }

        fn deinit(&mut self, id: ButtonId) -> Result<(), SwitchError> {
            if self.fail {
                return Err(SwitchError::DeinitializationFailure(Resource::Button));
            }
            self.active.retain(|active| *active != id);
            Ok(())
        }
    }

    fn test_config() -> SwitchConfig {
        SwitchConfig {
            gateway: GatewayEndpoint::DhcpRouter { port: 5000 },
            send_wait: Duration::from_millis(20),
            state_lock_wait: Duration::from_millis(20),
            connect_poll_interval: Duration::from_millis(1),
            reconnect_interval: Duration::from_millis(10),
            ..SwitchConfig::from_build_env()
        }
    }

    fn ms(millis: u64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn send_before_start_is_refused() {
        let switch = RemoteSwitch::new(test_config());
        let result = block_on(switch.send(Command::toggle(ActuatorId::Led0)));
        assert_eq!(result, Err(SwitchError::NotInitialized));
        assert!(switch.queue().is_empty());
    }

    #[test]
    fn send_while_disconnected_never_queues() {
        let switch = RemoteSwitch::new(test_config());
        switch.set_initialized(true);

        let result = block_on(switch.send(Command::toggle(ActuatorId::Led0)));
        assert_eq!(result, Err(SwitchError::SendTimeout));
        assert!(switch.queue().is_empty());
    }

    #[test]
    fn send_while_connected_queues() {
        let switch = RemoteSwitch::new(test_config());
        switch.set_initialized(true);

        block_on(async {
            switch.guard().write(true).await.unwrap();
            switch
                .send(Command::set_level(ActuatorId::Led0, 40))
                .await
                .unwrap();
        });
        assert_eq!(switch.queue().len(), 1);
    }

    #[test]
    fn full_queue_reports_timeout() {
        let switch = RemoteSwitch::new(test_config());
        switch.set_initialized(true);

        block_on(async {
            switch.guard().write(true).await.unwrap();
            for _ in 0..switch.queue().capacity() {
                switch.send(Command::toggle(ActuatorId::Led0)).await.unwrap();
            }
            assert_eq!(
                switch.send(Command::toggle(ActuatorId::Led0)).await,
                Err(SwitchError::QueueFullOrTimeout)
            );
        });
    }

    #[test]
    fn edges_are_ignored_until_the_button_is_initialized() {
        let switch = RemoteSwitch::new(test_config());
        switch.on_button_edge(ButtonId::Button0, true, ms(1000));
        assert!(!switch.bridge().is_pending(ButtonId::Button0));

        let mut driver = MockDriver::default();
        switch.init_button(&mut driver, ButtonId::Button0).unwrap();
        assert_eq!(driver.active, vec![ButtonId::Button0]);

        switch.on_button_edge(ButtonId::Button0, true, ms(2000));
        assert!(switch.bridge().is_pending(ButtonId::Button0));
        assert_eq!(switch.button(ButtonId::Button0).state(), ButtonState::Pressed);

        switch.on_button_edge(ButtonId::Button0, false, ms(2100));
        assert_eq!(switch.button(ButtonId::Button0).state(), ButtonState::NotPressed);
    }

    #[test]
    fn failed_button_init_is_reported() {
        let switch = RemoteSwitch::new(test_config());
        let mut driver = MockDriver {
            fail: true,
            ..Default::default()
        };
        assert_eq!(
            switch.init_button(&mut driver, ButtonId::Button1),
            Err(SwitchError::InitializationFailure(Resource::Button))
        );
        assert!(!switch.is_registered(ButtonId::Button1));
    }

    #[test]
    fn deinit_drops_pending_press_and_stops_client() {
        let switch = RemoteSwitch::new(test_config());
        let mut driver = MockDriver::default();
        switch.init_button(&mut driver, ButtonId::Button0).unwrap();
        switch.set_initialized(true);
        switch.on_button_edge(ButtonId::Button0, true, ms(1000));

        block_on(switch.deinit_button(&mut driver, ButtonId::Button0)).unwrap();

        assert!(driver.active.is_empty());
        assert!(!switch.bridge().is_pending(ButtonId::Button0));
        assert!(!switch.is_registered(ButtonId::Button0));
        assert!(!switch.is_initialized());
        assert!(matches!(switch.requests.try_receive(), Ok(ClientRequest::Stop)));
    }

    #[test]
    fn dispatch_forwards_press_with_its_own_identity() {
        let switch = RemoteSwitch::new(test_config());
        let mut driver = MockDriver::default();
        switch.init_button(&mut driver, ButtonId::Button0).unwrap();
        switch.init_button(&mut driver, ButtonId::Button1).unwrap();
        switch.set_initialized(true);

        block_on(async {
            switch.guard().write(true).await.unwrap();

            switch.on_button_edge(ButtonId::Button1, true, ms(1000));
            switch.on_button_edge(ButtonId::Button0, true, ms(1001));

            assert_eq!(
                switch.dispatch_once(ButtonId::Button0).await,
                Ok(Some(Command::toggle(ActuatorId::Led0)))
            );
            assert_eq!(
                switch.dispatch_once(ButtonId::Button1).await,
                Ok(Some(Command::set_level(ActuatorId::Led0, 30)))
            );
        });
        assert_eq!(switch.queue().len(), 2);
    }

    #[test]
    fn dispatch_failure_is_returned() {
        let switch = RemoteSwitch::new(test_config());
        let mut driver = MockDriver::default();
        switch.init_button(&mut driver, ButtonId::Button0).unwrap();

        switch.on_button_edge(ButtonId::Button0, true, ms(1000));
        let result = block_on(switch.dispatch_once(ButtonId::Button0));
        assert_eq!(result, Err(SwitchError::NotInitialized));
        assert!(switch.queue().is_empty());
    }

    #[test]
    fn unbound_button_press_is_dropped() {
        const TOGGLE_ONLY: Keymap =
            Keymap::new(&[(ButtonId::Button0, ButtonBinding::Toggle(ActuatorId::Led0))]);
        let switch = RemoteSwitch::new(SwitchConfig {
            keymap: TOGGLE_ONLY,
            ..test_config()
        });
        let mut driver = MockDriver::default();
        switch.init_button(&mut driver, ButtonId::Button1).unwrap();
        switch.set_initialized(true);

        block_on(async {
            switch.guard().write(true).await.unwrap();
            switch.on_button_edge(ButtonId::Button1, true, ms(1000));
            assert_eq!(switch.dispatch_once(ButtonId::Button1).await, Ok(None));
        });
        assert!(switch.queue().is_empty());
    }

    #[test]
    fn stop_client_refuses_further_sends() {
        let switch = RemoteSwitch::new(test_config());
        switch.set_initialized(true);

        block_on(async {
            switch.guard().write(true).await.unwrap();
            switch.stop_client().await.unwrap();
            assert_eq!(
                switch.send(Command::toggle(ActuatorId::Led0)).await,
                Err(SwitchError::NotInitialized)
            );
        });
    }

    #[test]
    fn requests_time_out_when_nobody_listens() {
        let switch = RemoteSwitch::new(test_config());
        block_on(async {
            for _ in 0..REQUEST_DEPTH {
                switch.stop_client().await.unwrap();
            }
            assert_eq!(
                switch.stop_client().await,
                Err(SwitchError::DeinitializationFailure(Resource::Transport))
            );
        });
    }
}
