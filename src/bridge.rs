//! Interrupt-to-task hand-off
//!
//! One binary signal per button. The interrupt path stores the press in the
//! signal of the button that fired; the dispatch task of that button is the
//! only waiter. Signalling never blocks and never queues: a press that lands
//! before the previous one was consumed replaces it.

use crate::button::{ButtonId, ButtonPress};
use crate::config;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Binary signal carrying the latest press of one button
pub type PressSignal = Signal<CriticalSectionRawMutex, ButtonPress>;

pub struct PressBridge {
    signals: [PressSignal; config::BUTTON_COUNT],
}

impl PressBridge {
    pub const fn new() -> Self {
        Self {
            signals: [const { Signal::new() }; config::BUTTON_COUNT],
        }
    }

    /// Wake the dispatch task of `press.button`. Callable from interrupt context.
    pub fn notify(&self, press: ButtonPress) {
        self.signals[press.button.index()].signal(press);
    }

    /// Wait for the next press of `id`
    pub async fn wait(&self, id: ButtonId) -> ButtonPress {
        self.signals[id.index()].wait().await
    }

    /// Whether a press of `id` is waiting to be consumed
    pub fn is_pending(&self, id: ButtonId) -> bool {
        self.signals[id.index()].signaled()
    }

    /// Drop an unconsumed press of `id`
    pub fn clear(&self, id: ButtonId) {
        self.signals[id.index()].reset();
    }
}

impl Default for PressBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    fn press(button: ButtonId, count: u32) -> ButtonPress {
        ButtonPress { button, count }
    }

    #[test]
    fn waiter_receives_the_press_payload() {
        let bridge = PressBridge::new();
        bridge.notify(press(ButtonId::Button0, 1));

        assert_eq!(block_on(bridge.wait(ButtonId::Button0)), press(ButtonId::Button0, 1));
        assert!(!bridge.is_pending(ButtonId::Button0));
    }

    #[test]
    fn burst_collapses_to_latest_press() {
        let bridge = PressBridge::new();
        bridge.notify(press(ButtonId::Button1, 4));
        bridge.notify(press(ButtonId::Button1, 5));
        bridge.notify(press(ButtonId::Button1, 6));

        assert_eq!(block_on(bridge.wait(ButtonId::Button1)).count, 6);
        assert!(!bridge.is_pending(ButtonId::Button1));
    }

    #[test]
    fn buttons_do_not_share_a_signal() {
        let bridge = PressBridge::new();
        bridge.notify(press(ButtonId::Button0, 1));
        bridge.notify(press(ButtonId::Button1, 9));

        assert_eq!(block_on(bridge.wait(ButtonId::Button0)).button, ButtonId::Button0);
        assert_eq!(block_on(bridge.wait(ButtonId::Button1)).button, ButtonId::Button1);
    }

    #[test]
    fn clear_drops_pending_press() {
        let bridge = PressBridge::new();
        bridge.notify(press(ButtonId::Button0, 1));
        bridge.clear(ButtonId::Button0);
        assert!(!bridge.is_pending(ButtonId::Button0));
    }
}
