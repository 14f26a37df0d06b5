//! Button GPIO lines of the ESP32-C3 board
//!
//! Inputs are pulled down and interrupt on both edges. The configured inputs
//! live in a `static ButtonLines` so the GPIO interrupt handler can reach them.

use crate::button::{ButtonDriver, ButtonId};
use crate::{RemoteSwitch, Resource, SwitchError, config};
use core::cell::RefCell;
use critical_section::Mutex;
use embassy_time::Instant;
use esp_hal::gpio::{Event, Input, InputConfig, InputPin, Pull};

type Line = Mutex<RefCell<Option<Input<'static>>>>;

/// Inputs shared with the GPIO interrupt handler
pub struct ButtonLines {
    lines: [Line; config::BUTTON_COUNT],
}

impl ButtonLines {
    pub const fn new() -> Self {
        Self {
            lines: [const { Mutex::new(RefCell::new(None)) }; config::BUTTON_COUNT],
        }
    }

    /// Service pending edges. Call from the GPIO interrupt handler.
    pub fn handle_interrupt(&self, switch: &RemoteSwitch) {
        let now = Instant::now();

        for id in ButtonId::ALL {
            let level = critical_section::with(|cs| {
                let mut line = self.lines[id.index()].borrow_ref_mut(cs);
                let input = line.as_mut()?;
                if !input.is_interrupt_set() {
                    return None;
                }
                input.clear_interrupt();
                Some(input.is_high())
            });

            if let Some(pressed) = level {
                switch.on_button_edge(id, pressed, now);
            }
        }
    }

    fn set_listening(&self, id: ButtonId, listening: bool) -> bool {
        critical_section::with(|cs| {
            let mut line = self.lines[id.index()].borrow_ref_mut(cs);
            let Some(input) = line.as_mut() else {
                return false;
            };
            if listening {
                input.listen(Event::AnyEdge);
            } else {
                input.unlisten();
                input.clear_interrupt();
            }
            true
        })
    }
}

impl Default for ButtonLines {
    fn default() -> Self {
        Self::new()
    }
}

/// `ButtonDriver` over the board's two button pins
pub struct EspButtons {
    lines: &'static ButtonLines,
}

impl EspButtons {
    /// Take the pins for button 0 and button 1
    pub fn new(
        lines: &'static ButtonLines,
        button0: impl InputPin + 'static,
        button1: impl InputPin + 'static,
    ) -> Self {
        let input_config = InputConfig::default().with_pull(Pull::Down);
        let button0 = Input::new(button0, input_config);
        let button1 = Input::new(button1, input_config);

        critical_section::with(|cs| {
            lines.lines[ButtonId::Button0.index()]
                .borrow_ref_mut(cs)
                .replace(button0);
            lines.lines[ButtonId::Button1.index()]
                .borrow_ref_mut(cs)
                .replace(button1);
        });

        Self { lines }
    }
}

impl ButtonDriver for EspButtons {
    fn init(&mut self, id: ButtonId) -> Result<(), SwitchError> {
        if self.lines.set_listening(id, true) {
            Ok(())
        } else {
            Err(SwitchError::InitializationFailure(Resource::Button))
        }
    }

    fn deinit(&mut self, id: ButtonId) -> Result<(), SwitchError> {
        if self.lines.set_listening(id, false) {
            Ok(())
        } else {
            Err(SwitchError::DeinitializationFailure(Resource::Button))
        }
    }
}
