//! Button data model
//!
//! Each physical button has an identity, a pressed/not-pressed state and a
//! press counter. The interrupt path records edges here (debounced by minimum
//! spacing) before the press is handed to the bridge.

use crate::{SwitchError, config};
use core::cell::Cell;
use critical_section::Mutex;
use embassy_time::{Duration, Instant};

/// Buttons wired on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonId {
    Button0,
    Button1,
}

impl ButtonId {
    /// Every button, in index order
    pub const ALL: [ButtonId; config::BUTTON_COUNT] = [ButtonId::Button0, ButtonId::Button1];

    pub const fn index(self) -> usize {
        match self {
            ButtonId::Button0 => 0,
            ButtonId::Button1 => 1,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ButtonId::Button0),
            1 => Some(ButtonId::Button1),
            _ => None,
        }
    }

    /// GPIO number the button is wired to
    pub const fn gpio(self) -> u8 {
        match self {
            ButtonId::Button0 => config::BUTTON_0_GPIO,
            ButtonId::Button1 => config::BUTTON_1_GPIO,
        }
    }
}

/// Logical button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    NotPressed,
    Pressed,
}

/// One accepted press, as carried by the interrupt bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPress {
    pub button: ButtonId,
    /// Press counter value after this press, starting at 1
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Tracking {
    state: ButtonState,
    count: u32,
    last_edge: Option<Instant>,
}

impl Tracking {
    const fn new() -> Self {
        Self {
            state: ButtonState::NotPressed,
            count: 0,
            last_edge: None,
        }
    }
}

/// Button state shared between the interrupt path and the dispatch task
pub struct Button {
    id: ButtonId,
    debounce: Duration,
    tracking: Mutex<Cell<Tracking>>,
}

impl Button {
    pub const fn new(id: ButtonId, debounce: Duration) -> Self {
        Self {
            id,
            debounce,
            tracking: Mutex::new(Cell::new(Tracking::new())),
        }
    }

    pub fn id(&self) -> ButtonId {
        self.id
    }

    pub fn state(&self) -> ButtonState {
        critical_section::with(|cs| self.tracking.borrow(cs).get().state)
    }

    pub fn press_count(&self) -> u32 {
        critical_section::with(|cs| self.tracking.borrow(cs).get().count)
    }

    /// Record a press edge seen at `now`.
    ///
    /// Edges closer than the debounce interval to the last accepted edge are
    /// bounces and return `None`. Safe to call from interrupt context.
    pub fn record_press(&self, now: Instant) -> Option<ButtonPress> {
        critical_section::with(|cs| {
            let cell = self.tracking.borrow(cs);
            let mut tracking = cell.get();

            if let Some(last) = tracking.last_edge {
                match now.checked_duration_since(last) {
                    Some(elapsed) if elapsed >= self.debounce => {}
                    _ => return None,
                }
            }

            tracking.state = ButtonState::Pressed;
            tracking.count = tracking.count.wrapping_add(1);
            tracking.last_edge = Some(now);
            cell.set(tracking);

            Some(ButtonPress {
                button: self.id,
                count: tracking.count,
            })
        })
    }

    /// Record the release edge
    pub fn record_release(&self) {
        critical_section::with(|cs| {
            let cell = self.tracking.borrow(cs);
            let mut tracking = cell.get();
            tracking.state = ButtonState::NotPressed;
            cell.set(tracking);
        });
    }

    /// Forget state, counter and debounce history
    pub fn reset(&self) {
        critical_section::with(|cs| self.tracking.borrow(cs).set(Tracking::new()));
    }
}

/// Hardware side of a button line: pin, pull and edge interrupt configuration
pub trait ButtonDriver {
    /// Configure the line and enable its edge interrupt
    fn init(&mut self, id: ButtonId) -> Result<(), SwitchError>;

    /// Disable the interrupt and release the line
    fn deinit(&mut self, id: ButtonId) -> Result<(), SwitchError>;
}
