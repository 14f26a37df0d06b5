//! Light commands and the button-to-command encoding policy
//!
//! A command is a fixed 3-byte record `[actuator, action, level]` sent as a
//! single write per TCP connection.

use crate::button::{ButtonId, ButtonPress};
use crate::config;

/// Size of the wire record
pub const COMMAND_WIRE_SIZE: usize = 3;

/// Lights driven by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActuatorId {
    Led0 = 0,
}

impl ActuatorId {
    #[cfg(test)]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ActuatorId::Led0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandAction {
    /// Flip the light on or off
    Toggle = 0,
    /// Set PWM brightness to `level` percent
    SetLevel = 1,
}

impl CommandAction {
    #[cfg(test)]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(CommandAction::Toggle),
            1 => Some(CommandAction::SetLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub actuator: ActuatorId,
    pub action: CommandAction,
    /// Brightness in percent, only present for `SetLevel`
    pub level: Option<u8>,
}

impl Command {
    pub const fn toggle(actuator: ActuatorId) -> Self {
        Self {
            actuator,
            action: CommandAction::Toggle,
            level: None,
        }
    }

    /// Level command, clamped to 100 %
    pub const fn set_level(actuator: ActuatorId, level: u8) -> Self {
        let level = if level > 100 { 100 } else { level };
        Self {
            actuator,
            action: CommandAction::SetLevel,
            level: Some(level),
        }
    }

    pub fn to_wire(&self) -> [u8; COMMAND_WIRE_SIZE] {
        [
            self.actuator as u8,
            self.action as u8,
            self.level.unwrap_or(0),
        ]
    }

    /// Parse a wire record as the gateway sees it
    #[cfg(test)]
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != COMMAND_WIRE_SIZE {
            return None;
        }

        let actuator = ActuatorId::from_wire(bytes[0])?;
        match CommandAction::from_wire(bytes[1])? {
            CommandAction::Toggle => Some(Command::toggle(actuator)),
            CommandAction::SetLevel if bytes[2] <= 100 => {
                Some(Command::set_level(actuator, bytes[2]))
            }
            CommandAction::SetLevel => None,
        }
    }
}

/// Brightness cycling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    pub min: u8,
    pub max: u8,
}

impl LevelPolicy {
    pub const DEFAULT: LevelPolicy = LevelPolicy {
        min: config::MIN_LEVEL,
        max: config::MAX_LEVEL,
    };

    /// Brightness for the `count`-th press of a level-cycling button.
    ///
    /// Each press adds one step on top of `min`, cycling every
    /// `LEVEL_STEPS` presses; anything above `max` wraps back to `min`.
    pub fn level_for_press(&self, count: u32) -> u8 {
        let level = (count % config::LEVEL_STEPS) * config::LEVEL_STEP as u32 + self.min as u32;
        if level > self.max as u32 {
            self.min
        } else {
            level as u8
        }
    }
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What a button does when pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonBinding {
    Toggle(ActuatorId),
    LevelCycle(ActuatorId),
}

/// Button-to-binding table
#[derive(Debug, Clone, Copy)]
pub struct Keymap {
    bindings: &'static [(ButtonId, ButtonBinding)],
}

impl Keymap {
    /// Button 0 toggles LED 0, button 1 cycles its brightness
    pub const DEFAULT: Keymap = Keymap::new(&[
        (ButtonId::Button0, ButtonBinding::Toggle(ActuatorId::Led0)),
        (ButtonId::Button1, ButtonBinding::LevelCycle(ActuatorId::Led0)),
    ]);

    pub const fn new(bindings: &'static [(ButtonId, ButtonBinding)]) -> Self {
        Self { bindings }
    }

    pub fn binding(&self, id: ButtonId) -> Option<ButtonBinding> {
        self.bindings
            .iter()
            .find(|(button, _)| *button == id)
            .map(|(_, binding)| *binding)
    }

    /// Encode a press, `None` when the button has no binding
    pub fn encode(&self, press: ButtonPress, levels: &LevelPolicy) -> Option<Command> {
        match self.binding(press.button)? {
            ButtonBinding::Toggle(actuator) => Some(Command::toggle(actuator)),
            ButtonBinding::LevelCycle(actuator) => Some(Command::set_level(
                actuator,
                levels.level_for_press(press.count),
            )),
        }
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_cycle_over_nine_presses() {
        let levels = LevelPolicy::DEFAULT;
        let cycle: [u8; 9] = core::array::from_fn(|i| levels.level_for_press(i as u32 + 1));
        assert_eq!(cycle, [30, 40, 50, 60, 70, 80, 90, 100, 20]);
    }

    #[test]
    fn level_cycle_repeats() {
        let levels = LevelPolicy::DEFAULT;
        for n in 1..=90u32 {
            assert_eq!(levels.level_for_press(n), levels.level_for_press(n + 9));
        }
    }

    #[test]
    fn level_above_max_wraps_to_min() {
        let levels = LevelPolicy { min: 20, max: 70 };
        assert_eq!(levels.level_for_press(5), 70);
        assert_eq!(levels.level_for_press(6), 20);
        assert_eq!(levels.level_for_press(8), 20);
    }

    #[test]
    fn default_keymap_bindings() {
        let keymap = Keymap::DEFAULT;
        let levels = LevelPolicy::DEFAULT;

        let toggle = keymap
            .encode(ButtonPress { button: ButtonId::Button0, count: 7 }, &levels)
            .unwrap();
        assert_eq!(toggle, Command::toggle(ActuatorId::Led0));

        let level = keymap
            .encode(ButtonPress { button: ButtonId::Button1, count: 2 }, &levels)
            .unwrap();
        assert_eq!(level, Command::set_level(ActuatorId::Led0, 40));
    }

    #[test]
    fn unbound_button_encodes_nothing() {
        let keymap = Keymap::new(&[(ButtonId::Button0, ButtonBinding::Toggle(ActuatorId::Led0))]);
        let press = ButtonPress { button: ButtonId::Button1, count: 1 };
        assert_eq!(keymap.encode(press, &LevelPolicy::DEFAULT), None);
    }

    #[test]
    fn wire_record_layout() {
        assert_eq!(Command::toggle(ActuatorId::Led0).to_wire(), [0, 0, 0]);
        assert_eq!(Command::set_level(ActuatorId::Led0, 60).to_wire(), [0, 1, 60]);
    }

    #[test]
    fn set_level_is_clamped() {
        assert_eq!(Command::set_level(ActuatorId::Led0, 180).level, Some(100));
    }

    #[test]
    fn from_wire_rejects_bad_records() {
        assert_eq!(Command::from_wire(&[0, 0]), None);
        assert_eq!(Command::from_wire(&[0, 0, 0, 0]), None);
        assert_eq!(Command::from_wire(&[7, 0, 0]), None);
        assert_eq!(Command::from_wire(&[0, 9, 0]), None);
        assert_eq!(Command::from_wire(&[0, 1, 101]), None);
        assert_eq!(
            Command::from_wire(&[0, 1, 90]),
            Some(Command::set_level(ActuatorId::Led0, 90))
        );
    }
}
