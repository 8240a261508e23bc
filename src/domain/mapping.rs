//! Button → key bindings
//!
//! The table is fixed for the lifetime of the process and checked once at
//! startup. Lookups index straight into arrays keyed by the source enums.

use crate::domain::models::{Button, Direction, InputSource, Stick};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Keyboard keys the bridge can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    A,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    O,
    P,
    Q,
    S,
    V,
    W,
    X,
    Z,
    Num0,
    Num1,
    Num3,
    Num9,
    Up,
    Down,
    Left,
    Right,
}

impl Key {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::C => "c",
            Self::D => "d",
            Self::E => "e",
            Self::F => "f",
            Self::G => "g",
            Self::H => "h",
            Self::I => "i",
            Self::J => "j",
            Self::K => "k",
            Self::L => "l",
            Self::M => "m",
            Self::O => "o",
            Self::P => "p",
            Self::Q => "q",
            Self::S => "s",
            Self::V => "v",
            Self::W => "w",
            Self::X => "x",
            Self::Z => "z",
            Self::Num0 => "0",
            Self::Num1 => "1",
            Self::Num3 => "3",
            Self::Num9 => "9",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    pub source: InputSource,
    pub target: Key,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("key '{key}' is bound to both {first} and {second}")]
    DuplicateKey {
        key: Key,
        first: InputSource,
        second: InputSource,
    },
    #[error("{0} has no key bound")]
    UnboundStickDirection(InputSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    buttons: [Option<Key>; Button::COUNT],
    sticks: [[Option<Key>; 4]; 2],
}

impl MappingTable {
    /// Build and validate a table from entries
    pub fn from_entries(entries: &[MappingEntry]) -> Result<Self, MappingError> {
        let mut table = Self {
            buttons: [None; Button::COUNT],
            sticks: [[None; 4]; 2],
        };
        for entry in entries {
            *table.slot_mut(entry.source) = Some(entry.target);
        }
        table.validate()?;
        Ok(table)
    }

    /// Bindings expected by the emulator's keyboard profile
    pub fn default_bindings() -> Result<Self, MappingError> {
        Self::from_entries(DEFAULT_BINDINGS)
    }

    pub fn lookup(&self, source: InputSource) -> Option<Key> {
        match source {
            InputSource::Button(button) => self.buttons[button.index()],
            InputSource::Stick(stick, direction) => {
                self.sticks[stick_index(stick)][direction.index()]
            }
        }
    }

    /// All bound entries, buttons first
    pub fn entries(&self) -> Vec<MappingEntry> {
        let buttons = Button::ALL.into_iter().map(InputSource::Button);
        let sticks = Stick::ALL.into_iter().flat_map(|stick| {
            Direction::ALL
                .into_iter()
                .map(move |direction| InputSource::Stick(stick, direction))
        });
        buttons
            .chain(sticks)
            .filter_map(|source| {
                self.lookup(source)
                    .map(|target| MappingEntry { source, target })
            })
            .collect()
    }

    /// One key per source, every stick direction bound
    pub fn validate(&self) -> Result<(), MappingError> {
        let mut seen: HashMap<Key, InputSource> = HashMap::new();
        for entry in self.entries() {
            if let Some(first) = seen.insert(entry.target, entry.source) {
                return Err(MappingError::DuplicateKey {
                    key: entry.target,
                    first,
                    second: entry.source,
                });
            }
        }

        for stick in Stick::ALL {
            for direction in Direction::ALL {
                let source = InputSource::Stick(stick, direction);
                if self.lookup(source).is_none() {
                    return Err(MappingError::UnboundStickDirection(source));
                }
            }
        }
        Ok(())
    }

    fn slot_mut(&mut self, source: InputSource) -> &mut Option<Key> {
        match source {
            InputSource::Button(button) => &mut self.buttons[button.index()],
            InputSource::Stick(stick, direction) => {
                &mut self.sticks[stick_index(stick)][direction.index()]
            }
        }
    }
}

fn stick_index(stick: Stick) -> usize {
    match stick {
        Stick::Left => 0,
        Stick::Right => 1,
    }
}

const fn button(button: Button, target: Key) -> MappingEntry {
    MappingEntry {
        source: InputSource::Button(button),
        target,
    }
}

const fn stick(stick: Stick, direction: Direction, target: Key) -> MappingEntry {
    MappingEntry {
        source: InputSource::Stick(stick, direction),
        target,
    }
}

// Round has no binding.
const DEFAULT_BINDINGS: &[MappingEntry] = &[
    // Face buttons
    button(Button::A, Key::Z),
    button(Button::B, Key::X),
    button(Button::X, Key::C),
    button(Button::Y, Key::V),
    // Shoulders
    button(Button::L, Key::Q),
    button(Button::R, Key::E),
    button(Button::ZL, Key::Num1),
    button(Button::ZR, Key::Num3),
    // System
    button(Button::Plus, Key::P),
    button(Button::Minus, Key::M),
    button(Button::Home, Key::H),
    button(Button::Capture, Key::O),
    // Stick clicks
    button(Button::LS, Key::F),
    button(Button::RS, Key::G),
    // D-pad
    button(Button::DpadUp, Key::Up),
    button(Button::DpadDown, Key::Down),
    button(Button::DpadLeft, Key::Left),
    button(Button::DpadRight, Key::Right),
    // Grips
    button(Button::GripLeft, Key::Num9),
    button(Button::GripRight, Key::Num0),
    // Left stick → WASD
    stick(Stick::Left, Direction::Up, Key::W),
    stick(Stick::Left, Direction::Left, Key::A),
    stick(Stick::Left, Direction::Down, Key::S),
    stick(Stick::Left, Direction::Right, Key::D),
    // Right stick → IJKL
    stick(Stick::Right, Direction::Up, Key::I),
    stick(Stick::Right, Direction::Left, Key::J),
    stick(Stick::Right, Direction::Down, Key::K),
    stick(Stick::Right, Direction::Right, Key::L),
];
