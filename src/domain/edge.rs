//! Edge detection
//!
//! Turns successive absolute [`ControllerState`] snapshots into discrete
//! press / release events. Stick axes are discretized into three zones around
//! the center so they behave like digital buttons.

use crate::domain::models::{
    normalize_axis, Button, ButtonEvent, ControllerState, Direction, InputSource, Stick,
    StickPosition,
};

/// Dead zone used when nothing is configured, as a fraction of full deflection
pub const DEFAULT_DEAD_ZONE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisZone {
    Negative,
    Neutral,
    Positive,
}

impl AxisZone {
    /// Zones are open intervals beyond `±dead_zone`, so they never overlap.
    pub fn classify(raw: u16, dead_zone: f32) -> Self {
        let value = normalize_axis(raw);
        if value > dead_zone {
            Self::Positive
        } else if value < -dead_zone {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn raw(self, position: StickPosition) -> u16 {
        match self {
            Self::X => position.x,
            Self::Y => position.y,
        }
    }

    fn direction(self, zone: AxisZone) -> Option<Direction> {
        match (self, zone) {
            (_, AxisZone::Neutral) => None,
            (Self::X, AxisZone::Negative) => Some(Direction::Left),
            (Self::X, AxisZone::Positive) => Some(Direction::Right),
            (Self::Y, AxisZone::Negative) => Some(Direction::Down),
            (Self::Y, AxisZone::Positive) => Some(Direction::Up),
        }
    }
}

/// Direction an axis currently points to, if outside the dead zone
fn axis_direction(position: StickPosition, axis: Axis, dead_zone: f32) -> Option<Direction> {
    axis.direction(AxisZone::classify(axis.raw(position), dead_zone))
}

/// Diff two snapshots.
///
/// Digital buttons come first in enumeration order, then the left stick
/// (X before Y), then the right stick. A zone change releases the old
/// direction before pressing the new one.
pub fn detect_edges(
    previous: &ControllerState,
    current: &ControllerState,
    dead_zone: f32,
) -> Vec<ButtonEvent> {
    let mut events = Vec::new();

    for button in Button::ALL {
        let source = InputSource::Button(button);
        match (previous.is_pressed(button), current.is_pressed(button)) {
            (false, true) => events.push(ButtonEvent::pressed(source)),
            (true, false) => events.push(ButtonEvent::released(source)),
            _ => {}
        }
    }

    for stick in Stick::ALL {
        for axis in [Axis::X, Axis::Y] {
            let before = axis_direction(previous.stick(stick), axis, dead_zone);
            let after = axis_direction(current.stick(stick), axis, dead_zone);
            if before == after {
                continue;
            }
            if let Some(direction) = before {
                events.push(ButtonEvent::released(InputSource::Stick(stick, direction)));
            }
            if let Some(direction) = after {
                events.push(ButtonEvent::pressed(InputSource::Stick(stick, direction)));
            }
        }
    }

    events
}

/// Keeps the baseline snapshot between reports
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    baseline: ControllerState,
    dead_zone: f32,
}

impl EdgeDetector {
    pub fn new(dead_zone: f32) -> Self {
        Self {
            baseline: ControllerState::default(),
            dead_zone,
        }
    }

    /// Diff against the baseline, then make `next` the new baseline
    pub fn update(&mut self, next: ControllerState) -> Vec<ButtonEvent> {
        let events = detect_edges(&self.baseline, &next, self.dead_zone);
        self.baseline = next;
        events
    }

    pub fn baseline(&self) -> &ControllerState {
        &self.baseline
    }

    /// Forget the baseline. Used once every key has been released.
    pub fn reset(&mut self) {
        self.baseline = ControllerState::default();
    }
}
