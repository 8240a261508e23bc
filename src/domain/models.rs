use std::fmt;

/// Digital buttons reported by the controller.
///
/// Declaration order is the enumeration order used everywhere events are
/// produced, so it must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    B,
    A,
    Y,
    X,
    R,
    ZR,
    Plus,
    RS,
    DpadDown,
    DpadRight,
    DpadLeft,
    DpadUp,
    L,
    ZL,
    Minus,
    LS,
    Home,
    Round,
    GripRight,
    GripLeft,
    Capture,
}

impl Button {
    pub const COUNT: usize = 21;

    pub const ALL: [Button; Button::COUNT] = [
        Button::B,
        Button::A,
        Button::Y,
        Button::X,
        Button::R,
        Button::ZR,
        Button::Plus,
        Button::RS,
        Button::DpadDown,
        Button::DpadRight,
        Button::DpadLeft,
        Button::DpadUp,
        Button::L,
        Button::ZL,
        Button::Minus,
        Button::LS,
        Button::Home,
        Button::Round,
        Button::GripRight,
        Button::GripLeft,
        Button::Capture,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Short label as printed on the controller
    pub fn label(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::A => "A",
            Self::Y => "Y",
            Self::X => "X",
            Self::R => "R",
            Self::ZR => "ZR",
            Self::Plus => "+",
            Self::RS => "RS",
            Self::DpadDown => "DOWN",
            Self::DpadRight => "RIGHT",
            Self::DpadLeft => "LEFT",
            Self::DpadUp => "UP",
            Self::L => "L",
            Self::ZL => "ZL",
            Self::Minus => "-",
            Self::LS => "LS",
            Self::Home => "HOME",
            Self::Round => "ROUND",
            Self::GripRight => "GR",
            Self::GripLeft => "GL",
            Self::Capture => "CAPT",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of pressed buttons, one bit per [`Button`] index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ButtonSet(u32);

impl ButtonSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, button: Button) {
        self.0 |= 1 << button.index();
    }

    pub fn contains(&self, button: Button) -> bool {
        self.0 & (1 << button.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Pressed buttons in enumeration order
    pub fn iter(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(move |b| self.contains(*b))
    }
}

impl FromIterator<Button> for ButtonSet {
    fn from_iter<I: IntoIterator<Item = Button>>(iter: I) -> Self {
        let mut set = Self::empty();
        for button in iter {
            set.insert(button);
        }
        set
    }
}

/// Raw 12-bit stick position. Both axes lie in `[0, STICK_MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StickPosition {
    pub x: u16,
    pub y: u16,
}

pub const STICK_MAX: u16 = 4095;
pub const STICK_CENTER: u16 = 2048;

impl StickPosition {
    pub const CENTERED: Self = Self {
        x: STICK_CENTER,
        y: STICK_CENTER,
    };

    pub fn new(x: u16, y: u16) -> Self {
        Self {
            x: x.min(STICK_MAX),
            y: y.min(STICK_MAX),
        }
    }

    pub fn normalized_x(&self) -> f32 {
        normalize_axis(self.x)
    }

    pub fn normalized_y(&self) -> f32 {
        normalize_axis(self.y)
    }
}

impl Default for StickPosition {
    fn default() -> Self {
        Self::CENTERED
    }
}

/// Map a raw axis value into `[-1.0, 1.0]`.
pub fn normalize_axis(raw: u16) -> f32 {
    ((raw as f32 - STICK_CENTER as f32) / STICK_CENTER as f32).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stick {
    Left,
    Right,
}

impl Stick {
    pub const ALL: [Stick; 2] = [Stick::Left, Stick::Right];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One decoded input report.
///
/// Snapshots are never edited; each notification produces a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub buttons: ButtonSet,
    pub left_stick: StickPosition,
    pub right_stick: StickPosition,
}

impl ControllerState {
    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.contains(button)
    }

    pub fn stick(&self, stick: Stick) -> StickPosition {
        match stick {
            Stick::Left => self.left_stick,
            Stick::Right => self.right_stick,
        }
    }

    pub fn pressed_labels(&self) -> Vec<&'static str> {
        self.buttons.iter().map(Button::label).collect()
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = self.pressed_labels();
        let buttons = if labels.is_empty() {
            "-".to_string()
        } else {
            labels.join(",")
        };
        let pct = |v: f32| (v * 100.0) as i32;
        write!(
            f,
            "BTN:[{}] L:({:+},{:+}) R:({:+},{:+})",
            buttons,
            pct(self.left_stick.normalized_x()),
            pct(self.left_stick.normalized_y()),
            pct(self.right_stick.normalized_x()),
            pct(self.right_stick.normalized_y()),
        )
    }
}

/// Anything that can be bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputSource {
    Button(Button),
    Stick(Stick, Direction),
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Button(button) => write!(f, "{}", button),
            Self::Stick(stick, direction) => write!(f, "{:?}Stick{:?}", stick, direction),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub source: InputSource,
    pub transition: Transition,
}

impl ButtonEvent {
    pub fn pressed(source: InputSource) -> Self {
        Self {
            source,
            transition: Transition::Pressed,
        }
    }

    pub fn released(source: InputSource) -> Self {
        Self {
            source,
            transition: Transition::Released,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Subscribed,
    Streaming,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Device picked out of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub name: String,
    pub address: String,
    pub signal_strength: Option<i16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ConnectionState(ConnectionState),
    DeviceFound(ScannedDevice),
    DeviceNotFound,
    /// Connection failures used up the retry budget
    RetriesExhausted { failures: u32 },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_order_matches_index() {
        for (i, button) in Button::ALL.iter().enumerate() {
            assert_eq!(button.index(), i);
        }
    }

    #[test]
    fn test_button_set_iterates_in_enumeration_order() {
        let set: ButtonSet = [Button::Capture, Button::A, Button::DpadUp]
            .into_iter()
            .collect();
        let order: Vec<Button> = set.iter().collect();
        assert_eq!(order, vec![Button::A, Button::DpadUp, Button::Capture]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_normalize_axis_bounds() {
        assert_eq!(normalize_axis(STICK_CENTER), 0.0);
        assert_eq!(normalize_axis(0), -1.0);
        assert!(normalize_axis(STICK_MAX) > 0.99);
        assert!(normalize_axis(STICK_MAX) <= 1.0);
    }

    #[test]
    fn test_state_summary() {
        let state = ControllerState {
            buttons: [Button::A, Button::R].into_iter().collect(),
            left_stick: StickPosition::new(0, STICK_CENTER),
            right_stick: StickPosition::CENTERED,
        };
        assert_eq!(state.to_string(), "BTN:[A,R] L:(-100,+0) R:(+0,+0)");
        assert_eq!(ControllerState::default().to_string(), "BTN:[-] L:(+0,+0) R:(+0,+0)");
    }
}
