use crate::domain::mapping::{Key, MappingTable};
use crate::domain::models::{ButtonEvent, Transition};
use crate::error::{BridgeError, BridgeResult};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Receiver of synthetic key presses
pub trait KeyboardSink {
    fn key_down(&mut self, key: Key) -> anyhow::Result<()>;
    fn key_up(&mut self, key: Key) -> anyhow::Result<()>;
}

impl<K: KeyboardSink + ?Sized> KeyboardSink for Box<K> {
    fn key_down(&mut self, key: Key) -> anyhow::Result<()> {
        (**self).key_down(key)
    }

    fn key_up(&mut self, key: Key) -> anyhow::Result<()> {
        (**self).key_up(key)
    }
}

/// Resolves input events to keys and drives the keyboard sink.
///
/// Every key sent down is tracked until it is sent up again, so a key is
/// never pressed twice in a row and [`InputDispatcher::release_all`] can lift
/// everything that is still held.
pub struct InputDispatcher<K> {
    table: MappingTable,
    keyboard: K,
    down: BTreeSet<Key>,
}

impl<K: KeyboardSink> InputDispatcher<K> {
    pub fn new(table: MappingTable, keyboard: K) -> Self {
        Self {
            table,
            keyboard,
            down: BTreeSet::new(),
        }
    }

    pub fn dispatch(&mut self, event: ButtonEvent) -> BridgeResult<()> {
        let Some(key) = self.table.lookup(event.source) else {
            trace!("No binding for {}", event.source);
            return Ok(());
        };

        match event.transition {
            Transition::Pressed => {
                if self.down.contains(&key) {
                    trace!("{} already down", key);
                    return Ok(());
                }
                self.keyboard
                    .key_down(key)
                    .map_err(|e| BridgeError::Keyboard(e.to_string()))?;
                self.down.insert(key);
            }
            Transition::Released => {
                if !self.down.contains(&key) {
                    trace!("{} not down, ignoring release", key);
                    return Ok(());
                }
                // Marker stays on failure so the next sweep retries the key.
                self.keyboard
                    .key_up(key)
                    .map_err(|e| BridgeError::Keyboard(e.to_string()))?;
                self.down.remove(&key);
            }
        }
        Ok(())
    }

    /// Send key-up for every key still held. Returns how many were released.
    /// Keys whose key-up fails stay tracked for the next sweep.
    pub fn release_all(&mut self) -> usize {
        if self.down.is_empty() {
            return 0;
        }
        debug!("Releasing {} held key(s)", self.down.len());

        let keyboard = &mut self.keyboard;
        let before = self.down.len();
        self.down.retain(|key| match keyboard.key_up(*key) {
            Ok(()) => false,
            Err(e) => {
                warn!("Failed to release {}: {}", key, e);
                true
            }
        });
        before - self.down.len()
    }

    pub fn pressed_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.down.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Button, Direction, InputSource, Stick};
    use crate::domain::dispatcher::testing::{KeyAction, RecordingKeyboard};

    fn dispatcher() -> (InputDispatcher<RecordingKeyboard>, RecordingKeyboard) {
        let keyboard = RecordingKeyboard::default();
        let table = MappingTable::default_bindings().unwrap();
        (InputDispatcher::new(table, keyboard.clone()), keyboard)
    }

    fn press(button: Button) -> ButtonEvent {
        ButtonEvent::pressed(InputSource::Button(button))
    }

    fn release(button: Button) -> ButtonEvent {
        ButtonEvent::released(InputSource::Button(button))
    }

    #[test]
    fn test_press_and_release() {
        let (mut dispatcher, keyboard) = dispatcher();
        dispatcher.dispatch(press(Button::A)).unwrap();
        dispatcher.dispatch(release(Button::A)).unwrap();

        assert_eq!(
            keyboard.actions(),
            vec![KeyAction::Down(Key::Z), KeyAction::Up(Key::Z)]
        );
        assert_eq!(dispatcher.pressed_keys().count(), 0);
    }

    #[test]
    fn test_repeated_press_sends_one_key_down() {
        let (mut dispatcher, keyboard) = dispatcher();
        for _ in 0..4 {
            dispatcher.dispatch(press(Button::B)).unwrap();
        }
        dispatcher.dispatch(release(Button::B)).unwrap();
        dispatcher.dispatch(release(Button::B)).unwrap();
        dispatcher.dispatch(press(Button::B)).unwrap();

        assert_eq!(
            keyboard.actions(),
            vec![
                KeyAction::Down(Key::X),
                KeyAction::Up(Key::X),
                KeyAction::Down(Key::X),
            ]
        );
    }

    #[test]
    fn test_unbound_source_is_dropped() {
        let (mut dispatcher, keyboard) = dispatcher();
        dispatcher.dispatch(press(Button::Round)).unwrap();
        dispatcher.dispatch(release(Button::Round)).unwrap();
        assert!(keyboard.actions().is_empty());
    }

    #[test]
    fn test_release_all_lifts_exactly_held_keys() {
        let (mut dispatcher, keyboard) = dispatcher();
        dispatcher.dispatch(press(Button::A)).unwrap();
        dispatcher.dispatch(press(Button::R)).unwrap();
        dispatcher.dispatch(press(Button::Y)).unwrap();
        dispatcher.dispatch(release(Button::Y)).unwrap();
        dispatcher
            .dispatch(ButtonEvent::pressed(InputSource::Stick(Stick::Left, Direction::Up)))
            .unwrap();
        let before = keyboard.actions().len();

        assert_eq!(dispatcher.release_all(), 3);

        let mut ups: Vec<KeyAction> = keyboard.actions()[before..].to_vec();
        ups.sort_by_key(|a| match a {
            KeyAction::Down(k) | KeyAction::Up(k) => *k,
        });
        assert_eq!(
            ups,
            vec![
                KeyAction::Up(Key::E),
                KeyAction::Up(Key::W),
                KeyAction::Up(Key::Z)
            ]
        );
        assert_eq!(dispatcher.release_all(), 0);
    }

    #[test]
    fn test_failed_key_down_is_not_tracked() {
        let (mut dispatcher, keyboard) = dispatcher();
        keyboard.set_fail_key_down(true);
        assert!(matches!(
            dispatcher.dispatch(press(Button::A)),
            Err(BridgeError::Keyboard(_))
        ));
        assert_eq!(dispatcher.release_all(), 0);

        keyboard.set_fail_key_down(false);
        dispatcher.dispatch(press(Button::A)).unwrap();
        assert_eq!(keyboard.actions(), vec![KeyAction::Down(Key::Z)]);
    }

    #[test]
    fn test_failed_release_is_retried_by_next_sweep() {
        let (mut dispatcher, keyboard) = dispatcher();
        dispatcher.dispatch(press(Button::A)).unwrap();
        dispatcher.dispatch(press(Button::R)).unwrap();

        keyboard.fail_next_key_up(Key::Z);
        assert_eq!(dispatcher.release_all(), 1);
        assert_eq!(dispatcher.pressed_keys().collect::<Vec<_>>(), vec![Key::Z]);

        assert_eq!(dispatcher.release_all(), 1);
        assert_eq!(dispatcher.pressed_keys().count(), 0);
        assert_eq!(
            keyboard.actions(),
            vec![
                KeyAction::Down(Key::Z),
                KeyAction::Down(Key::E),
                KeyAction::Up(Key::E),
                KeyAction::Up(Key::Z),
            ]
        );
    }
}
