//! Keyboard injection
//!
//! The dispatcher only sees [`KeyboardSink`]. On Windows keys are injected
//! with `SendInput`; everywhere else the bridge falls back to logging them.

use crate::domain::dispatcher::KeyboardSink;
use crate::domain::mapping::Key;
use tracing::{debug, info};

/// Sink that only reports what it would have pressed
#[derive(Debug, Default)]
pub struct LoggingKeyboard;

impl KeyboardSink for LoggingKeyboard {
    fn key_down(&mut self, key: Key) -> anyhow::Result<()> {
        info!("Key Down: {}", key);
        Ok(())
    }

    fn key_up(&mut self, key: Key) -> anyhow::Result<()> {
        info!("Key Up: {}", key);
        Ok(())
    }
}

/// Pick the injection backend for this platform
pub fn platform_keyboard(dry_run: bool) -> Box<dyn KeyboardSink + Send> {
    if dry_run {
        debug!("Dry run: key events are logged only");
        return Box::new(LoggingKeyboard);
    }

    #[cfg(windows)]
    {
        Box::new(send_input::InputSimulator::new())
    }

    #[cfg(not(windows))]
    {
        tracing::warn!("No keyboard injection backend on this platform, logging key events");
        Box::new(LoggingKeyboard)
    }
}

#[cfg(windows)]
pub mod send_input {
    use crate::domain::dispatcher::KeyboardSink;
    use crate::domain::mapping::Key;
    use tracing::debug;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP,
        VIRTUAL_KEY, VK_DOWN, VK_LEFT, VK_RIGHT, VK_UP,
    };

    pub struct InputSimulator;

    impl InputSimulator {
        pub fn new() -> Self {
            Self
        }

        fn send(&self, key: Key, flags: KEYBD_EVENT_FLAGS) -> anyhow::Result<()> {
            let input = INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: virtual_key(key),
                        wScan: 0,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            };

            let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
            if sent == 0 {
                anyhow::bail!(
                    "SendInput rejected key {}: {}",
                    key,
                    std::io::Error::last_os_error()
                );
            }
            Ok(())
        }
    }

    impl KeyboardSink for InputSimulator {
        fn key_down(&mut self, key: Key) -> anyhow::Result<()> {
            debug!("Key Down: {}", key);
            self.send(key, KEYBD_EVENT_FLAGS::default())
        }

        fn key_up(&mut self, key: Key) -> anyhow::Result<()> {
            debug!("Key Up: {}", key);
            self.send(key, KEYEVENTF_KEYUP)
        }
    }

    /// Letters and digits share their ASCII code with the virtual key code
    fn virtual_key(key: Key) -> VIRTUAL_KEY {
        match key {
            Key::Up => VK_UP,
            Key::Down => VK_DOWN,
            Key::Left => VK_LEFT,
            Key::Right => VK_RIGHT,
            other => VIRTUAL_KEY(other.symbol().as_bytes()[0].to_ascii_uppercase() as u16),
        }
    }
}
