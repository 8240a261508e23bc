pub mod bluetooth;
pub mod keyboard;
pub mod logging;
