//! Switch 2 Pro Controller to keyboard bridge.
//!
//! Reads input reports from the controller over BLE and turns button and
//! stick transitions into synthetic key presses.

pub mod domain;
pub mod error;
pub mod infrastructure;
