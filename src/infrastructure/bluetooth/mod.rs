//! Bluetooth Module
//!
//! Provides BLE communication with the Switch 2 Pro Controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BridgeService                         │
//! │  (State machine driver, report pipeline, safety release) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Transport  │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Device  │  │ - btleplug │  │ - UUIDs  │
//! │   matching│  │ - GATT     │  │ - Report │
//! │           │  │   notify   │  │   decode │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Report layout, identifiers and decoding
//! - [`scanner`] - Advertisement matching and scan timeout
//! - [`transport`] - The BLE seam the service is written against
//! - [`connection`] - btleplug implementation of the transport
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use connection::BtleplugTransport;
pub use service::{BridgeCommand, BridgeConfig, BridgeHandle, BridgeService};
