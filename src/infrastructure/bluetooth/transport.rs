//! BLE transport seam
//!
//! The bridge drives the radio only through [`BleTransport`]. Notifications
//! are handed over on a bounded channel so reports are consumed one at a
//! time, in arrival order, by a single reader.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Raw notification payloads in arrival order. Closed when the link drops.
pub type NotificationReceiver = mpsc::Receiver<Vec<u8>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("scan failed: {0}")]
    Scan(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out after {0} ms")]
    ConnectTimeout(u64),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("device disconnected")]
    Disconnected,

    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}

/// One advertisement seen while scanning
#[derive(Debug, Clone)]
pub struct Advertisement<D> {
    pub device: D,
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    /// Company id → payload
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

#[async_trait]
pub trait BleTransport: Send {
    type Device: Clone + fmt::Debug + Send + Sync + 'static;

    async fn start_scan(&mut self) -> Result<(), TransportError>;

    /// Next advertisement, or `None` once the scan stream has ended
    async fn next_advertisement(
        &mut self,
    ) -> Result<Option<Advertisement<Self::Device>>, TransportError>;

    async fn stop_scan(&mut self) -> Result<(), TransportError>;

    async fn connect(&mut self, device: &Self::Device) -> Result<(), TransportError>;

    /// Enable notifications on `characteristic`
    async fn subscribe(
        &mut self,
        device: &Self::Device,
        characteristic: Uuid,
        capacity: usize,
    ) -> Result<NotificationReceiver, TransportError>;

    async fn disconnect(&mut self, device: &Self::Device) -> Result<(), TransportError>;
}
