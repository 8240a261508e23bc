//! BLE Connection Module
//!
//! [`BleTransport`] on top of btleplug: adapter discovery, scanning,
//! GATT access and notification forwarding.

use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleTransport, NotificationReceiver, TransportError,
};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Attempts at enabling notifications before giving up
const SUBSCRIBE_ATTEMPTS: u32 = 3;
const SUBSCRIBE_RETRY_DELAY_MS: u64 = 500;

pub struct BtleplugTransport {
    adapter: Adapter,
    scan_events: Option<EventStream>,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Use the first Bluetooth adapter of the host
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            scan_events: None,
            forwarder: None,
        })
    }

    async fn advertisement(
        adapter: &Adapter,
        id: &PeripheralId,
    ) -> Result<Option<Advertisement<Peripheral>>, TransportError> {
        let peripheral = adapter.peripheral(id).await?;
        let Some(props) = peripheral.properties().await? else {
            return Ok(None);
        };

        Ok(Some(Advertisement {
            device: peripheral,
            address: props.address.to_string(),
            local_name: props.local_name,
            rssi: props.rssi,
            manufacturer_data: props.manufacturer_data,
        }))
    }

    fn stop_forwarder(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Device = Peripheral;

    async fn start_scan(&mut self) -> Result<(), TransportError> {
        // Subscribe to events first so no advertisement is missed
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        self.scan_events = Some(events);
        Ok(())
    }

    async fn next_advertisement(
        &mut self,
    ) -> Result<Option<Advertisement<Peripheral>>, TransportError> {
        loop {
            let event = match self.scan_events.as_mut() {
                Some(events) => events.next().await,
                None => return Err(TransportError::Scan("scan not started".to_string())),
            };
            let Some(event) = event else {
                return Ok(None);
            };

            let (id, extra_data) = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => (id, None),
                CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data,
                } => (id, Some(manufacturer_data)),
                other => {
                    trace!("Ignoring central event: {:?}", other);
                    continue;
                }
            };

            if let Some(mut adv) = Self::advertisement(&self.adapter, &id).await? {
                if let Some(data) = extra_data {
                    adv.manufacturer_data.extend(data);
                }
                return Ok(Some(adv));
            }
        }
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.scan_events = None;
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))
    }

    async fn connect(&mut self, device: &Peripheral) -> Result<(), TransportError> {
        if !device.is_connected().await? {
            device
                .connect()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        info!("Device connected, discovering services...");
        device
            .discover_services()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &mut self,
        device: &Peripheral,
        characteristic: Uuid,
        capacity: usize,
    ) -> Result<NotificationReceiver, TransportError> {
        let target = device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;

        let mut notifications = device.notifications().await?;
        let mut central_events = self.adapter.events().await?;

        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            match device.subscribe(&target).await {
                Ok(()) => {
                    info!("Notifications enabled on {}", characteristic);
                    break;
                }
                Err(e) if attempt < SUBSCRIBE_ATTEMPTS => {
                    warn!("Notification subscription attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(Duration::from_millis(SUBSCRIBE_RETRY_DELAY_MS)).await;
                }
                Err(e) => return Err(TransportError::Subscribe(e.to_string())),
            }
        }

        let (tx, rx) = mpsc::channel(capacity);
        let id = device.id();
        self.stop_forwarder();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == characteristic => {
                            if tx.send(n.value).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("Notification stream ended");
                            break;
                        }
                    },
                    event = central_events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                            info!("Controller dropped the connection");
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        }));

        Ok(rx)
    }

    async fn disconnect(&mut self, device: &Peripheral) -> Result<(), TransportError> {
        self.stop_forwarder();
        if device.is_connected().await.unwrap_or(false) {
            device.disconnect().await?;
        }
        info!("Disconnected from device");
        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}
