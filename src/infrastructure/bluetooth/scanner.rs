//! BLE Scanner Module
//!
//! Picks the Switch 2 Pro Controller out of nearby advertisements.

use crate::error::{BridgeError, BridgeResult};
use crate::infrastructure::bluetooth::protocol::{PRODUCT_ID, VENDOR_ID};
use crate::infrastructure::bluetooth::transport::{Advertisement, BleTransport, TransportError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Decides whether an advertisement belongs to the controller
#[derive(Debug, Clone, Default)]
pub struct ControllerMatcher {
    /// Substring of the advertised name, consulted only when an
    /// advertisement carries no manufacturer data at all
    name_hint: Option<String>,
}

impl ControllerMatcher {
    pub fn new(name_hint: Option<String>) -> Self {
        Self {
            name_hint: name_hint.filter(|h| !h.trim().is_empty()),
        }
    }

    pub fn matches<D>(&self, adv: &Advertisement<D>) -> bool {
        if !adv.manufacturer_data.is_empty() {
            return adv
                .manufacturer_data
                .iter()
                .any(|(company_id, data)| matches_manufacturer_data(*company_id, data));
        }

        match (&self.name_hint, &adv.local_name) {
            (Some(hint), Some(name)) => name.to_lowercase().contains(&hint.to_lowercase()),
            _ => false,
        }
    }
}

/// The vendor id is either the company id or appears little-endian in the
/// payload; the product id must appear in the payload.
pub fn matches_manufacturer_data(company_id: u16, data: &[u8]) -> bool {
    let vendor = company_id == VENDOR_ID || contains(data, &VENDOR_ID.to_le_bytes());
    vendor && contains(data, &PRODUCT_ID.to_le_bytes())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Scan until the controller shows up or `timeout` elapses
pub async fn scan_for_controller<T: BleTransport>(
    transport: &mut T,
    matcher: &ControllerMatcher,
    timeout: Duration,
) -> BridgeResult<Advertisement<T::Device>> {
    info!("Scanning for Switch 2 Pro Controller ({} ms)...", timeout.as_millis());
    transport.start_scan().await?;

    let outcome = tokio::time::timeout(timeout, next_match(transport, matcher)).await;

    if let Err(e) = transport.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    match outcome {
        Ok(Ok(Some(adv))) => {
            info!(
                "Found: {} ({})",
                adv.local_name.as_deref().unwrap_or("Unknown"),
                adv.address
            );
            Ok(adv)
        }
        Ok(Ok(None)) => {
            debug!("Scan stream ended without a match");
            Err(BridgeError::DeviceNotFound {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BridgeError::DeviceNotFound {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

async fn next_match<T: BleTransport>(
    transport: &mut T,
    matcher: &ControllerMatcher,
) -> Result<Option<Advertisement<T::Device>>, TransportError> {
    while let Some(adv) = transport.next_advertisement().await? {
        if matcher.matches(&adv) {
            return Ok(Some(adv));
        }
        trace!("Skipping {} ({:?})", adv.address, adv.local_name);
    }
    Ok(None)
}
