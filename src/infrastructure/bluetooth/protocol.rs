//! Switch 2 Pro Controller Protocol
//!
//! Identifiers and the input report layout of the Switch 2 Pro Controller
//! over BLE. Only the input direction is handled; the output characteristic
//! is listed for completeness and never written.

use crate::domain::models::{Button, ButtonSet, ControllerState, StickPosition};
use crate::error::{BridgeError, BridgeResult};
use uuid::Uuid;

/// Input report characteristic (notify)
pub const INPUT_CHAR_UUID: &str = "7492866c-ec3e-4619-8258-32755ffcc0f9";

/// Output characteristic (write). Command format over BLE is unconfirmed.
pub const OUTPUT_CHAR_UUID: &str = "7492866c-ec3e-4619-8258-32755ffcc0f8";

/// Nintendo USB vendor id, little-endian in the advertisement
pub const VENDOR_ID: u16 = 0x057E;

/// Switch 2 Pro Controller product id, little-endian in the advertisement
pub const PRODUCT_ID: u16 = 0x2069;

/// Shortest input report carrying buttons and both sticks
pub const MIN_REPORT_LEN: usize = 11;

/// Button bit layout
///
/// ```text
/// [2] : B=0x01 A=0x02 Y=0x04 X=0x08 R=0x10 ZR=0x20 +=0x40 RS=0x80
/// [3] : Down=0x01 Right=0x02 Left=0x04 Up=0x08 L=0x10 ZL=0x20 -=0x40 LS=0x80
/// [4] : Home=0x01 Round=0x02 GR=0x04 GL=0x08 Capture=0x10
/// ```
const BUTTON_BITS: [(usize, u8, Button); Button::COUNT] = [
    (2, 0x01, Button::B),
    (2, 0x02, Button::A),
    (2, 0x04, Button::Y),
    (2, 0x08, Button::X),
    (2, 0x10, Button::R),
    (2, 0x20, Button::ZR),
    (2, 0x40, Button::Plus),
    (2, 0x80, Button::RS),
    (3, 0x01, Button::DpadDown),
    (3, 0x02, Button::DpadRight),
    (3, 0x04, Button::DpadLeft),
    (3, 0x08, Button::DpadUp),
    (3, 0x10, Button::L),
    (3, 0x20, Button::ZL),
    (3, 0x40, Button::Minus),
    (3, 0x80, Button::LS),
    (4, 0x01, Button::Home),
    (4, 0x02, Button::Round),
    (4, 0x04, Button::GripRight),
    (4, 0x08, Button::GripLeft),
    (4, 0x10, Button::Capture),
];

const LEFT_STICK_OFFSET: usize = 5;
const RIGHT_STICK_OFFSET: usize = 8;

pub fn input_char_uuid() -> Uuid {
    Uuid::from_u128(0x7492866c_ec3e_4619_8258_32755ffcc0f9)
}

/// Decode one input report into a [`ControllerState`]
///
/// # Input Report Structure
///
/// ```text
/// [0]     : Report id (ignored)
/// [1]     : Sequence / timer counter (ignored)
/// [2-4]   : Button bytes, see BUTTON_BITS
/// [5-7]   : Left stick, 12-bit X and Y
/// [8-10]  : Right stick, 12-bit X and Y
/// [11..]  : IMU and other telemetry (opaque)
/// ```
///
/// Every bit pattern decodes; only a short buffer fails.
pub fn decode_report(bytes: &[u8]) -> BridgeResult<ControllerState> {
    if bytes.len() < MIN_REPORT_LEN {
        return Err(BridgeError::MalformedReport {
            len: bytes.len(),
            min: MIN_REPORT_LEN,
        });
    }

    let buttons = BUTTON_BITS
        .iter()
        .filter(|(offset, mask, _)| bytes[*offset] & mask != 0)
        .map(|(_, _, button)| *button)
        .collect::<ButtonSet>();

    Ok(ControllerState {
        buttons,
        left_stick: unpack_stick(&bytes[LEFT_STICK_OFFSET..LEFT_STICK_OFFSET + 3]),
        right_stick: unpack_stick(&bytes[RIGHT_STICK_OFFSET..RIGHT_STICK_OFFSET + 3]),
    })
}

/// Two 12-bit values packed into three bytes
fn unpack_stick(b: &[u8]) -> StickPosition {
    let x = b[0] as u16 | ((b[1] as u16 & 0x0F) << 8);
    let y = ((b[1] as u16 & 0xF0) >> 4) | ((b[2] as u16) << 4);
    StickPosition { x, y }
}

/// The three button bytes, used to detect changes while inspecting raw reports
pub fn button_bytes(bytes: &[u8]) -> Option<[u8; 3]> {
    if bytes.len() < MIN_REPORT_LEN {
        return None;
    }
    Some([bytes[2], bytes[3], bytes[4]])
}

/// Human readable dump of a raw report for calibration
pub fn describe_report(bytes: &[u8]) -> String {
    let hex = bytes
        .iter()
        .take(15)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");

    match decode_report(bytes) {
        Ok(state) => format!(
            "RAW: {} | BTN1: {:08b} BTN2: {:08b} BTN3: {:08b} | L:({:4},{:4}) R:({:4},{:4})",
            hex,
            bytes[2],
            bytes[3],
            bytes[4],
            state.left_stick.x,
            state.left_stick.y,
            state.right_stick.x,
            state.right_stick.y,
        ),
        Err(_) => format!("RAW: {} | short report ({} bytes)", hex, bytes.len()),
    }
}
