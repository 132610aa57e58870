//! NMRA address and value codec
//!
//! Pure encode/validate helpers shared by every command station driver.
//! Nothing here holds state.
//!
//! # Long addresses
//! NMRA long (14-bit) locomotive addresses are sent as two bytes, big-endian,
//! with the two top bits of the high byte set to mark the long form:
//! ```text
//! 1234 = 0x04D2  ->  [0xC4, 0xD2]
//! ```

use crate::error::{DccError, DccResult};

/// Lowest address that must be sent in long form
pub const MIN_LONG_ADDRESS: u16 = 100;
/// Highest NMRA long address
pub const MAX_LONG_ADDRESS: u16 = 9999;
/// Marker bits OR'd into the high byte of a long address
pub const LONG_ADDRESS_MARKER: u8 = 0xC0;

/// Locomotive address range
pub const MIN_ADDRESS: i64 = 1;
pub const MAX_ADDRESS: i64 = 9999;
/// CV number range
pub const MIN_CV: i64 = 1;
pub const MAX_CV: i64 = 255;
/// Maximum speed step (7 bits)
pub const MAX_SPEED: i64 = 127;
/// Highest function index (F0 to F28)
pub const MAX_FUNCTION: i64 = 28;

/// Encode a long address into `buffer` at `offset`
///
/// # Arguments
/// * `address` - Locomotive address, 100 to 9999 inclusive
/// * `buffer` - Destination buffer
/// * `offset` - Position of the high byte
///
/// # Errors
/// - `DccError::Validation` ("Invalid long address, address=<n>") when the
///   address is outside 100..=9999
/// - `DccError::OutOfBounds` when the buffer cannot hold 2 bytes at `offset`
pub fn encode_long_address(address: u16, buffer: &mut [u8], offset: usize) -> DccResult<()> {
    if !(MIN_LONG_ADDRESS..=MAX_LONG_ADDRESS).contains(&address) {
        return Err(DccError::validation(format!(
            "Invalid long address, address={}",
            address
        )));
    }
    ensure_capacity(buffer.len(), offset)?;

    let [hi, lo] = address.to_be_bytes();
    buffer[offset] = hi | LONG_ADDRESS_MARKER;
    buffer[offset + 1] = lo;
    Ok(())
}

/// Decode a long address previously written by [`encode_long_address`]
///
/// The `0xC0` marker bits are masked off the high byte.
pub fn decode_long_address(buffer: &[u8], offset: usize) -> DccResult<u16> {
    ensure_capacity(buffer.len(), offset)?;
    let hi = buffer[offset] & !LONG_ADDRESS_MARKER;
    Ok(u16::from_be_bytes([hi, buffer[offset + 1]]))
}

fn ensure_capacity(len: usize, offset: usize) -> DccResult<()> {
    if offset.checked_add(2).is_none_or(|end| end > len) {
        return Err(DccError::OutOfBounds {
            needed: 2,
            offset,
            len,
        });
    }
    Ok(())
}

/// Fail unless `min <= value <= max`
///
/// # Arguments
/// * `what` - Human readable name of the quantity, e.g. "CV number"
/// * `key` - Short key used in the message, e.g. "cv"
pub fn ensure_within_range(what: &str, key: &str, value: i64, min: i64, max: i64) -> DccResult<()> {
    if value < min || value > max {
        return Err(DccError::validation(format!(
            "Invalid {}, {}={} (expected {} to {})",
            what, key, value, min, max
        )));
    }
    Ok(())
}

/// Locomotive address, 1 to 9999
pub fn ensure_address(address: impl Into<i64>) -> DccResult<()> {
    ensure_within_range("locomotive address", "address", address.into(), MIN_ADDRESS, MAX_ADDRESS)
}

/// CV number, 1 to 255
pub fn ensure_cv_number(cv: impl Into<i64>) -> DccResult<()> {
    ensure_within_range("CV number", "cv", cv.into(), MIN_CV, MAX_CV)
}

/// Single byte value, 0 to 255
pub fn ensure_byte(value: impl Into<i64>) -> DccResult<()> {
    ensure_within_range("byte value", "value", value.into(), 0, 255)
}

/// Speed step, 0 to 127
pub fn ensure_speed(speed: impl Into<i64>) -> DccResult<()> {
    ensure_within_range("speed", "speed", speed.into(), 0, MAX_SPEED)
}

/// Function index, 0 to 28
pub fn ensure_function(function: impl Into<i64>) -> DccResult<()> {
    ensure_within_range("function", "function", function.into(), 0, MAX_FUNCTION)
}
