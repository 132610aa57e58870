//! eLink wire format
//!
//! Every frame ends with a checksum byte chosen so that the XOR of the whole
//! frame is zero.

use dcc_core::{DccError, DccResult};

/// Status poll, also used as the heartbeat
pub const STATUS_POLL: [u8; 3] = [0x21, 0x24, 0x05];
/// Reply to a status poll once the link is initialised
pub const INFO_RESPONSE: [u8; 4] = [0x62, 0x22, 0x40, 0x00];
/// Confirmed handshake status, also sent to acknowledge each accepted command
pub const COMMAND_ACK: [u8; 3] = [0x01, HANDSHAKE_CONFIRMED, 0x05];
/// Fixed key that starts the handshake
pub const HANDSHAKE_KEY: [u8; 11] = [
    0x3A, b'6', b'1', b'4', b'4', b'a', b'd', b'7', b'f', b'9', b'P',
];
pub const VERSION_REQUEST: [u8; 3] = [0x21, 0x21, 0x00];
/// Service mode results request
pub const RESULTS_REQUEST: [u8; 3] = [0x21, 0x10, 0x31];
/// Programming started, sent after a CV request
pub const PROGRAMMING_ACK: [u8; 3] = [0x61, 0x02, 0x63];
/// Programming still running, sent after a results request
pub const PROGRAMMING_BUSY: [u8; 3] = [0x61, 0x1F, 0x7E];
/// No locomotive on the programming track
pub const NO_LOCO: [u8; 3] = [0x61, 0x13, 0x72];

pub const TYPE_HANDSHAKE_STATUS: u8 = 0x01;
pub const TYPE_HANDSHAKE_EXCHANGE: u8 = 0x35;
pub const TYPE_SERVICE_STATUS: u8 = 0x61;
pub const TYPE_INFO: u8 = 0x62;
pub const TYPE_VERSION: u8 = 0x63;
pub const TYPE_CV_VALUE: u8 = TYPE_VERSION;

pub const HANDSHAKE_CONFIRMED: u8 = 0x04;
pub const HANDSHAKE_STATUS_LEN: usize = 3;
pub const HANDSHAKE_EXCHANGE_LEN: usize = 7;
/// Added to every challenge byte
pub const HANDSHAKE_TRANSFORM: u8 = 0x39;
pub const VERSION_RESPONSE_LEN: usize = 5;
pub const VERSION_ID: u8 = 0x21;
pub const INFO_RESPONSE_LEN: usize = INFO_RESPONSE.len();
pub const SERVICE_STATUS_LEN: usize = 3;
pub const CV_VALUE_LEN: usize = 5;
pub const CV_VALUE_ID: u8 = 0x14;

pub const LOCO_COMMAND: u8 = 0xE4;
pub const SPEED_128: u8 = 0x13;
pub const FUNCTION_GROUP: u8 = 0x20;
pub const CV_READ: [u8; 2] = [0x22, 0x15];
pub const CV_WRITE: [u8; 2] = [0x23, 0x16];

/// Direction bit of the speed byte; set means forward
pub const DIRECTION_FORWARD: u8 = 0x80;

/// XOR of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Append the checksum byte to `payload`
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    frame
}

/// Check that a received frame XORs to zero
///
/// # Errors
/// `DccError::Checksum` carrying the offending frame
pub fn verify(frame: &[u8]) -> DccResult<()> {
    if frame.is_empty() || checksum(frame) != 0 {
        return Err(DccError::Checksum {
            frame: frame.to_vec(),
        });
    }
    Ok(())
}

/// Error for a message whose leading type byte is not understood
pub fn unrecognised(message_type: u8) -> DccError {
    DccError::protocol(format!("Unrecognised message type, got {message_type}"))
}

/// Check that a verified info frame reports the device as ready
///
/// # Errors
/// Protocol error naming the frame for any other status bytes
pub fn expect_ready(frame: &[u8]) -> DccResult<()> {
    if frame != INFO_RESPONSE {
        return Err(DccError::protocol(format!(
            "Unexpected status response {frame:02X?}"
        )));
    }
    Ok(())
}

/// Answer to a handshake challenge
///
/// Adds [`HANDSHAKE_TRANSFORM`] to each payload byte and recomputes the
/// checksum.
pub fn challenge_response(challenge: &[u8]) -> DccResult<Vec<u8>> {
    if challenge.len() != HANDSHAKE_EXCHANGE_LEN || challenge[0] != TYPE_HANDSHAKE_EXCHANGE {
        return Err(DccError::protocol(format!(
            "Malformed handshake challenge: {challenge:02X?}"
        )));
    }
    let payload = &challenge[..HANDSHAKE_EXCHANGE_LEN - 1];
    let mut response: Vec<u8> = payload
        .iter()
        .enumerate()
        .map(|(i, b)| if i == 0 { *b } else { b.wrapping_add(HANDSHAKE_TRANSFORM) })
        .collect();
    response.push(checksum(&response));
    Ok(response)
}

/// Firmware version as "major.minor", e.g. 107 -> "1.07"
pub fn version_string(version: u8) -> String {
    format!("{}.{:02}", version / 100, version % 100)
}
