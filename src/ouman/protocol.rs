//! Ouman serial protocol: request/response, 8-bit sum checksums.
//!
//! Request:  `STX 0x81 len cmd_hi cmd_lo crc`, crc over everything but STX.
//! Response: `STX ACK n payload[n] crc`, crc over `ACK n payload`. The
//! payload starts with the echoed command.
use tracing::debug;

pub const STX: u8 = 0x02;
pub const ACK: u8 = 0x06;
const READ_HEADER: u8 = 0x81;
const COMMAND_LEN: usize = 2;

/// Bytes in front of the payload: STX, ACK and the length.
pub const RESPONSE_HEADER_LEN: usize = 3;

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Read request for `command`.
pub fn encode_request(command: u16) -> [u8; 6] {
    let [hi, lo] = command.to_be_bytes();
    let mut raw = [STX, READ_HEADER, COMMAND_LEN as u8, hi, lo, 0];
    raw[5] = checksum(&raw[1..5]);
    raw
}

/// Payload length announced by a response header, if the header is valid.
pub fn payload_len(header: &[u8; RESPONSE_HEADER_LEN]) -> Option<usize> {
    if header[0] != STX || header[1] != ACK {
        debug!("Bad response header {:02x?}", header);
        return None;
    }
    Some(header[2] as usize)
}

/// Validate a complete response to `command` and return the data following
/// the echoed command.
pub fn decode_response(command: u16, raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < RESPONSE_HEADER_LEN + 1 {
        debug!("Response too short: {:02x?}", raw);
        return None;
    }
    let header: &[u8; RESPONSE_HEADER_LEN] = raw[..RESPONSE_HEADER_LEN].try_into().ok()?;
    let len = payload_len(header)?;
    if raw.len() != RESPONSE_HEADER_LEN + len + 1 {
        debug!("Response length {} does not match header {}", raw.len(), len);
        return None;
    }

    let (body, crc) = raw.split_at(raw.len() - 1);
    if checksum(&body[1..]) != crc[0] {
        debug!("Response checksum failed: {:02x?}", raw);
        return None;
    }

    let payload = &body[RESPONSE_HEADER_LEN..];
    if payload.len() < COMMAND_LEN {
        debug!("Response without command echo: {:02x?}", raw);
        return None;
    }
    let echoed = u16::from_be_bytes([payload[0], payload[1]]);
    if echoed != command {
        debug!("Response to command {} while waiting for {}", echoed, command);
        return None;
    }
    Some(&payload[COMMAND_LEN..])
}

/// Big-endian signed value from `data[start..=end]`. Only 1, 2 and 4 byte
/// widths exist.
pub fn extract_value(data: &[u8], start: usize, end: usize) -> anyhow::Result<i32> {
    let Some(slice) = data.get(start..=end) else {
        anyhow::bail!("Value {}..={} outside of {} data bytes", start, end, data.len());
    };
    Ok(match *slice {
        [b] => b as i8 as i32,
        [b0, b1] => i16::from_be_bytes([b0, b1]) as i32,
        [b0, b1, b2, b3] => i32::from_be_bytes([b0, b1, b2, b3]),
        _ => anyhow::bail!("Unsupported value width {}", slice.len()),
    })
}

/// Build a valid response. Counterpart of [`decode_response`], used to
/// emulate a controller.
pub fn encode_response(command: u16, data: &[u8]) -> Vec<u8> {
    let mut raw = vec![STX, ACK, (COMMAND_LEN + data.len()) as u8];
    raw.extend_from_slice(&command.to_be_bytes());
    raw.extend_from_slice(data);
    raw.push(checksum(&raw[1..]));
    raw
}
