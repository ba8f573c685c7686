//! Vallox Digit SE bus framing.
//!
//! Every frame is six bytes: `[domain, sender, receiver, variable, value,
//! checksum]`, checksum being the sum of the first five bytes mod 256.
//! The bus is shared by the mainboard and all control panels; we listen to
//! everything and keep frames exchanged between known parties.
use tracing::debug;

pub const FRAME_LEN: usize = 6;
pub const DOMAIN: u8 = 0x01;
/// Variable byte of a read request; the requested variable goes into value.
pub const POLL_BYTE: u8 = 0x00;

pub mod addr {
    pub const MAINBOARD_1: u8 = 0x11;
    pub const MAINBOARDS: u8 = 0x10;
    pub const PANEL_1: u8 = 0x21;
    /// We pretend to be the second control panel.
    pub const THIS_PANEL: u8 = 0x22;
    pub const PANELS: u8 = 0x20;
}

pub mod var {
    pub const IO_08: u8 = 0x08;
    pub const HEATING_STATUS: u8 = 0x07;
    pub const FAN_SPEED: u8 = 0x29;
    pub const CO2_HI: u8 = 0x2B;
    pub const CO2_LO: u8 = 0x2C;
    pub const RH1: u8 = 0x2F;
    pub const RH2: u8 = 0x30;
    pub const T_OUTSIDE: u8 = 0x32;
    pub const T_EXHAUST: u8 = 0x33;
    pub const T_INSIDE: u8 = 0x34;
    pub const T_INCOMING: u8 = 0x35;
    pub const FAULT_CODE: u8 = 0x36;
    pub const FLAGS_06: u8 = 0x71;
    pub const STATUS: u8 = 0xA3;
    pub const HEATING_TARGET: u8 = 0xA4;
    pub const SERVICE_PERIOD: u8 = 0xA6;
    pub const DEFAULT_FAN_SPEED: u8 = 0xA9;
    pub const PROGRAM: u8 = 0xAA;
    pub const SERVICE_COUNTER: u8 = 0xAB;
}

/// Bits of the status variable (0xA3).
pub mod status {
    pub const POWER: u8 = 0x01;
    pub const CO2: u8 = 0x02;
    pub const RH: u8 = 0x04;
    pub const HEATING_MODE: u8 = 0x08;
    pub const FILTER: u8 = 0x10;
    pub const HEATING: u8 = 0x20;
    pub const FAULT: u8 = 0x40;
    pub const SERVICE: u8 = 0x80;
}

/// Bits of the I/O variable 0x08.
pub mod io08 {
    pub const SUMMER_MODE: u8 = 0x02;
    pub const ERROR_RELAY: u8 = 0x04;
    pub const MOTOR_IN: u8 = 0x08;
    pub const FRONT_HEATING: u8 = 0x10;
    pub const MOTOR_OUT: u8 = 0x20;
    pub const EXTRA_FUNC: u8 = 0x40;
}

/// Bits of variable 0x71 (fireplace/boost switch).
pub mod flags06 {
    pub const SWITCH_ACTIVATE: u8 = 0x20;
    pub const SWITCH_ACTIVE: u8 = 0x40;
}

/// Bits of the program variable (0xAA).
pub mod program {
    /// Set: the switch triggers boost; clear: fireplace.
    pub const SWITCH_TYPE: u8 = 0x20;
}

const KNOWN_SENDERS: [u8; 3] = [addr::MAINBOARD_1, addr::THIS_PANEL, addr::PANEL_1];
const KNOWN_RECEIVERS: [u8; 5] = [
    addr::PANELS,
    addr::THIS_PANEL,
    addr::PANEL_1,
    addr::MAINBOARD_1,
    addr::MAINBOARDS,
];

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// A validated frame, domain and checksum stripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub sender: u8,
    pub receiver: u8,
    pub variable: u8,
    pub value: u8,
}

impl Frame {
    pub fn new(sender: u8, receiver: u8, variable: u8, value: u8) -> Self {
        Self {
            sender,
            receiver,
            variable,
            value,
        }
    }

    /// Ask the mainboard for the current value of `variable`.
    pub fn request(variable: u8) -> Self {
        Self::new(addr::THIS_PANEL, addr::MAINBOARD_1, POLL_BYTE, variable)
    }

    /// Frames for setting `variable`: one from us to `target`, then a copy
    /// from the mainboard to all panels so other panels see the new value.
    pub fn set(target: u8, variable: u8, value: u8) -> [Self; 2] {
        [
            Self::new(addr::THIS_PANEL, target, variable, value),
            Self::new(addr::MAINBOARD_1, addr::PANELS, variable, value),
        ]
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut raw = [DOMAIN, self.sender, self.receiver, self.variable, self.value, 0];
        raw[5] = checksum(&raw[..5]);
        raw
    }

    fn check(raw: &[u8]) -> Check {
        if raw.len() != FRAME_LEN {
            return Check::Length;
        }
        if raw[0] != DOMAIN {
            return Check::Domain;
        }
        if checksum(&raw[..5]) != raw[5] {
            return Check::Checksum;
        }
        if !KNOWN_SENDERS.contains(&raw[1]) || !KNOWN_RECEIVERS.contains(&raw[2]) {
            return Check::Unaddressed;
        }
        Check::Valid
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Check {
    Valid,
    Length,
    Domain,
    Checksum,
    Unaddressed,
}

/// Reassembles frames from an arbitrarily chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next valid frame, together with its raw bytes. Garbage in front of it
    /// is skipped; None once fewer than a frame's worth of bytes remain.
    pub fn next_frame(&mut self) -> Option<(Frame, [u8; FRAME_LEN])> {
        loop {
            let start = self.buf.iter().position(|b| *b == DOMAIN);
            match start {
                Some(0) => {}
                Some(skip) => {
                    self.buf.drain(..skip);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < FRAME_LEN {
                return None;
            }

            let mut raw = [0u8; FRAME_LEN];
            raw.copy_from_slice(&self.buf[..FRAME_LEN]);
            match Frame::check(&raw) {
                Check::Valid => {
                    self.buf.drain(..FRAME_LEN);
                    return Some((Frame::new(raw[1], raw[2], raw[3], raw[4]), raw));
                }
                Check::Unaddressed => {
                    // A well formed frame for someone else.
                    debug!("Ignoring frame {:02x?} between foreign parties", raw);
                    self.buf.drain(..FRAME_LEN);
                }
                _ => {
                    // Not in sync; try from the next byte.
                    self.buf.drain(..1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &[u8]) -> Option<Frame> {
        let mut reader = FrameReader::new();
        reader.push(raw);
        reader.next_frame().map(|(frame, _)| frame)
    }

    #[test]
    fn checksum_round_trip() {
        let frame = Frame::new(addr::MAINBOARD_1, addr::PANELS, var::STATUS, 0x01);
        let raw = frame.to_bytes();
        assert_eq!(raw, [0x01, 0x11, 0x20, 0xA3, 0x01, 0xD6]);
        assert_eq!(decode(&raw), Some(frame));
    }

    #[test]
    fn any_flipped_bit_is_rejected() {
        let raw = Frame::new(addr::PANEL_1, addr::MAINBOARD_1, var::FAN_SPEED, 0x07).to_bytes();
        for idx in 0..5 {
            for bit in 0..8 {
                let mut bad = raw;
                bad[idx] ^= 1 << bit;
                assert_eq!(decode(&bad), None, "byte {} bit {}", idx, bit);
            }
        }
    }

    #[test]
    fn unknown_parties_are_rejected() {
        let raw = Frame::new(0x12, addr::PANELS, var::STATUS, 0).to_bytes();
        assert_eq!(decode(&raw), None);
        let raw = Frame::new(addr::MAINBOARD_1, 0x30, var::STATUS, 0).to_bytes();
        assert_eq!(decode(&raw), None);
    }

    #[test]
    fn request_layout() {
        assert_eq!(
            Frame::request(var::STATUS).to_bytes(),
            [0x01, 0x22, 0x11, 0x00, 0xA3, 0xD7]
        );
    }

    #[test]
    fn set_is_announced_to_panels() {
        let [own, echo] = Frame::set(addr::MAINBOARDS, var::FAN_SPEED, 0x07);
        assert_eq!(own.to_bytes(), [0x01, 0x22, 0x10, 0x29, 0x07, 0x63]);
        assert_eq!(echo.sender, addr::MAINBOARD_1);
        assert_eq!(echo.receiver, addr::PANELS);
        assert_eq!(echo.to_bytes()[5], checksum(&echo.to_bytes()[..5]));
    }

    #[test]
    fn reader_resynchronizes() {
        let good = Frame::new(addr::MAINBOARD_1, addr::PANELS, var::T_INSIDE, 0x90).to_bytes();
        let mut reader = FrameReader::new();
        // Noise, a truncated frame, then a good one split in two chunks.
        reader.push(&[0xFF, 0x42, 0x01, 0x11]);
        reader.push(&good[..3]);
        assert!(reader.next_frame().is_none());
        reader.push(&good[3..]);

        let (frame, raw) = reader.next_frame().unwrap();
        assert_eq!(raw, good);
        assert_eq!(frame.variable, var::T_INSIDE);
        assert!(reader.next_frame().is_none());
    }

    #[test]
    fn reader_skips_foreign_frames_whole() {
        let foreign = Frame::new(0x12, 0x13, var::STATUS, 0x01).to_bytes();
        let good = Frame::new(addr::MAINBOARD_1, addr::PANELS, var::STATUS, 0x01).to_bytes();
        let mut reader = FrameReader::new();
        reader.push(&foreign);
        reader.push(&good);
        assert_eq!(reader.next_frame().map(|(f, _)| f.sender), Some(addr::MAINBOARD_1));
        assert_eq!(reader.pending(), 0);
    }
}
