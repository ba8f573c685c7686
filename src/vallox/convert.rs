//! Raw byte <-> physical unit tables. Bit-exact with the Vallox mainboard.

/// Fan speed codes 1-8, unary bit patterns.
pub const FAN_SPEEDS: [u8; 8] = [0x01, 0x03, 0x07, 0x0F, 0x1F, 0x3F, 0x7F, 0xFF];
pub const MIN_FAN_SPEED: i32 = 1;
pub const MAX_FAN_SPEED: i32 = 8;

/// Byte sent when a temperature has no exact table entry: 0x83 = 10 °C.
pub const NTC_FALLBACK: u8 = 0x83;

/// Lowest RH byte a connected sensor reports.
const RH_OFFSET: u8 = 51;

/// NTC sensor byte -> °C.
#[rustfmt::skip]
pub const NTC_TEMPS: [i8; 256] = [
    -74, -70, -66, -62, -59, -56, -54, -52, -50, -48, // 0x00 - 0x09
    -47, -46, -44, -43, -42, -41, -40, -39, -38, -37, // 0x0a - 0x13
    -36, -35, -34, -33, -33, -32, -31, -30, -30, -29, // 0x14 - 0x1d
    -28, -28, -27, -27, -26, -25, -25, -24, -24, -23, // 0x1e - 0x27
    -23, -22, -22, -21, -21, -20, -20, -19, -19, -19, // 0x28 - 0x31
    -18, -18, -17, -17, -16, -16, -16, -15, -15, -14, // 0x32 - 0x3b
    -14, -14, -13, -13, -12, -12, -12, -11, -11, -11, // 0x3c - 0x45
    -10, -10,  -9,  -9,  -9,  -8,  -8,  -8,  -7,  -7, // 0x46 - 0x4f
     -7,  -6,  -6,  -6,  -5,  -5,  -5,  -4,  -4,  -4, // 0x50 - 0x59
     -3,  -3,  -3,  -2,  -2,  -2,  -1,  -1,  -1,  -1, // 0x5a - 0x63
      0,   0,   0,   1,   1,   1,   2,   2,   2,   3, // 0x64 - 0x6d
      3,   3,   4,   4,   4,   5,   5,   5,   5,   6, // 0x6e - 0x77
      6,   6,   7,   7,   7,   8,   8,   8,   9,   9, // 0x78 - 0x81
      9,  10,  10,  10,  11,  11,  11,  12,  12,  12, // 0x82 - 0x8b
     13,  13,  13,  14,  14,  14,  15,  15,  15,  16, // 0x8c - 0x95
     16,  16,  17,  17,  18,  18,  18,  19,  19,  19, // 0x96 - 0x9f
     20,  20,  21,  21,  21,  22,  22,  22,  23,  23, // 0xa0 - 0xa9
     24,  24,  24,  25,  25,  26,  26,  27,  27,  27, // 0xaa - 0xb3
     28,  28,  29,  29,  30,  30,  31,  31,  32,  32, // 0xb4 - 0xbd
     33,  33,  34,  34,  35,  35,  36,  36,  37,  37, // 0xbe - 0xc7
     38,  38,  39,  40,  40,  41,  41,  42,  43,  43, // 0xc8 - 0xd1
     44,  45,  45,  46,  47,  48,  48,  49,  50,  51, // 0xd2 - 0xdb
     52,  53,  53,  54,  55,  56,  57,  59,  60,  61, // 0xdc - 0xe5
     62,  63,  65,  66,  68,  69,  71,  73,  75,  77, // 0xe6 - 0xef
     79,  81,  82,  86,  90,  93,  97, 100, 100, 100, // 0xf0 - 0xf9
    100, 100, 100, 100, 100, 100,                     // 0xfa - 0xff
];

pub fn ntc_to_celsius(ntc: u8) -> i32 {
    NTC_TEMPS[ntc as usize] as i32
}

/// First table index holding `celsius`, or [`NTC_FALLBACK`] when the table
/// has no such entry.
pub fn celsius_to_ntc(celsius: i32) -> u8 {
    NTC_TEMPS
        .iter()
        .position(|&t| t as i32 == celsius)
        .map_or(NTC_FALLBACK, |idx| idx as u8)
}

/// Fan speed 1-8 to its bitmask byte.
pub fn fan_speed_to_hex(speed: i32) -> Option<u8> {
    if (MIN_FAN_SPEED..=MAX_FAN_SPEED).contains(&speed) {
        Some(FAN_SPEEDS[(speed - 1) as usize])
    } else {
        None
    }
}

/// Bitmask byte to fan speed 1-8. None when the byte is not a fan code.
pub fn hex_to_fan_speed(hex: u8) -> Option<i32> {
    FAN_SPEEDS
        .iter()
        .position(|&code| code == hex)
        .map(|idx| idx as i32 + 1)
}

/// Relative humidity byte to whole percent. Bytes under the offset come from
/// a disconnected sensor.
pub fn hex_to_rh(hex: u8) -> Option<i32> {
    if hex >= RH_OFFSET {
        Some(((hex - RH_OFFSET) as f64 / 2.04) as i32)
    } else {
        None
    }
}
