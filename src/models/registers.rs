use serde::{Serialize, Serializer};

/// # HTS221 register block
///
/// The emulated humidity sensor publishes its state as one fixed-size,
/// little-endian record at offset 0 of the shared register file. Other
/// components of the emulated board read the same bytes, so the layout
/// below must not change.
///
/// | Offset | Size | Field        | Content                                 |
/// |--------|------|--------------|-----------------------------------------|
/// | 0      | 1    | sensor_type  | u8, 2 = HTS221                          |
/// | 1      | 6    | sensor_name  | length byte + up to 5 name bytes        |
/// | 7      | 1    | H0           | u8, humidity calibration point 0 (%rH)  |
/// | 8      | 1    | H1           | u8, humidity calibration point 1 (%rH)  |
/// | 9-10   | 2    | T0           | u16, temperature calibration point 0    |
/// | 11-12  | 2    | T1           | u16, temperature calibration point 1    |
/// | 13-14  | 2    | H0_OUT       | i16, output code at H0                  |
/// | 15-16  | 2    | H1_OUT       | i16, output code at H1                  |
/// | 17-18  | 2    | T0_OUT       | i16, output code at T0                  |
/// | 19-20  | 2    | T1_OUT       | i16, output code at T1                  |
/// | 21-22  | 2    | H_OUT        | i16, humidity × 256                     |
/// | 23-24  | 2    | T_OUT        | i16, temperature × 64                   |
pub const BLOCK_SIZE: usize = 25;

/// `sensor_type` value of an initialised HTS221 block.
pub const HTS221_SENSOR_TYPE: u8 = 2;

/// Width of the name slot, length byte included.
pub const NAME_SLOT: usize = 6;

/// Longest name that survives encoding.
pub const NAME_MAX: usize = NAME_SLOT - 1;

/// Output code scale factors.
pub const HUMIDITY_SCALE: f64 = 256.0;
pub const TEMPERATURE_SCALE: f64 = 64.0;

const OFF_TYPE: usize = 0;
const OFF_NAME: usize = 1;
const OFF_H0: usize = 7;
const OFF_H1: usize = 8;
const OFF_T0: usize = 9;
const OFF_T1: usize = 11;
const OFF_H0_OUT: usize = 13;
const OFF_H1_OUT: usize = 15;
const OFF_T0_OUT: usize = 17;
const OFF_T1_OUT: usize = 19;
const OFF_H_OUT: usize = 21;
const OFF_T_OUT: usize = 23;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterBlock {
    pub sensor_type: u8,
    #[serde(serialize_with = "serialize_name")]
    pub sensor_name: Vec<u8>,
    pub h0: u8,
    pub h1: u8,
    pub t0: u16,
    pub t1: u16,
    pub h0_out: i16,
    pub h1_out: i16,
    pub t0_out: i16,
    pub t1_out: i16,
    pub h_out: i16,
    pub t_out: i16,
}

impl Default for RegisterBlock {
    fn default() -> Self {
        Self {
            sensor_type: HTS221_SENSOR_TYPE,
            sensor_name: b"HTS221".to_vec(),
            h0: 0,
            h1: 100,
            t0: 0,
            t1: 100,
            h0_out: 0,
            h1_out: 25600,
            t0_out: 0,
            t1_out: 6400,
            h_out: 0,
            t_out: 0,
        }
    }
}

fn serialize_name<S>(name: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(name))
}

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn write_2(buf: &mut [u8], offset: usize, value: [u8; 2]) {
    buf[offset..offset + 2].copy_from_slice(&value);
}

impl RegisterBlock {
    /// Parse the block at offset 0 of `bytes`.
    ///
    /// Panics if `bytes` is shorter than [`BLOCK_SIZE`]; every caller
    /// hands in a buffer sized by construction.
    pub fn decode(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() >= BLOCK_SIZE,
            "register buffer too short: {} < {}",
            bytes.len(),
            BLOCK_SIZE
        );

        let name_len = (bytes[OFF_NAME] as usize).min(NAME_MAX);
        let name_start = OFF_NAME + 1;

        Self {
            sensor_type: bytes[OFF_TYPE],
            sensor_name: bytes[name_start..name_start + name_len].to_vec(),
            h0: bytes[OFF_H0],
            h1: bytes[OFF_H1],
            t0: read_u16(bytes, OFF_T0),
            t1: read_u16(bytes, OFF_T1),
            h0_out: read_i16(bytes, OFF_H0_OUT),
            h1_out: read_i16(bytes, OFF_H1_OUT),
            t0_out: read_i16(bytes, OFF_T0_OUT),
            t1_out: read_i16(bytes, OFF_T1_OUT),
            h_out: read_i16(bytes, OFF_H_OUT),
            t_out: read_i16(bytes, OFF_T_OUT),
        }
    }

    /// Write the block into `buf` starting at `offset`, touching exactly
    /// [`BLOCK_SIZE`] bytes. Names longer than [`NAME_MAX`] are truncated.
    pub fn encode(&self, buf: &mut [u8], offset: usize) {
        let out = &mut buf[offset..offset + BLOCK_SIZE];

        let name_len = self.sensor_name.len().min(NAME_MAX);
        let name_start = OFF_NAME + 1;

        out[OFF_TYPE] = self.sensor_type;
        out[OFF_NAME] = name_len as u8;
        out[name_start..name_start + name_len].copy_from_slice(&self.sensor_name[..name_len]);
        // Unused name bytes are zeroed so the slot never leaks stale data.
        out[name_start + name_len..OFF_H0].fill(0);
        out[OFF_H0] = self.h0;
        out[OFF_H1] = self.h1;
        write_2(out, OFF_T0, self.t0.to_le_bytes());
        write_2(out, OFF_T1, self.t1.to_le_bytes());
        write_2(out, OFF_H0_OUT, self.h0_out.to_le_bytes());
        write_2(out, OFF_H1_OUT, self.h1_out.to_le_bytes());
        write_2(out, OFF_T0_OUT, self.t0_out.to_le_bytes());
        write_2(out, OFF_T1_OUT, self.t1_out.to_le_bytes());
        write_2(out, OFF_H_OUT, self.h_out.to_le_bytes());
        write_2(out, OFF_T_OUT, self.t_out.to_le_bytes());
    }

    pub fn is_initialised(&self) -> bool {
        self.sensor_type == HTS221_SENSOR_TYPE
    }

    /// Humidity in %rH as published in `H_OUT`.
    pub fn humidity(&self) -> f64 {
        self.h_out as f64 / HUMIDITY_SCALE
    }

    /// Temperature in °C as published in `T_OUT`.
    pub fn temperature(&self) -> f64 {
        self.t_out as f64 / TEMPERATURE_SCALE
    }
}

/// Convert a humidity reading to its `H_OUT` code, clamping to 0..=100 %rH
/// and truncating toward zero.
pub fn humidity_code(humidity: f64) -> i16 {
    (humidity.clamp(0.0, 100.0) * HUMIDITY_SCALE) as i16
}

/// Convert a temperature reading to its `T_OUT` code, clamping to
/// -40..=120 °C and truncating toward zero.
pub fn temperature_code(temperature: f64) -> i16 {
    (temperature.clamp(-40.0, 120.0) * TEMPERATURE_SCALE) as i16
}
