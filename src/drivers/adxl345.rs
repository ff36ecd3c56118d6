use super::bus::{read_retry, write_retry, SensorBus};
use crate::error::InsError;

pub const ADXL345_ADDR: u8 = 0x53;
/// DATAX0.
pub const ADXL345_DATA: u8 = 0x32;

/// Accelerometer. Little-endian registers with the X and Y axes swapped
/// relative to the board.
pub struct Adxl345;

impl Adxl345 {
    pub async fn startup<B: SensorBus>(bus: &mut B, settle_ms: u32) -> Result<(), InsError> {
        const INIT: [[u8; 2]; 4] = [
            [0x2D, 0x00], // POWER_CTL: standby
            [0x2D, 0x08], // POWER_CTL: measure
            [0x2C, 0x09], // BW_RATE: 50 Hz
            [0x2D, 0x08],
        ];
        for cmd in INIT.iter() {
            write_retry(bus, ADXL345_ADDR, cmd).await?;
            bus.delay_ms(settle_ms).await;
        }
        Ok(())
    }

    pub async fn read<B: SensorBus>(bus: &mut B) -> Result<[i16; 3], InsError> {
        let mut data = [0u8; 6];
        read_retry(bus, ADXL345_ADDR, ADXL345_DATA, &mut data).await?;
        Ok(decode(&data))
    }
}

pub fn decode(data: &[u8; 6]) -> [i16; 3] {
    [
        i16::from_le_bytes([data[2], data[3]]),
        i16::from_le_bytes([data[0], data[1]]),
        i16::from_le_bytes([data[4], data[5]]),
    ]
}
