use super::bus::{read_retry, write_retry, SensorBus};
use crate::error::InsError;

pub const ITG3200_ADDR: u8 = 0x68;
/// GYRO_XOUT_H.
pub const ITG3200_DATA: u8 = 0x1D;

/// Gyroscope, ±2000 °/s. Big-endian with X and Y swapped and every axis
/// reversed relative to the board.
pub struct Itg3200;

impl Itg3200 {
    pub async fn startup<B: SensorBus>(bus: &mut B, settle_ms: u32) -> Result<(), InsError> {
        const INIT: [[u8; 2]; 4] = [
            [0x3E, 0x80], // PWR_MGM: reset
            [0x16, 0x1B], // DLPF_FS: full scale, 42 Hz low pass
            [0x15, 0x0A], // SMPLRT_DIV
            [0x3E, 0x00], // PWR_MGM: internal oscillator
        ];
        for cmd in INIT.iter() {
            write_retry(bus, ITG3200_ADDR, cmd).await?;
            bus.delay_ms(settle_ms).await;
        }
        Ok(())
    }

    pub async fn read<B: SensorBus>(bus: &mut B) -> Result<[i16; 3], InsError> {
        let mut data = [0u8; 6];
        read_retry(bus, ITG3200_ADDR, ITG3200_DATA, &mut data).await?;
        Ok(decode(&data))
    }
}

pub fn decode(data: &[u8; 6]) -> [i16; 3] {
    let a = i16::from_be_bytes([data[0], data[1]]);
    let b = i16::from_be_bytes([data[2], data[3]]);
    let c = i16::from_be_bytes([data[4], data[5]]);
    [b.saturating_neg(), a.saturating_neg(), c.saturating_neg()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_are_swapped_and_reversed() {
        assert_eq!(decode(&[0x00, 0x10, 0xFF, 0xFE, 0x80, 0x00]), [2, -16, i16::MAX]);
    }
}
