use super::bus::{read_retry, write_retry, SensorBus};
use crate::error::InsError;

pub const HMC5843_ADDR: u8 = 0x1E;
/// First data register, X MSB.
pub const HMC5843_DATA: u8 = 0x03;

/// Magnetometer. Big-endian X, Y, Z with Y and Z pointing opposite the
/// board frame.
pub struct Hmc5843;

impl Hmc5843 {
    pub async fn startup<B: SensorBus>(bus: &mut B, settle_ms: u32) -> Result<(), InsError> {
        // Mode register: continuous conversion
        write_retry(bus, HMC5843_ADDR, &[0x02, 0x00]).await?;
        bus.delay_ms(settle_ms).await;
        // Configuration Register A: 50 Hz output rate
        write_retry(bus, HMC5843_ADDR, &[0x00, 0x18]).await?;
        bus.delay_ms(settle_ms).await;
        Ok(())
    }

    pub async fn read<B: SensorBus>(bus: &mut B) -> Result<[i16; 3], InsError> {
        let mut data = [0u8; 6];
        read_retry(bus, HMC5843_ADDR, HMC5843_DATA, &mut data).await?;
        Ok(decode(&data))
    }
}

pub fn decode(data: &[u8; 6]) -> [i16; 3] {
    let x = i16::from_be_bytes([data[0], data[1]]);
    let y = i16::from_be_bytes([data[2], data[3]]);
    let z = i16::from_be_bytes([data[4], data[5]]);
    [x, y.saturating_neg(), z.saturating_neg()]
}
