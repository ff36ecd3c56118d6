//! Scripted sensor bus for host tests.
//!
//! Each device answers a data read with the vector currently set for it,
//! encoded in that device's register layout. Queued vectors are served first,
//! one per read.

use std::collections::VecDeque;
use std::vec::Vec;

use super::adxl345::{ADXL345_ADDR, ADXL345_DATA};
use super::bus::SensorBus;
use super::hmc5843::{HMC5843_ADDR, HMC5843_DATA};
use super::itg3200::{ITG3200_ADDR, ITG3200_DATA};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockError {
    Nack,
    UnknownRegister,
}

#[derive(Default)]
pub struct MockBus {
    pub mag: [i16; 3],
    pub acc: [i16; 3],
    pub gyro: [i16; 3],
    pub mag_queue: VecDeque<[i16; 3]>,
    pub acc_queue: VecDeque<[i16; 3]>,
    /// Transactions left to fail before the bus recovers.
    pub fail_next: u32,
    pub writes: Vec<(u8, Vec<u8>)>,
    pub reads: u32,
    pub slept_ms: u32,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level, on heading, not rotating.
    pub fn level() -> Self {
        Self {
            mag: [512, 0, 0],
            acc: [0, 0, 256],
            ..Self::default()
        }
    }

    fn take_fault(&mut self) -> bool {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            true
        } else {
            false
        }
    }
}

fn be(v: i16) -> [u8; 2] {
    v.to_be_bytes()
}

fn encode_mag(v: [i16; 3]) -> [u8; 6] {
    let (x, y, z) = (be(v[0]), be(v[1].saturating_neg()), be(v[2].saturating_neg()));
    [x[0], x[1], y[0], y[1], z[0], z[1]]
}

fn encode_gyro(v: [i16; 3]) -> [u8; 6] {
    let (a, b, c) = (
        be(v[1].saturating_neg()),
        be(v[0].saturating_neg()),
        be(v[2].saturating_neg()),
    );
    [a[0], a[1], b[0], b[1], c[0], c[1]]
}

fn encode_acc(v: [i16; 3]) -> [u8; 6] {
    let (x, y, z) = (v[0].to_le_bytes(), v[1].to_le_bytes(), v[2].to_le_bytes());
    [y[0], y[1], x[0], x[1], z[0], z[1]]
}

impl SensorBus for MockBus {
    type Error = MockError;

    async fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), MockError> {
        if self.take_fault() {
            return Err(MockError::Nack);
        }
        self.writes.push((addr, bytes.to_vec()));
        Ok(())
    }

    async fn write_read(&mut self, addr: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), MockError> {
        if self.take_fault() {
            return Err(MockError::Nack);
        }
        let data = match (addr, bytes.first().copied()) {
            (HMC5843_ADDR, Some(HMC5843_DATA)) => {
                let v = self.mag_queue.pop_front().unwrap_or(self.mag);
                encode_mag(v)
            }
            (ADXL345_ADDR, Some(ADXL345_DATA)) => {
                let v = self.acc_queue.pop_front().unwrap_or(self.acc);
                encode_acc(v)
            }
            (ITG3200_ADDR, Some(ITG3200_DATA)) => encode_gyro(self.gyro),
            _ => return Err(MockError::UnknownRegister),
        };
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.reads += 1;
        Ok(())
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.slept_ms += ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{adxl345, hmc5843, itg3200};

    #[test]
    fn encodings_invert_driver_decoding() {
        let v = [300, -1200, 7];
        assert_eq!(hmc5843::decode(&encode_mag(v)), v);
        assert_eq!(adxl345::decode(&encode_acc(v)), v);
        assert_eq!(itg3200::decode(&encode_gyro(v)), v);
    }
}
