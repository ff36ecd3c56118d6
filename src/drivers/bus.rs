//! Register-level access to the sensor bus.

use crate::error::InsError;

/// Attempts made on every transaction before giving up.
pub const BUS_RETRIES: u8 = 10;

/// Blocking-style register access plus a sleep, as the sensor drivers need
/// it. The firmware implements this over I2C; tests use a scripted mock.
#[allow(async_fn_in_trait)]
pub trait SensorBus {
    type Error: core::fmt::Debug;

    async fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    async fn write_read(&mut self, addr: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), Self::Error>;

    async fn delay_ms(&mut self, ms: u32);
}

/// Write `bytes` to `addr`, retrying up to [`BUS_RETRIES`] times.
pub async fn write_retry<B: SensorBus>(bus: &mut B, addr: u8, bytes: &[u8]) -> Result<(), InsError> {
    for _ in 0..BUS_RETRIES {
        if bus.write(addr, bytes).await.is_ok() {
            return Ok(());
        }
    }
    log_error!("write to 0x{:x} failed {} times", addr, BUS_RETRIES);
    Err(InsError::Bus)
}

/// Read `buf.len()` bytes starting at register `reg`, retrying up to
/// [`BUS_RETRIES`] times.
pub async fn read_retry<B: SensorBus>(bus: &mut B, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), InsError> {
    for _ in 0..BUS_RETRIES {
        if bus.write_read(addr, &[reg], buf).await.is_ok() {
            return Ok(());
        }
    }
    log_error!("read of 0x{:x}:0x{:x} failed {} times", addr, reg, BUS_RETRIES);
    Err(InsError::Bus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mock::MockBus;
    use embassy_futures::block_on;

    #[test]
    fn transient_failures_are_retried() {
        let mut bus = MockBus::new();
        bus.fail_next = 9;
        block_on(write_retry(&mut bus, 0x1E, &[0x02, 0x00])).unwrap();
        assert_eq!(bus.writes, vec![(0x1E, vec![0x02, 0x00])]);
    }

    #[test]
    fn persistent_failure_surfaces_bus_error() {
        let mut bus = MockBus::new();
        bus.fail_next = 10;
        let mut buf = [0u8; 6];
        assert_eq!(block_on(read_retry(&mut bus, 0x53, 0x32, &mut buf)), Err(InsError::Bus));
        assert_eq!(bus.fail_next, 0);
        // The next transaction goes through.
        block_on(read_retry(&mut bus, 0x53, 0x32, &mut buf)).unwrap();
    }
}
