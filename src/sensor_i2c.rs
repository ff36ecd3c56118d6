use ahrs_ins::drivers::SensorBus;
use embassy_stm32::i2c::{Error, I2c};
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1};
use embassy_time::{Duration, Timer};

pub type SensorI2c = I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>;

/// I2C1 carrying the magnetometer, gyro and accelerometer.
pub struct I2cBus {
    i2c: SensorI2c,
}

impl I2cBus {
    pub fn new(i2c: SensorI2c) -> Self {
        Self { i2c }
    }
}

impl SensorBus for I2cBus {
    type Error = Error;

    async fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Error> {
        self.i2c.write(addr, bytes).await
    }

    async fn write_read(&mut self, addr: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), Error> {
        self.i2c.write_read(addr, bytes, buf).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        Timer::after(Duration::from_millis(ms as u64)).await;
    }
}
