pub mod bus;

pub mod adxl345;
pub mod hmc5843;
pub mod itg3200;

#[cfg(test)]
pub mod mock;

pub use bus::SensorBus;
