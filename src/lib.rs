//! Attitude and heading reference for a three-sensor IMU
//! (HMC5843 magnetometer, ITG-3200 gyro, ADXL345 accelerometer).
//!
//! The crate is `no_std` and hardware agnostic: sensors are reached through
//! [`drivers::SensorBus`], and the firmware binaries under `src/bin` and
//! `src/main.rs` supply an I2C implementation of it.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod config;
pub mod device;
pub mod drivers;
pub mod error;
pub mod ins;
pub mod math;
pub mod nav;
pub mod state;

pub use config::InsConfig;
pub use device::{InsCommand, InsDevice, InsResponse};
pub use error::InsError;
pub use nav::{NavState, Navigator};
