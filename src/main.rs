#![no_std]
#![no_main]

mod board;
mod sensor_i2c;
mod usb;

use core::fmt::Write;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use ahrs_ins::ins::Ins;
use ahrs_ins::{InsCommand, InsConfig, InsDevice, Navigator};

use crate::board::Board;
use crate::sensor_i2c::I2cBus;
use crate::usb::UsbSerial;

type Device = InsDevice<CriticalSectionRawMutex, I2cBus>;
type Nav = Navigator<'static, CriticalSectionRawMutex, I2cBus>;

static DEVICE: StaticCell<Device> = StaticCell::new();
static NAV: StaticCell<Nav> = StaticCell::new();

// ── Engine task ───────────────────────────────────────────────────────────────
/// Steps the state machine at the nominal update rate and feeds it the
/// measured interval.
#[embassy_executor::task]
async fn nav_task(nav: &'static Nav, period_us: u32) {
    let mut ticker = Ticker::every(Duration::from_micros(period_us as u64));
    let mut last = Instant::now();
    let mut prev_state = None;
    loop {
        ticker.next().await;
        let now = Instant::now();
        let dt_us = now.duration_since(last).as_micros().min(u32::MAX as u64) as u32;
        last = now;

        match nav.tick(dt_us.max(1)).await {
            Ok(state) => {
                if prev_state != Some(state) {
                    defmt::info!("nav state {}", state);
                    prev_state = Some(state);
                }
            }
            Err(e) => defmt::warn!("nav step failed: {}", e),
        }
    }
}

// ── Telemetry task ────────────────────────────────────────────────────────────
/// Prints the attitude estimate over USB once a second while a host is
/// attached.
#[embassy_executor::task]
async fn telemetry_task(nav: &'static Nav, mut usb_serial: UsbSerial<'static>) {
    let mut ticker = Ticker::every(Duration::from_secs(1));
    loop {
        ticker.next().await;
        if !usb_serial.dtr() {
            continue;
        }
        let state = nav.state().await;
        let est = nav.state_estimate().await;

        let mut m = heapless::String::<128>::new();
        let _ = write!(
            m,
            "[ATT] r={:.1} p={:.1} y={:.1} mv={} st={:?}\r\n",
            est.corr[0], est.corr[1], est.corr[2], est.moving_count, state
        );
        let _ = usb_serial.write_packet(m.as_bytes()).await;

        let mut m = heapless::String::<128>::new();
        let _ = write!(
            m,
            "[RAW] r={:.1} p={:.1} y={:.1} res={:.2}/{:.2}/{:.2}\r\n",
            est.raw[0], est.raw[1], est.raw[2],
            est.avr_residual[0], est.avr_residual[1], est.avr_residual[2]
        );
        let _ = usb_serial.write_packet(m.as_bytes()).await;
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL, I2C1 sensor bus @ 400 kHz, heartbeat LED)
    let Board { sensors, usb: (otg, dp, dm), mut led } = Board::init();

    // 2. USB (CDC-ACM for telemetry)
    let (usb_dev, usb_serial) = usb::init(otg, dp, dm);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. INS context
    let cfg = InsConfig::default();
    let device: &'static Device = DEVICE.init(InsDevice::new(Ins::new(sensors, cfg)));

    // 4. Sensor configuration; the first engine step then levels the DCM
    Timer::after(Duration::from_millis(100)).await;
    if let Err(e) = device.ioctl(InsCommand::SensorStartup).await {
        defmt::error!("sensor startup failed: {}", e);
    }

    let nav: &'static Nav = NAV.init(Navigator::new(device));

    spawner.spawn(nav_task(nav, cfg.update_period_us)).unwrap();
    spawner.spawn(telemetry_task(nav, usb_serial)).unwrap();

    // 5. Heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
