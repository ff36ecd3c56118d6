#![no_std]
#![no_main]

//! # Interactive ellipsoid calibration over USB
//!
//! Drives the magnetometer or accelerometer calibration from a serial
//! terminal. Each captured sample is echoed; rotate the board to a new
//! orientation and press a key for the next one. After the last sample the
//! fitted parameters are printed and the engine re-levels.
//!
//! ## Usage
//! ```sh
//! cargo flash --release --features firmware --bin calibrate --chip STM32F405RG
//! minicom -D /dev/ttyACM0 -b 115200
//! ```
//!
//! ## Keys
//! - `m`: magnetometer calibration
//! - `a`: accelerometer calibration
//! - `p`: print both calibrations
//! - `q`: abort a calibration run (between samples)

#[path = "../board.rs"]      mod board;
#[path = "../sensor_i2c.rs"] mod sensor_i2c;
#[path = "../usb.rs"]        mod usb;

use core::fmt::Write;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use ahrs_ins::ins::calibration::{CalStatus, CalibrationFloat};
use ahrs_ins::ins::Ins;
use ahrs_ins::state::CalEvent;
use ahrs_ins::{InsCommand, InsConfig, InsDevice, NavState, Navigator};

use crate::board::Board;
use crate::sensor_i2c::I2cBus;
use crate::usb::{UsbSerial, PACKET_SIZE};

type Device = InsDevice<CriticalSectionRawMutex, I2cBus>;
type Nav = Navigator<'static, CriticalSectionRawMutex, I2cBus>;

static DEVICE: StaticCell<Device> = StaticCell::new();
static NAV: StaticCell<Nav> = StaticCell::new();

#[embassy_executor::task]
async fn nav_task(nav: &'static Nav, period_us: u32) {
    let mut ticker = Ticker::every(Duration::from_micros(period_us as u64));
    let mut last = Instant::now();
    loop {
        ticker.next().await;
        let now = Instant::now();
        let dt_us = now.duration_since(last).as_micros().min(u32::MAX as u64) as u32;
        last = now;
        if let Err(e) = nav.tick(dt_us.max(1)).await {
            defmt::warn!("nav step failed: {}", e);
        }
    }
}

// ── Console I/O ───────────────────────────────────────────────────────────────

async fn send(serial: &mut UsbSerial<'static>, bytes: &[u8]) {
    for chunk in bytes.chunks(PACKET_SIZE) {
        if serial.write_packet(chunk).await.is_err() {
            return;
        }
    }
}

async fn read_key(serial: &mut UsbSerial<'static>) -> u8 {
    let mut buf = [0u8; PACKET_SIZE];
    loop {
        match serial.read_packet(&mut buf).await {
            Ok(n) if n > 0 => return buf[0],
            Ok(_) => {}
            Err(_) => serial.wait_connection().await,
        }
    }
}

async fn print_calibration(serial: &mut UsbSerial<'static>, name: &str, c: &CalibrationFloat) {
    let mut m = heapless::String::<256>::new();
    let _ = write!(m, "{}: bias {:.2} {:.2} {:.2} scale {:.4} {:.4} {:.4}\r\n",
        name, c.bias[0], c.bias[1], c.bias[2], c.scale[0], c.scale[1], c.scale[2]);
    for row in &c.rotation {
        let _ = write!(m, "  [{:.4} {:.4} {:.4}]\r\n", row[0], row[1], row[2]);
    }
    send(serial, m.as_bytes()).await;
}

/// Request `to` and wait for the engine to enter it.
async fn enter(nav: &Nav, to: NavState) -> bool {
    for _ in 0..100 {
        if nav.state().await == Some(to) {
            return true;
        }
        // The request is only accepted once the engine has a current state
        let _ = nav.set_state(to).await;
        Timer::after(Duration::from_millis(20)).await;
    }
    false
}

async fn calibrate(nav: &'static Nav, serial: &mut UsbSerial<'static>, state: NavState) {
    if !enter(nav, NavState::Idle).await {
        send(serial, b"engine did not reach idle\r\n").await;
        return;
    }
    while nav.try_cal_event().is_some() {}

    if nav.set_state(state).await.is_err() {
        send(serial, b"calibration refused\r\n").await;
        return;
    }
    let mut taken = 0u8;
    loop {
        match nav.wait_cal_event().await {
            CalEvent::Sample(s) => {
                taken += 1;
                let mut m = heapless::String::<96>::new();
                let _ = write!(m, "sample {}: {} {} {}  rotate, any key (q aborts)\r\n",
                    taken, s[0], s[1], s[2]);
                send(serial, m.as_bytes()).await;
                if read_key(serial).await == b'q' {
                    let _ = nav.set_state(NavState::Idle).await;
                } else if nav.set_state(state).await.is_err() {
                    send(serial, b"engine left calibration\r\n").await;
                    return;
                }
            }
            CalEvent::Complete(status) => {
                if status == CalStatus::Complete {
                    let cal = if state == NavState::MagCal {
                        nav.mag_calibration().await
                    } else {
                        nav.accel_calibration().await
                    };
                    print_calibration(serial, "fit", &cal).await;
                } else {
                    send(serial, b"fit failed, previous parameters kept\r\n").await;
                }
                let _ = nav.set_state(NavState::DcmInit).await;
                return;
            }
            CalEvent::Cancelled => {
                send(serial, b"calibration aborted\r\n").await;
                let _ = nav.set_state(NavState::DcmInit).await;
                return;
            }
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let Board { sensors, usb: (otg, dp, dm), mut led } = Board::init();

    let (usb_dev, mut usb_serial) = usb::init(otg, dp, dm);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    let cfg = InsConfig::default();
    let device: &'static Device = DEVICE.init(InsDevice::new(Ins::new(sensors, cfg)));
    Timer::after(Duration::from_millis(100)).await;
    if let Err(e) = device.ioctl(InsCommand::SensorStartup).await {
        defmt::error!("sensor startup failed: {}", e);
    }
    let nav: &'static Nav = NAV.init(Navigator::new(device));
    spawner.spawn(nav_task(nav, cfg.update_period_us)).unwrap();

    usb_serial.wait_connection().await;
    led.set_low();

    loop {
        send(&mut usb_serial, b"[m]ag [a]ccel [p]rint > ").await;
        match read_key(&mut usb_serial).await {
            b'm' => calibrate(nav, &mut usb_serial, NavState::MagCal).await,
            b'a' => calibrate(nav, &mut usb_serial, NavState::AccelCal).await,
            b'p' => {
                let mag = nav.mag_calibration().await;
                let acc = nav.accel_calibration().await;
                print_calibration(&mut usb_serial, "mag", &mag).await;
                print_calibration(&mut usb_serial, "accel", &acc).await;
            }
            _ => send(&mut usb_serial, b"\r\n").await,
        }
    }
}
