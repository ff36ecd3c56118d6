use embassy_stm32::gpio::{AnyPin, Level, Output, Pin, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{PA11, PA12, USB_OTG_FS};
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::{bind_interrupts, peripherals, Config};

use crate::sensor_i2c::{I2cBus, SensorI2c};

bind_interrupts!(struct I2cIrqs {
    I2C1_EV => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
});

/// Sensor bus clock; all three chips run fast mode.
const SENSOR_I2C_HZ: u32 = 400_000;

/// What the INS firmware uses from the board.
pub struct Board {
    /// HMC5843, ITG-3200 and ADXL345 on I2C1 (SCL=PB8, SDA=PB9).
    pub sensors: I2cBus,
    /// OTG FS port (D+=PA12, D-=PA11).
    pub usb: (USB_OTG_FS, PA12, PA11),
    /// Heartbeat LED on PC13, active low.
    pub led: Output<'static, AnyPin>,
}

/// 168 MHz core from the 8 MHz crystal. PLLQ must land on 48 MHz for the
/// OTG block; APB1 at 42 MHz feeds I2C1.
fn clocks() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: TimeHertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL168,
        divp: Some(PllPDiv::DIV2),
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config
}

impl Board {
    pub fn init() -> Self {
        let p = embassy_stm32::init(clocks());

        let i2c: SensorI2c = I2c::new(
            p.I2C1,
            p.PB8, p.PB9,
            I2cIrqs,
            p.DMA1_CH7,
            p.DMA1_CH0,
            TimeHertz(SENSOR_I2C_HZ),
            Default::default(),
        );

        Self {
            sensors: I2cBus::new(i2c),
            usb: (p.USB_OTG_FS, p.PA12, p.PA11),
            led: Output::new(p.PC13.degrade(), Level::High, Speed::Low),
        }
    }
}
