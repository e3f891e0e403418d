//! Example: Weather station loop with the BME280 on an STM32F407.
//!
//! This example demonstrates:
//! 1. **Discovery**: Finding the sensor on either bus address.
//! 2. **Initialization**: Loading calibration and applying a forced-mode setup.
//! 3. **Measurement Loop**: Triggering a one-shot conversion per cycle and
//!    rotating the output between temperature, humidity and pressure.

#![no_main]
#![no_std]
#![deny(unsafe_code)]

use bme280_driver::*;
use defmt_rtt as _;
use panic_probe as _;
use stm32f4xx_hal::{self as hal, prelude::*};

#[cortex_m_rt::entry]
fn main() -> ! {
    // --- 1. Hardware Setup ---
    let dp = hal::pac::Peripherals::take().unwrap();
    let clock_cfg = hal::rcc::Config::default().sysclk(168.MHz());
    let mut rcc = dp.RCC.freeze(clock_cfg);

    // Setup I2C1 (SCL on PB6, SDA on PB7)
    let gpiob = dp.GPIOB.split(&mut rcc);
    let scl = gpiob.pb6.into_open_drain_output();
    let sda = gpiob.pb7.into_open_drain_output();

    let mut i2c = hal::i2c::I2c1::new(
        dp.I2C1,
        (scl, sda),
        hal::i2c::Mode::Standard {
            frequency: 100.kHz().into(),
        },
        &mut rcc,
    );

    let mut delay = dp.TIM6.delay_us(&mut rcc);

    // --- 2. Discovery ---
    let address = loop {
        match discover(&mut i2c) {
            Some(address) => break address,
            None => {
                defmt::println!("I2C error: sensor not found");
                delay.delay_ms(1000);
            }
        }
    };
    defmt::println!("BME280 at {=u8:#x}", address.wire_byte());

    // --- 3. Driver Initialization ---
    // Sleep mode between cycles; every reading is a forced one-shot.
    let config = Config::builder()
        .mode(Mode::Sleep)
        .temp_oversampling(Oversampling::X1)
        .hum_oversampling(Oversampling::X1)
        .pres_oversampling(Oversampling::X1)
        .iir_filter(IIRFilter::Off)
        .standby(Standby::Ms0_5)
        .build();

    let mut bme280 = Bme280::new(i2c, address)
        .begin(&mut delay, &config)
        .expect("Failed to initialize BME280");

    // --- 4. Measurement Loop ---
    let mut page = 0u8;
    loop {
        match bme280.measure_forced(&mut delay) {
            Ok(data) => {
                let (temp_whole, temp_frac) = data.temp.split();
                let (hum_whole, hum_frac) = data.hum.split();
                let (hpa, hpa_frac) = data.pres.as_hpa();

                match page {
                    0 => defmt::println!("Temperature: {}.{} C", temp_whole, temp_frac.abs()),
                    1 => defmt::println!("Humidity:    {}.{} %", hum_whole, hum_frac),
                    _ => defmt::println!("Pressure:    {}.{} hPa", hpa, hpa_frac),
                }
                page = (page + 1) % 3;
            }
            Err(e) => defmt::println!("Measurement failed: {}", defmt::Debug2Format(&e)),
        }

        delay.delay_ms(2000);
    }
}
