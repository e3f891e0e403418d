#![cfg_attr(not(test), no_std)]

//! # BME280 Environmental Sensor Driver
//!
//! A type-safe, `no_std` driver for the Bosch BME280 on an I²C bus.
//! This driver uses the typestate pattern to ensure calibration data is
//! loaded before any measurement is compensated.
//!
//! ## Features
//! - **Discovery**: probes both bus addresses (`0x76` / `0x77`).
//! - **Bounded waits**: every status poll has an attempt limit and reports a
//!   timeout instead of spinning forever.
//! - **Fixed-Point Arithmetic**: No FPU required, bit-exact with the Bosch
//!   32-bit integer routine.
//! - **Typestate Pattern**: Prevents measuring before initialization.
//! - **`defmt`** (optional feature): `defmt::Format` on all public types and
//!   driver-internal trace logging.
//!
//! ## Units
//! - **Temperature**: Centigrade (C * 100) -> 2350 = 23.50 °C
//! - **Humidity**: 1/1024 percent (RH % * 1024) -> 47445 = 46.333 %
//! - **Pressure**: Pascal (Pa) -> 101325 = 1013.25 hPa

mod fmt;

pub mod calc;
mod settings;

use core::marker::PhantomData;
use embedded_hal::{delay::DelayNs, i2c};

pub use calc::{CompensationError, CompensationState, HUMIDITY_MAX_RAW};
pub use settings::*;

/// Register map.
mod regs {
    pub const CALIB_TP: u8 = 0x88;
    pub const CALIB_TP_LEN: usize = 24;
    pub const CALIB_H1: u8 = 0xA1;
    pub const CHIP_ID: u8 = 0xD0;
    pub const SOFT_RESET: u8 = 0xE0;
    pub const CALIB_H: u8 = 0xE1;
    pub const CALIB_H_LEN: usize = 7;
    pub const CTRL_HUM: u8 = 0xF2;
    pub const STATUS: u8 = 0xF3;
    pub const CTRL_MEAS: u8 = 0xF4;
    pub const CONFIG: u8 = 0xF5;
    pub const PRESS_MSB: u8 = 0xF7;
    pub const DATA_LEN: usize = 8;

    pub const EXPECTED_CHIP_ID: u8 = 0x60;
    pub const RESET_COMMAND: u8 = 0xB6;
    pub const RESET_SETTLE_MS: u32 = 10;

    pub const STATUS_IM_UPDATE: u8 = 1 << 0;
    pub const STATUS_MEASURING: u8 = 1 << 3;
    pub const MODE_MASK: u8 = 0b11;
}

// --- Typestates ---

pub struct Idle;
/// Sensor has been created but calibration data has not been read yet.
pub struct Uninitialized;
/// Calibration is loaded; the sensor can be configured and sampled.
pub struct Ready;

/// Error types for the BME280 driver.
pub mod error {
    use crate::calc::CompensationError;

    /// Errors that can occur during communication, setup or compensation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum Bme280Error<E> {
        /// I2C bus error.
        I2CError(E),
        /// The chip id register did not read `0x60`. Carries the value read.
        IdentityMismatch(u8),
        /// The NVM copy flag did not clear within the polling bounds.
        CalibrationTimeout,
        /// The measuring flag did not clear within the polling bounds.
        MeasurementTimeout,
        /// A forced measurement was requested while the sensor is not in sleep mode.
        NotIdle,
        /// The pressure polynomial produced a zero divisor.
        DivisionByZero,
        /// Pressure or humidity was compensated before temperature.
        TemperatureNotCompensated,
    }

    impl<E> From<CompensationError> for Bme280Error<E> {
        fn from(value: CompensationError) -> Self {
            match value {
                CompensationError::DivisionByZero => Bme280Error::DivisionByZero,
                CompensationError::TemperatureNotCompensated => {
                    Bme280Error::TemperatureNotCompensated
                }
            }
        }
    }

    /// Result type alias for BME280 operations.
    pub type Result<T, E> = core::result::Result<T, Bme280Error<E>>;
}

/// Bus address selected by the SDO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Address {
    /// SDO tied to GND.
    Low = 0x76,
    /// SDO tied to VDDIO.
    High = 0x77,
}

impl Address {
    /// 7-bit address as used by `embedded-hal`.
    pub fn seven_bit(self) -> u8 {
        self as u8
    }

    /// Address byte on the wire with the R/W bit cleared (`0xEC` / `0xEE`).
    pub fn wire_byte(self) -> u8 {
        (self as u8) << 1
    }
}

/// Duration wrapper for type-safety. Stored in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Milliseconds(pub u32);

/// Factory-fused calibration coefficients read from the sensor.
///
/// Unique to every chip and immutable once loaded.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibData {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    /// 12-bit signed, range -2048..=2047.
    pub dig_h4: i16,
    /// 12-bit signed, range -2048..=2047.
    pub dig_h5: i16,
    pub dig_h6: i8,
}

/// Sign-extends a 12-bit two's-complement value.
pub(crate) fn sign_extend_12(raw: u16) -> i16 {
    let raw = raw & 0x0FFF;
    if raw & 0x0800 != 0 {
        (raw | 0xF000) as i16
    } else {
        raw as i16
    }
}

impl CalibData {
    /// Decodes the three calibration areas.
    ///
    /// - `tp`: 24 bytes from 0x88 (T1..T3, P1..P9, little-endian words)
    /// - `h1`: the byte at 0xA1
    /// - `h`: 7 bytes from 0xE1 (H2, H3, the packed H4/H5 nibbles, H6)
    pub fn from_registers(
        tp: &[u8; regs::CALIB_TP_LEN],
        h1: u8,
        h: &[u8; regs::CALIB_H_LEN],
    ) -> Self {
        let word = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);

        // 0xE4 holds H4[11:4], 0xE5 holds H5[3:0] | H4[3:0], 0xE6 holds H5[11:4].
        let h4 = ((h[3] as u16) << 4) | (h[4] as u16 & 0x0F);
        let h5 = ((h[5] as u16) << 4) | (h[4] as u16 >> 4);

        CalibData {
            dig_t1: word(0),
            dig_t2: word(2) as i16,
            dig_t3: word(4) as i16,
            dig_p1: word(6),
            dig_p2: word(8) as i16,
            dig_p3: word(10) as i16,
            dig_p4: word(12) as i16,
            dig_p5: word(14) as i16,
            dig_p6: word(16) as i16,
            dig_p7: word(18) as i16,
            dig_p8: word(20) as i16,
            dig_p9: word(22) as i16,
            dig_h1: h1,
            dig_h2: i16::from_le_bytes([h[0], h[1]]),
            dig_h3: h[2],
            dig_h4: sign_extend_12(h4),
            dig_h5: sign_extend_12(h5),
            dig_h6: h[6] as i8,
        }
    }
}

/// Raw ADC output read directly from the data registers.
///
/// A channel whose oversampling is `Skipped` reports a fixed marker code.
/// That is not an error; it still compensates to a (meaningless) value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawData {
    /// 20-bit pressure code.
    pub adc_pressure: u32,
    /// 20-bit temperature code.
    pub adc_temperature: u32,
    /// 16-bit humidity code.
    pub adc_humidity: u16,
}

impl RawData {
    /// Unpacks the 8-byte burst starting at `press_msb` (0xF7).
    pub fn from_bytes(buffer: &[u8; regs::DATA_LEN]) -> Self {
        let adc_pressure =
            ((buffer[0] as u32) << 12) | ((buffer[1] as u32) << 4) | ((buffer[2] as u32) >> 4);
        let adc_temperature =
            ((buffer[3] as u32) << 12) | ((buffer[4] as u32) << 4) | ((buffer[5] as u32) >> 4);
        let adc_humidity = ((buffer[6] as u16) << 8) | buffer[7] as u16;

        RawData {
            adc_pressure,
            adc_temperature,
            adc_humidity,
        }
    }
}

/// Decoded `status` register (0xF3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// A conversion is running.
    pub measuring: bool,
    /// NVM calibration data is being copied into the image registers.
    pub im_update: bool,
}

impl Status {
    pub fn from_bits(value: u8) -> Self {
        Status {
            measuring: value & regs::STATUS_MEASURING != 0,
            im_update: value & regs::STATUS_IM_UPDATE != 0,
        }
    }
}

/// Represents temperature in Centigrade (degrees Celsius * 100).
///
/// # Example
/// A value of `2350` represents **23.50 °C**.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature(pub i32);

impl Temperature {
    /// Splits the fixed-point value into integral (degrees) and fractional (decimals) parts.
    ///
    /// # Example
    /// ```rust
    /// use bme280_driver::Temperature;
    /// let temp = Temperature(2350);
    /// assert_eq!(temp.split(), (23, 50)); // Represents 23.50 °C
    /// ```
    pub fn split(&self) -> (i32, i32) {
        (self.0 / 100, self.0 % 100)
    }
}

/// Represents relative humidity in 1/1024 percent (Q22.10).
///
/// # Example
/// A value of `47445` represents **46.333 %rH**.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Humidity(pub u32);

impl Humidity {
    /// Splits the fixed-point value into whole percent and milli-percent.
    ///
    /// # Example
    /// ```rust
    /// use bme280_driver::Humidity;
    /// let hum = Humidity(47445);
    /// assert_eq!(hum.split(), (46, 333)); // Represents 46.333 %
    /// ```
    pub fn split(&self) -> (u32, u32) {
        (self.0 >> 10, ((self.0 & 0x3FF) * 1000) >> 10)
    }
}

/// Represents atmospheric pressure in Pascal (Pa).
///
/// # Example
/// A value of `101325` represents **101325 Pa** (or 1013.25 hPa).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pressure(pub u32);

impl Pressure {
    /// Converts the raw Pascal value to Hectopascal (hPa) and splits it into parts.
    ///
    /// # Example
    /// ```rust
    /// use bme280_driver::Pressure;
    /// let press = Pressure(101325);
    /// assert_eq!(press.as_hpa(), (1013, 25)); // Represents 1013.25 hPa
    /// ```
    pub fn as_hpa(&self) -> (u32, u32) {
        (self.0 / 100, self.0 % 100)
    }
}

/// Compensated measurement result in physical units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Temperature data.
    pub temp: Temperature,
    /// Humidity data.
    pub hum: Humidity,
    /// Atmospheric pressure data.
    pub pres: Pressure,
}

impl Measurement {
    /// `(centi-°C, 1/1024 %RH, Pa)`.
    pub fn as_tuple(&self) -> (i32, u32, u32) {
        (self.temp.0, self.hum.0, self.pres.0)
    }
}

/// Probes the low address, then the high address.
///
/// Returns the first address that acknowledges an empty write, or `None` if
/// neither does. There is no retry; a missing sensor is reported after one
/// probe of each address.
pub fn discover<I2C: i2c::I2c>(i2c: &mut I2C) -> Option<Address> {
    for address in [Address::Low, Address::High] {
        trace!("probing {=u8:#x}", address.wire_byte());
        if i2c.write(address.seven_bit(), &[]).is_ok() {
            debug!("sensor acknowledged at {=u8:#x}", address.wire_byte());
            return Some(address);
        }
    }
    warn!("no sensor acknowledged on either address");
    None
}

/// The main BME280 driver structure.
///
/// Use `Bme280::new(...)` to start. The `STATE` generic uses the Typestate pattern
/// to track initialization status at compile time.
#[derive(Debug)]
pub struct Bme280<I2C, STATE> {
    i2c: I2C,
    address: Address,
    pub(crate) calib_data: CalibData,
    comp_state: CompensationState,
    config: Config,
    _state: PhantomData<STATE>,
}

impl<I2C, E> Bme280<I2C, Idle>
where
    I2C: i2c::I2c<Error = E>,
{
    /// Creates a new driver instance in the `Uninitialized` state.
    ///
    /// This does not communicate with the sensor yet. Use [`discover`] first
    /// if the address is not known.
    pub fn new(i2c: I2C, address: Address) -> Bme280<I2C, Uninitialized> {
        Bme280 {
            i2c,
            address,
            calib_data: CalibData::default(),
            comp_state: CompensationState::new(),
            config: Config::after_reset(),
            _state: PhantomData,
        }
    }
}

impl<I2C, STATE, E> Bme280<I2C, STATE>
where
    I2C: i2c::I2c<Error = E>,
{
    /// Address this instance talks to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Gives the bus back, consuming the driver.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Reads the Chip ID from the sensor (expected value: 0x60).
    pub fn read_chip_id(&mut self) -> error::Result<u8, E> {
        self.read_reg_byte(regs::CHIP_ID)
    }

    /// Reads and decodes the status register.
    pub fn read_status(&mut self) -> error::Result<Status, E> {
        Ok(Status::from_bits(self.read_reg_byte(regs::STATUS)?))
    }

    /// Writes the reset command and waits for the chip to come back.
    fn reset(&mut self, delay: &mut impl DelayNs) -> error::Result<(), E> {
        debug!("soft reset");
        self.write_reg(regs::SOFT_RESET, regs::RESET_COMMAND)?;
        delay.delay_ms(regs::RESET_SETTLE_MS);
        Ok(())
    }

    /// Polls `im_update` until the NVM copy has finished.
    fn wait_for_calibration(
        &mut self,
        delay: &mut impl DelayNs,
        polling: &Polling,
    ) -> error::Result<(), E> {
        for _ in 0..polling.attempts {
            if !self.read_status()?.im_update {
                return Ok(());
            }
            delay.delay_ms(polling.interval.0);
        }
        warn!("calibration copy still running after {=u16} polls", polling.attempts);
        Err(error::Bme280Error::CalibrationTimeout)
    }

    /// Reads the three calibration areas and decodes them.
    fn read_calib_data(&mut self) -> error::Result<CalibData, E> {
        let mut tp = [0u8; regs::CALIB_TP_LEN];
        let mut h = [0u8; regs::CALIB_H_LEN];

        self.read_into(regs::CALIB_TP, &mut tp)?;
        let h1 = self.read_reg_byte(regs::CALIB_H1)?;
        self.read_into(regs::CALIB_H, &mut h)?;

        Ok(CalibData::from_registers(&tp, h1, &h))
    }

    /// Reads data from a starting register address into a provided buffer.
    ///
    /// One `write_read` is one uninterrupted bus transaction.
    fn read_into(&mut self, reg_address: u8, buffer: &mut [u8]) -> error::Result<(), E> {
        self.i2c
            .write_read(self.address.seven_bit(), &[reg_address], buffer)
            .map_err(error::Bme280Error::I2CError)
    }

    /// Reads a single byte from a specific register address.
    fn read_reg_byte(&mut self, reg_address: u8) -> error::Result<u8, E> {
        let mut buffer = [0];
        self.read_into(reg_address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Writes one register.
    fn write_reg(&mut self, reg_address: u8, value: u8) -> error::Result<(), E> {
        self.i2c
            .write(self.address.seven_bit(), &[reg_address, value])
            .map_err(error::Bme280Error::I2CError)
    }
}

impl<I2C, E> Bme280<I2C, Uninitialized>
where
    I2C: i2c::I2c<Error = E>,
{
    /// Verifies the chip id, resets the sensor and loads its calibration data.
    ///
    /// The sensor is left in its post-reset state (sleep, all channels skipped).
    /// This transitions the driver state from `Uninitialized` to `Ready`.
    ///
    /// # Errors
    /// - `IdentityMismatch` if the chip id is not `0x60`.
    /// - `CalibrationTimeout` if `im_update` stays set for all `polling.attempts`.
    /// - `I2CError` on any bus failure.
    pub fn init(
        mut self,
        delay: &mut impl DelayNs,
        polling: &Polling,
    ) -> error::Result<Bme280<I2C, Ready>, E> {
        let chip_id = self.read_chip_id()?;
        if chip_id != regs::EXPECTED_CHIP_ID {
            warn!("unexpected chip id {=u8:#x}", chip_id);
            return Err(error::Bme280Error::IdentityMismatch(chip_id));
        }

        self.reset(delay)?;
        self.wait_for_calibration(delay, polling)?;

        let calib_data = self.read_calib_data()?;
        trace!("calibration loaded: {}", calib_data);

        Ok(Bme280 {
            i2c: self.i2c,
            address: self.address,
            calib_data,
            comp_state: CompensationState::new(),
            config: Config {
                calib_poll: *polling,
                ..Config::after_reset()
            },
            _state: PhantomData,
        })
    }

    /// Initializes the sensor and applies `config` in one step.
    ///
    /// Equivalent to [`init`](Self::init) with `config.calib_poll` followed by
    /// [`configure`](Bme280::configure).
    pub fn begin(
        self,
        delay: &mut impl DelayNs,
        config: &Config,
    ) -> error::Result<Bme280<I2C, Ready>, E> {
        let mut sensor = self.init(delay, &config.calib_poll)?;
        sensor.configure(config)?;
        Ok(sensor)
    }
}

impl<I2C, E> Bme280<I2C, Ready>
where
    I2C: i2c::I2c<Error = E>,
{
    /// Factory calibration read during initialization.
    pub fn calibration(&self) -> &CalibData {
        &self.calib_data
    }

    /// Configuration last written to the sensor.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Writes mode, oversampling, filter and standby time.
    ///
    /// `ctrl_hum` only takes effect after a write to `ctrl_meas`, so the
    /// registers are always written in the order `ctrl_hum`, `config`,
    /// `ctrl_meas`.
    pub fn configure(&mut self, config: &Config) -> error::Result<(), E> {
        let ctrl_hum = config.ctrl_hum();
        let config_reg = config.config_reg();
        let ctrl_meas = config.ctrl_meas();
        debug!(
            "configure: ctrl_hum={=u8:#x} config={=u8:#x} ctrl_meas={=u8:#x}",
            ctrl_hum,
            config_reg,
            ctrl_meas
        );

        self.write_reg(regs::CTRL_HUM, ctrl_hum)?;
        self.write_reg(regs::CONFIG, config_reg)?;
        self.write_reg(regs::CTRL_MEAS, ctrl_meas)?;

        self.config = *config;
        Ok(())
    }

    /// Resets the sensor, waits for the calibration copy and re-applies the
    /// current configuration.
    pub fn soft_reset(&mut self, delay: &mut impl DelayNs) -> error::Result<(), E> {
        let config = self.config;
        self.reset(delay)?;
        self.wait_for_calibration(delay, &config.calib_poll)?;
        self.configure(&config)
    }

    /// Starts a single measurement and waits until the sensor is done.
    ///
    /// # Errors
    /// - `NotIdle` if the mode field is not `Sleep` (normal mode, or a
    ///   previous forced cycle still running). Nothing is written in that case.
    /// - `MeasurementTimeout` if `measuring` stays set for all
    ///   `config.meas_poll.attempts`.
    pub fn trigger_forced(&mut self, delay: &mut impl DelayNs) -> error::Result<(), E> {
        let ctrl_meas = self.read_reg_byte(regs::CTRL_MEAS)?;
        if Mode::from_bits(ctrl_meas) != Mode::Sleep {
            warn!("forced trigger refused, ctrl_meas={=u8:#x}", ctrl_meas);
            return Err(error::Bme280Error::NotIdle);
        }

        self.write_reg(
            regs::CTRL_MEAS,
            (ctrl_meas & !regs::MODE_MASK) | Mode::Forced as u8,
        )?;

        let polling = self.config.meas_poll;
        for _ in 0..polling.attempts {
            if !self.read_status()?.measuring {
                return Ok(());
            }
            delay.delay_ms(polling.interval.0);
        }
        warn!("measurement still running after {=u16} polls", polling.attempts);
        Err(error::Bme280Error::MeasurementTimeout)
    }

    /// Burst-reads pressure, temperature and humidity codes in one transaction.
    ///
    /// Separate reads could mix two conversions while the sensor runs in
    /// normal mode.
    pub fn read_raw(&mut self) -> error::Result<RawData, E> {
        let mut buffer = [0u8; regs::DATA_LEN];
        self.read_into(regs::PRESS_MSB, &mut buffer)?;

        let raw = RawData::from_bytes(&buffer);
        trace!("raw sample: {}", raw);
        Ok(raw)
    }

    /// Compensates `raw` as one cycle: temperature, then humidity, then pressure.
    pub fn compensate(&mut self, raw: &RawData) -> error::Result<Measurement, E> {
        self.comp_state.invalidate();

        let temp = self
            .calib_data
            .compensate_temperature(raw, &mut self.comp_state);
        let hum = self.calib_data.compensate_humidity(raw, &self.comp_state)?;
        let pres = self.calib_data.compensate_pressure(raw, &self.comp_state)?;

        Ok(Measurement { temp, hum, pres })
    }

    /// Reads the latest conversion results and compensates them.
    ///
    /// Does not start a conversion; use this directly in normal mode, or after
    /// [`trigger_forced`](Self::trigger_forced).
    pub fn sample(&mut self) -> error::Result<Measurement, E> {
        let raw = self.read_raw()?;
        self.compensate(&raw)
    }

    /// Triggers a forced measurement, waits for it and returns compensated data.
    pub fn measure_forced(&mut self, delay: &mut impl DelayNs) -> error::Result<Measurement, E> {
        self.trigger_forced(delay)?;
        self.sample()
    }
}
