//! Integer compensation formulas.
//!
//! Every step uses 32-bit two's-complement arithmetic with division that
//! truncates toward zero, the same way the reference fixed-point routine
//! behaves. Arithmetic shifts round toward negative infinity and give
//! different low-order bits for negative intermediates, so they are not
//! used as a stand-in for the divisions below.

use crate::{CalibData, Humidity, Pressure, RawData, Temperature};

/// Upper clamp of the humidity accumulator (100 %RH in Q22.10 << 12).
pub const HUMIDITY_MAX_RAW: i32 = 419_430_400;

/// Errors raised by the pure compensation math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompensationError {
    /// The pressure polynomial evaluated to a zero divisor.
    DivisionByZero,
    /// Pressure or humidity was requested before temperature was
    /// compensated in the current cycle.
    TemperatureNotCompensated,
}

/// Fine temperature shared between the three formulas.
///
/// Only [`CalibData::compensate_temperature`] writes it. Pressure and
/// humidity compensation read it and refuse to run while it is unset, so a
/// cycle must start with [`CompensationState::invalidate`] followed by the
/// temperature step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompensationState {
    fine_temperature: Option<i32>,
}

impl CompensationState {
    pub const fn new() -> Self {
        Self {
            fine_temperature: None,
        }
    }

    /// Drops the fine temperature of the previous cycle.
    pub fn invalidate(&mut self) {
        self.fine_temperature = None;
    }

    /// `t_fine` of the current cycle, if temperature was compensated.
    pub fn fine_temperature(&self) -> Option<i32> {
        self.fine_temperature
    }

    fn require_fine(&self) -> Result<i32, CompensationError> {
        self.fine_temperature
            .ok_or(CompensationError::TemperatureNotCompensated)
    }
}

impl CalibData {
    /// Converts the raw temperature code into centi-degrees Celsius.
    ///
    /// This is the first step of every cycle: `t_fine` computed here is the
    /// temperature reference for pressure and humidity compensation.
    pub fn compensate_temperature(
        &self,
        raw: &RawData,
        state: &mut CompensationState,
    ) -> Temperature {
        let adc_t = raw.adc_temperature as i32;
        let t1 = self.dig_t1 as i32;
        let t2 = self.dig_t2 as i32;
        let t3 = self.dig_t3 as i32;

        let var1 = ((adc_t / 8) - t1 * 2).wrapping_mul(t2) / 2048;
        let delta = (adc_t / 16) - t1;
        let var2 = (delta.wrapping_mul(delta) / 4096).wrapping_mul(t3) / 16384;

        let t_fine = var1.wrapping_add(var2);
        state.fine_temperature = Some(t_fine);

        Temperature(t_fine.wrapping_mul(5).wrapping_add(128) / 256)
    }

    /// Converts the raw pressure code into Pascal.
    ///
    /// # Errors
    /// - `TemperatureNotCompensated` if `state` carries no `t_fine`.
    /// - `DivisionByZero` if the calibration makes the divisor zero.
    pub fn compensate_pressure(
        &self,
        raw: &RawData,
        state: &CompensationState,
    ) -> Result<Pressure, CompensationError> {
        let t_fine = state.require_fine()?;

        let p1 = self.dig_p1 as i32;
        let p2 = self.dig_p2 as i32;
        let p3 = self.dig_p3 as i32;
        let p4 = self.dig_p4 as i32;
        let p5 = self.dig_p5 as i32;
        let p6 = self.dig_p6 as i32;
        let p7 = self.dig_p7 as i32;
        let p8 = self.dig_p8 as i32;
        let p9 = self.dig_p9 as i32;

        let mut var1 = (t_fine / 2) - 64_000;
        let quarter = var1 / 4;
        let mut var2 = (quarter.wrapping_mul(quarter) / 2048).wrapping_mul(p6);
        var2 = var2.wrapping_add(var1.wrapping_mul(p5).wrapping_mul(2));
        var2 = (var2 / 4).wrapping_add(p4.wrapping_mul(65_536));
        var1 = ((p3.wrapping_mul(quarter.wrapping_mul(quarter) / 8192) / 8)
            .wrapping_add(p2.wrapping_mul(var1) / 2))
            / 262_144;
        var1 = (32_768 + var1).wrapping_mul(p1) / 32_768;

        if var1 == 0 {
            return Err(CompensationError::DivisionByZero);
        }

        let mut p = 1_048_576u32
            .wrapping_sub(raw.adc_pressure)
            .wrapping_sub((var2 / 4096) as u32)
            .wrapping_mul(3125);

        // Both branches stay inside u32: doubling first is only safe below 2^31.
        if p < 0x8000_0000 {
            p = (p << 1) / (var1 as u32);
        } else {
            p = (p / (var1 as u32)).wrapping_mul(2);
        }

        let eighth = p / 8;
        let var1 = p9.wrapping_mul((eighth.wrapping_mul(eighth) / 8192) as i32) / 4096;
        let var2 = ((p / 4) as i32).wrapping_mul(p8) / 8192;

        let p = (p as i32).wrapping_add(var1.wrapping_add(var2).wrapping_add(p7) / 16);
        Ok(Pressure(p as u32))
    }

    /// Converts the raw humidity code into relative humidity in 1/1024 %.
    ///
    /// The accumulator is clamped to `[0, 419430400]` before the final
    /// scale-down, so the result never exceeds 102400 (100 %RH).
    ///
    /// # Errors
    /// `TemperatureNotCompensated` if `state` carries no `t_fine`.
    pub fn compensate_humidity(
        &self,
        raw: &RawData,
        state: &CompensationState,
    ) -> Result<Humidity, CompensationError> {
        let t_fine = state.require_fine()?;

        let adc_h = raw.adc_humidity as i32;
        let h1 = self.dig_h1 as i32;
        let h2 = self.dig_h2 as i32;
        let h3 = self.dig_h3 as i32;
        let h4 = self.dig_h4 as i32;
        let h5 = self.dig_h5 as i32;
        let h6 = self.dig_h6 as i32;

        let v = t_fine.wrapping_sub(76_800);

        let offset = adc_h
            .wrapping_mul(16_384)
            .wrapping_sub(h4.wrapping_mul(1_048_576))
            .wrapping_sub(h5.wrapping_mul(v))
            .wrapping_add(16_384)
            / 32_768;

        let scale = v.wrapping_mul(h6) / 1024;
        let scale = scale
            .wrapping_mul((v.wrapping_mul(h3) / 2048).wrapping_add(32_768))
            / 1024;
        let scale = scale
            .wrapping_add(2_097_152)
            .wrapping_mul(h2)
            .wrapping_add(8192)
            / 16_384;

        let mut acc = offset.wrapping_mul(scale);
        let upper = acc / 32_768;
        acc = acc.wrapping_sub((upper.wrapping_mul(upper) / 128).wrapping_mul(h1) / 16);
        let acc = acc.clamp(0, HUMIDITY_MAX_RAW);

        Ok(Humidity((acc / 4096) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Worked example coefficients from the Bosch datasheet.
    fn datasheet_calib() -> CalibData {
        CalibData {
            dig_t1: 27504,
            dig_t2: 26435,
            dig_t3: -1000,
            dig_p1: 36477,
            dig_p2: -10685,
            dig_p3: 3024,
            dig_p4: 2855,
            dig_p5: 140,
            dig_p6: -7,
            dig_p7: 15500,
            dig_p8: -14600,
            dig_p9: 6000,
            ..CalibData::default()
        }
    }

    /// Coefficients of a typical BME280 breakout.
    fn module_calib() -> CalibData {
        CalibData {
            dig_t1: 28485,
            dig_t2: 26735,
            dig_t3: 50,
            dig_p1: 37636,
            dig_p2: -10643,
            dig_p3: 3024,
            dig_p4: 6521,
            dig_p5: -60,
            dig_p6: -7,
            dig_p7: 9900,
            dig_p8: -10230,
            dig_p9: 4285,
            dig_h1: 75,
            dig_h2: 354,
            dig_h3: 0,
            dig_h4: 340,
            dig_h5: 0,
            dig_h6: 30,
        }
    }

    fn raw(adc_pressure: u32, adc_temperature: u32, adc_humidity: u16) -> RawData {
        RawData {
            adc_pressure,
            adc_temperature,
            adc_humidity,
        }
    }

    #[test]
    fn datasheet_temperature_and_pressure() {
        let calib = datasheet_calib();
        let sample = raw(415_148, 519_888, 0);
        let mut state = CompensationState::new();

        let temp = calib.compensate_temperature(&sample, &mut state);
        assert_eq!(temp.0, 2508);
        // Truncating division; an arithmetic shift would yield 128422 here.
        assert_eq!(state.fine_temperature(), Some(128_423));

        let pres = calib.compensate_pressure(&sample, &state).unwrap();
        assert_eq!(pres.0, 100_654);
    }

    #[test]
    fn module_reference_cycle() {
        let calib = module_calib();
        let sample = raw(415_148, 519_888, 27_648);
        let mut state = CompensationState::new();

        assert_eq!(calib.compensate_temperature(&sample, &mut state).0, 2044);
        assert_eq!(state.fine_temperature(), Some(104_653));
        assert_eq!(calib.compensate_humidity(&sample, &state).unwrap().0, 32_821);
        assert_eq!(calib.compensate_pressure(&sample, &state).unwrap().0, 87_082);
    }

    #[test]
    fn pressure_and_humidity_require_temperature_first() {
        let calib = module_calib();
        let sample = raw(415_148, 519_888, 27_648);
        let mut state = CompensationState::new();

        assert_eq!(
            calib.compensate_pressure(&sample, &state),
            Err(CompensationError::TemperatureNotCompensated)
        );
        assert_eq!(
            calib.compensate_humidity(&sample, &state),
            Err(CompensationError::TemperatureNotCompensated)
        );

        calib.compensate_temperature(&sample, &mut state);
        assert!(calib.compensate_humidity(&sample, &state).is_ok());

        state.invalidate();
        assert_eq!(
            calib.compensate_humidity(&sample, &state),
            Err(CompensationError::TemperatureNotCompensated)
        );
    }

    #[test]
    fn pressure_zero_divisor() {
        let calib = CalibData {
            dig_p1: 0,
            ..module_calib()
        };
        let sample = raw(415_148, 519_888, 27_648);
        let mut state = CompensationState::new();
        calib.compensate_temperature(&sample, &mut state);

        assert_eq!(
            calib.compensate_pressure(&sample, &state),
            Err(CompensationError::DivisionByZero)
        );
    }

    #[test]
    fn humidity_is_clamped() {
        let calib = module_calib();
        let mut state = CompensationState::new();
        calib.compensate_temperature(&raw(415_148, 519_888, 0), &mut state);

        assert_eq!(calib.compensate_humidity(&raw(0, 0, 0), &state).unwrap().0, 0);
        assert_eq!(
            calib.compensate_humidity(&raw(0, 0, u16::MAX), &state).unwrap().0,
            (HUMIDITY_MAX_RAW / 4096) as u32
        );

        for adc_h in (0..=u16::MAX).step_by(257) {
            let hum = calib.compensate_humidity(&raw(0, 0, adc_h), &state).unwrap();
            assert!(hum.0 <= 102_400);
        }
    }

    #[test]
    fn skipped_channel_markers_compensate_without_error() {
        let calib = module_calib();
        let sample = raw(0x8_0000, 0x8_0000, 0x8000);
        let mut state = CompensationState::new();

        calib.compensate_temperature(&sample, &mut state);
        assert!(calib.compensate_pressure(&sample, &state).is_ok());
        assert!(calib.compensate_humidity(&sample, &state).is_ok());
    }
}
