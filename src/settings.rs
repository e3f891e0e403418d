use crate::Milliseconds;

/// Power mode, bits `[1:0]` of `ctrl_meas` (0xF4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    /// No measurements, lowest power. All registers stay readable.
    Sleep = 0b00,
    /// One measurement cycle, then the sensor drops back to `Sleep` on its own.
    Forced = 0b01,
    /// Continuous measurements separated by the configured standby time.
    #[default]
    Normal = 0b11,
}

impl Mode {
    /// Decodes the mode field of a `ctrl_meas` value.
    ///
    /// Both `01` and `10` mean forced mode on the chip.
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Mode::Sleep,
            0b11 => Mode::Normal,
            _ => Mode::Forced,
        }
    }
}

/// Oversampling settings for Temperature, Pressure, and Humidity.
///
/// Higher oversampling rates reduce noise but lengthen each measurement and
/// raise the current drawn per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Oversampling {
    /// No measurement. The channel reports its reset marker value instead.
    Skipped = 0,
    /// 1x Oversampling.
    #[default]
    X1 = 1,
    /// 2x Oversampling.
    X2 = 2,
    /// 4x Oversampling.
    X4 = 3,
    /// 8x Oversampling.
    X8 = 4,
    /// 16x Oversampling.
    X16 = 5,
}

impl Oversampling {
    /// Creates an instance from a 3-bit register field.
    ///
    /// Codes `101`, `110` and `111` all select x16 on the chip.
    pub fn from_u8(value: u8) -> Self {
        match value & 0b111 {
            0 => Oversampling::Skipped,
            1 => Oversampling::X1,
            2 => Oversampling::X2,
            3 => Oversampling::X4,
            4 => Oversampling::X8,
            _ => Oversampling::X16,
        }
    }

    /// Number of ADC conversions averaged for one reported sample.
    pub fn factor(self) -> u32 {
        match self {
            Oversampling::Skipped => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }
}

/// Grouped oversampling settings for all three channels.
///
/// Use `Oversampling::Skipped` to disable a channel.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OversamplingConfig {
    /// Temperature oversampling.
    pub temp_osrs: Oversampling,
    /// Humidity oversampling.
    pub hum_osrs: Oversampling,
    /// Pressure oversampling.
    pub pres_osrs: Oversampling,
}

impl OversamplingConfig {
    /// Returns `true` if all channels are set to `Skipped`.
    pub fn is_all_skipped(&self) -> bool {
        self.temp_osrs == Oversampling::Skipped
            && self.hum_osrs == Oversampling::Skipped
            && self.pres_osrs == Oversampling::Skipped
    }
}

/// IIR filter coefficient, bits `[4:2]` of `config` (0xF5).
///
/// Smooths short-term disturbances in pressure and temperature.
/// Humidity is not filtered.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IIRFilter {
    /// Filter disabled.
    #[default]
    Off = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
    X16 = 4,
}

/// Idle time between two conversions in `Normal` mode, bits `[7:5]` of `config`.
///
/// The encoding is not monotonic: the 10 ms and 20 ms settings occupy the two
/// highest codes.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Standby {
    #[default]
    Ms0_5 = 0,
    Ms62_5 = 1,
    Ms125 = 2,
    Ms250 = 3,
    Ms500 = 4,
    Ms1000 = 5,
    Ms10 = 6,
    Ms20 = 7,
}

/// Bounds for a busy-wait on a status flag.
///
/// The sensor is polled at most `attempts` times with `interval` between two
/// polls before the driver gives up with a timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Polling {
    pub attempts: u16,
    pub interval: Milliseconds,
}

impl Polling {
    pub const fn new(attempts: u16, interval: Milliseconds) -> Self {
        Self { attempts, interval }
    }

    /// Defaults for the NVM copy after a soft reset (a few ms on real parts).
    pub const CALIBRATION: Polling = Polling::new(10, Milliseconds(10));

    /// Defaults for a forced measurement. Covers the worst case of x16 on all
    /// channels (about 113 ms).
    pub const MEASUREMENT: Polling = Polling::new(200, Milliseconds(1));
}

/// Complete configuration object for the BME280.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Operating mode written together with T and P oversampling.
    pub mode: Mode,
    /// Oversampling settings for T, P and H.
    pub osrs_config: OversamplingConfig,
    /// IIR filter setting for noise reduction.
    pub iir_filter: IIRFilter,
    /// Standby time between measurements in `Normal` mode.
    pub standby: Standby,
    /// Bounds for waiting on the calibration copy after reset.
    pub calib_poll: Polling,
    /// Bounds for waiting on a forced measurement.
    pub meas_poll: Polling,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            osrs_config: OversamplingConfig::default(),
            iir_filter: IIRFilter::default(),
            standby: Standby::default(),
            calib_poll: Polling::CALIBRATION,
            meas_poll: Polling::MEASUREMENT,
        }
    }
}

impl Config {
    pub fn builder() -> BME280Builder {
        BME280Builder::new()
    }

    /// Register contents right after a power-on or soft reset: sleep mode,
    /// all channels skipped, filter off.
    pub fn after_reset() -> Self {
        Self {
            mode: Mode::Sleep,
            osrs_config: OversamplingConfig {
                temp_osrs: Oversampling::Skipped,
                hum_osrs: Oversampling::Skipped,
                pres_osrs: Oversampling::Skipped,
            },
            ..Self::default()
        }
    }

    /// Value for `ctrl_hum` (0xF2).
    pub fn ctrl_hum(&self) -> u8 {
        (self.osrs_config.hum_osrs as u8) & 0x07
    }

    /// Value for `config` (0xF5). Bit 0 (3-wire SPI enable) and bit 1 stay clear.
    pub fn config_reg(&self) -> u8 {
        (((self.standby as u8) << 5) | ((self.iir_filter as u8) << 2)) & 0xFC
    }

    /// Value for `ctrl_meas` (0xF4).
    pub fn ctrl_meas(&self) -> u8 {
        ((self.osrs_config.temp_osrs as u8) << 5)
            | ((self.osrs_config.pres_osrs as u8) << 2)
            | (self.mode as u8)
    }
}

/// Convenience builder for a `Config`.
#[derive(Default)]
pub struct BME280Builder {
    config: Config,
}

impl BME280Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the operating mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets temperature oversampling.
    pub fn temp_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.temp_osrs = os;
        self
    }

    /// Sets humidity oversampling.
    pub fn hum_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.hum_osrs = os;
        self
    }

    /// Sets pressure oversampling.
    pub fn pres_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.pres_osrs = os;
        self
    }

    /// Sets the IIR filter coefficient.
    pub fn iir_filter(mut self, filter: IIRFilter) -> Self {
        self.config.iir_filter = filter;
        self
    }

    /// Sets the standby interval for `Normal` mode.
    pub fn standby(mut self, standby: Standby) -> Self {
        self.config.standby = standby;
        self
    }

    /// Overrides the bounds for the post-reset calibration wait.
    pub fn calibration_polling(mut self, polling: Polling) -> Self {
        self.config.calib_poll = polling;
        self
    }

    /// Overrides the bounds for the forced measurement wait.
    pub fn measurement_polling(mut self, polling: Polling) -> Self {
        self.config.meas_poll = polling;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_power_on_setup() {
        let config = Config::default();
        assert_eq!(config.ctrl_hum(), 0x01);
        assert_eq!(config.config_reg(), 0x00);
        assert_eq!(config.ctrl_meas(), 0x27);
    }

    #[test]
    fn after_reset_is_all_zero() {
        let config = Config::after_reset();
        assert!(config.osrs_config.is_all_skipped());
        assert_eq!(config.ctrl_hum(), 0x00);
        assert_eq!(config.config_reg(), 0x00);
        assert_eq!(config.ctrl_meas(), 0x00);
    }

    #[test]
    fn register_encoding() {
        let config = Config::builder()
            .mode(Mode::Forced)
            .temp_oversampling(Oversampling::X2)
            .pres_oversampling(Oversampling::X16)
            .hum_oversampling(Oversampling::X8)
            .iir_filter(IIRFilter::X16)
            .standby(Standby::Ms20)
            .build();

        assert_eq!(config.ctrl_hum(), 0b100);
        assert_eq!(config.config_reg(), 0b111_100_00);
        assert_eq!(config.ctrl_meas(), 0b010_101_01);
    }

    #[test]
    fn config_reg_never_sets_reserved_bits() {
        for standby in [Standby::Ms0_5, Standby::Ms1000, Standby::Ms20] {
            for filter in [IIRFilter::Off, IIRFilter::X4, IIRFilter::X16] {
                let config = Config::builder().standby(standby).iir_filter(filter).build();
                assert_eq!(config.config_reg() & 0x03, 0);
            }
        }
    }

    #[test]
    fn decoding_is_total() {
        assert_eq!(Mode::from_bits(0x24), Mode::Sleep);
        assert_eq!(Mode::from_bits(0x25), Mode::Forced);
        assert_eq!(Mode::from_bits(0x26), Mode::Forced);
        assert_eq!(Mode::from_bits(0x27), Mode::Normal);
        assert_eq!(Oversampling::from_u8(7), Oversampling::X16);
        assert_eq!(Oversampling::from_u8(3), Oversampling::X4);
        assert_eq!(Oversampling::X4.factor(), 4);
    }

    #[test]
    fn all_skipped() {
        let mut osrs = OversamplingConfig {
            temp_osrs: Oversampling::Skipped,
            hum_osrs: Oversampling::Skipped,
            pres_osrs: Oversampling::Skipped,
        };
        assert!(osrs.is_all_skipped());
        osrs.hum_osrs = Oversampling::X1;
        assert!(!osrs.is_all_skipped());
    }
}
