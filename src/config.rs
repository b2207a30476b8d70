//! Tunable charge-controller parameters: range-checked setters, a
//! cross-field `validate()`, and the derived values recomputed whenever a
//! tunable changes. Mirrors the donor crate's `LogConfig`/`ConfigValidator`
//! pattern: setters are the single point of truth, reads are always O(1).

pub mod defaults;
pub mod validation;

use validation::{
    validate_absorption_voltage, validate_battery_capacity, validate_bulk_voltage,
    validate_dc_source_amps, validate_factor_divider, validate_float_voltage,
    validate_max_allowed_current, validate_threshold_percentage, validate_voltage_ordering,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    BatteryCapacityOutOfRange,
    ThresholdPercentageOutOfRange,
    MaxAllowedCurrentOutOfRange,
    BulkVoltageOutOfRange,
    AbsorptionVoltageOutOfRange,
    FloatVoltageOutOfRange,
    VoltageOrderingViolated,
    DcSourceAmpsOutOfRange,
    FactorDividerOutOfRange,
}

impl ConfigError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigError::BatteryCapacityOutOfRange => "battery_capacity_Ah must be in (0, 1000]",
            ConfigError::ThresholdPercentageOutOfRange => {
                "threshold_percentage must be in [0.1, 5.0]"
            }
            ConfigError::MaxAllowedCurrentOutOfRange => {
                "max_allowed_current_mA must be in [1000, 15000]"
            }
            ConfigError::BulkVoltageOutOfRange => "bulk_voltage_V must be in [12.0, 15.0]",
            ConfigError::AbsorptionVoltageOutOfRange => {
                "absorption_voltage_V must be in [12.0, 15.0]"
            }
            ConfigError::FloatVoltageOutOfRange => "float_voltage_V must be in [12.0, 15.0]",
            ConfigError::VoltageOrderingViolated => {
                "float_voltage <= absorption_voltage <= bulk_voltage <= 15.0 must hold"
            }
            ConfigError::DcSourceAmpsOutOfRange => "dc_source_amps must be in [0, 50]",
            ConfigError::FactorDividerOutOfRange => "factor_divider must be in [1, 10]",
        }
    }
}

/// Derived values recomputed after every successful tunable write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedValues {
    pub absorption_current_threshold_ma: f32,
    pub current_limit_into_float_ma: f32,
    pub max_bulk_hours: f32,
}

impl DerivedValues {
    fn recompute(tunables: &Tunables) -> Self {
        let absorption_current_threshold_ma =
            tunables.battery_capacity_ah * tunables.threshold_percentage * 10.0;
        let current_limit_into_float_ma =
            absorption_current_threshold_ma / tunables.factor_divider as f32;
        let max_bulk_hours = if tunables.use_dc_source && tunables.dc_source_amps > 0.0 {
            tunables.battery_capacity_ah / tunables.dc_source_amps
        } else {
            0.0
        };
        Self {
            absorption_current_threshold_ma,
            current_limit_into_float_ma,
            max_bulk_hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    pub battery_capacity_ah: f32,
    pub threshold_percentage: f32,
    pub max_allowed_current_ma: f32,
    pub bulk_voltage_v: f32,
    pub absorption_voltage_v: f32,
    pub float_voltage_v: f32,
    pub is_lithium: bool,
    pub use_dc_source: bool,
    pub dc_source_amps: f32,
    pub factor_divider: u8,
    derived: DerivedValues,
}

impl Tunables {
    pub fn new() -> Self {
        let mut t = Self {
            battery_capacity_ah: defaults::BATTERY_CAPACITY_AH,
            threshold_percentage: defaults::THRESHOLD_PERCENTAGE,
            max_allowed_current_ma: defaults::MAX_ALLOWED_CURRENT_MA,
            bulk_voltage_v: defaults::BULK_VOLTAGE_V,
            absorption_voltage_v: defaults::ABSORPTION_VOLTAGE_V,
            float_voltage_v: defaults::FLOAT_VOLTAGE_V,
            is_lithium: false,
            use_dc_source: false,
            dc_source_amps: 0.0,
            factor_divider: defaults::FACTOR_DIVIDER,
            derived: DerivedValues {
                absorption_current_threshold_ma: 0.0,
                current_limit_into_float_ma: 0.0,
                max_bulk_hours: 0.0,
            },
        };
        t.recompute_derived();
        t
    }

    pub fn derived(&self) -> DerivedValues {
        self.derived
    }

    fn recompute_derived(&mut self) {
        self.derived = DerivedValues::recompute(self);
    }

    pub fn set_battery_capacity_ah(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_battery_capacity(value)?;
        self.battery_capacity_ah = value;
        self.recompute_derived();
        Ok(())
    }

    pub fn set_threshold_percentage(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_threshold_percentage(value)?;
        self.threshold_percentage = value;
        self.recompute_derived();
        Ok(())
    }

    pub fn set_max_allowed_current_ma(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_max_allowed_current(value)?;
        self.max_allowed_current_ma = value;
        Ok(())
    }

    pub fn set_bulk_voltage_v(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_bulk_voltage(value)?;
        validate_voltage_ordering(self.float_voltage_v, self.absorption_voltage_v, value)?;
        self.bulk_voltage_v = value;
        Ok(())
    }

    pub fn set_absorption_voltage_v(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_absorption_voltage(value)?;
        validate_voltage_ordering(self.float_voltage_v, value, self.bulk_voltage_v)?;
        self.absorption_voltage_v = value;
        Ok(())
    }

    pub fn set_float_voltage_v(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_float_voltage(value)?;
        validate_voltage_ordering(value, self.absorption_voltage_v, self.bulk_voltage_v)?;
        self.float_voltage_v = value;
        Ok(())
    }

    /// Sets all three charge voltages together, validating each against the
    /// *incoming* trio rather than against whatever the struct currently
    /// holds. Restoring a persisted record one field at a time through the
    /// single-field setters checks each new value against fields that
    /// haven't been updated yet and can reject or silently corrupt an
    /// otherwise self-consistent set; this is the atomic alternative.
    pub fn set_voltages(&mut self, float_v: f32, absorption_v: f32, bulk_v: f32) -> Result<(), ConfigError> {
        validate_float_voltage(float_v)?;
        validate_absorption_voltage(absorption_v)?;
        validate_bulk_voltage(bulk_v)?;
        validate_voltage_ordering(float_v, absorption_v, bulk_v)?;
        self.float_voltage_v = float_v;
        self.absorption_voltage_v = absorption_v;
        self.bulk_voltage_v = bulk_v;
        Ok(())
    }

    pub fn set_is_lithium(&mut self, value: bool) {
        self.is_lithium = value;
    }

    pub fn set_use_dc_source(&mut self, value: bool) {
        self.use_dc_source = value;
        self.recompute_derived();
    }

    pub fn set_dc_source_amps(&mut self, value: f32) -> Result<(), ConfigError> {
        validate_dc_source_amps(value)?;
        self.dc_source_amps = value;
        self.recompute_derived();
        Ok(())
    }

    pub fn set_factor_divider(&mut self, value: u8) -> Result<(), ConfigError> {
        validate_factor_divider(value)?;
        self.factor_divider = value;
        self.recompute_derived();
        Ok(())
    }

    /// Full cross-field validation, used after loading a set of tunables
    /// from persistence rather than through the individual setters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_battery_capacity(self.battery_capacity_ah)?;
        validate_threshold_percentage(self.threshold_percentage)?;
        validate_max_allowed_current(self.max_allowed_current_ma)?;
        validate_bulk_voltage(self.bulk_voltage_v)?;
        validate_absorption_voltage(self.absorption_voltage_v)?;
        validate_float_voltage(self.float_voltage_v)?;
        validate_voltage_ordering(self.float_voltage_v, self.absorption_voltage_v, self.bulk_voltage_v)?;
        validate_dc_source_amps(self.dc_source_amps)?;
        validate_factor_divider(self.factor_divider)?;
        Ok(())
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}
