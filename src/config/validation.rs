use super::ConfigError;

pub fn validate_battery_capacity(value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1000.0 {
        Ok(())
    } else {
        Err(ConfigError::BatteryCapacityOutOfRange)
    }
}

pub fn validate_threshold_percentage(value: f32) -> Result<(), ConfigError> {
    if (0.1..=5.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdPercentageOutOfRange)
    }
}

pub fn validate_max_allowed_current(value: f32) -> Result<(), ConfigError> {
    if (1000.0..=15000.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::MaxAllowedCurrentOutOfRange)
    }
}

pub fn validate_bulk_voltage(value: f32) -> Result<(), ConfigError> {
    if (12.0..=15.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::BulkVoltageOutOfRange)
    }
}

pub fn validate_absorption_voltage(value: f32) -> Result<(), ConfigError> {
    if (12.0..=15.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::AbsorptionVoltageOutOfRange)
    }
}

pub fn validate_float_voltage(value: f32) -> Result<(), ConfigError> {
    if (12.0..=15.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FloatVoltageOutOfRange)
    }
}

/// Cross-field invariant: `float <= absorption <= bulk <= 15.0`.
pub fn validate_voltage_ordering(float_v: f32, absorption_v: f32, bulk_v: f32) -> Result<(), ConfigError> {
    if float_v <= absorption_v && absorption_v <= bulk_v && bulk_v <= 15.0 {
        Ok(())
    } else {
        Err(ConfigError::VoltageOrderingViolated)
    }
}

pub fn validate_dc_source_amps(value: f32) -> Result<(), ConfigError> {
    if (0.0..=50.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::DcSourceAmpsOutOfRange)
    }
}

pub fn validate_factor_divider(value: u8) -> Result<(), ConfigError> {
    if (1..=10).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::FactorDividerOutOfRange)
    }
}
