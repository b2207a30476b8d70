//! Default tunable values, used when persistence has no stored value yet.

pub const BATTERY_CAPACITY_AH: f32 = 50.0;
pub const THRESHOLD_PERCENTAGE: f32 = 1.0;
pub const MAX_ALLOWED_CURRENT_MA: f32 = 6000.0;
pub const BULK_VOLTAGE_V: f32 = 14.4;
pub const ABSORPTION_VOLTAGE_V: f32 = 14.2;
pub const FLOAT_VOLTAGE_V: f32 = 13.6;
pub const FACTOR_DIVIDER: u8 = 5;

/// Resting battery voltage above which the controller considers the bank
/// already charged at boot (§4.6 initial-state selection).
pub const CHARGED_BATTERY_REST_VOLTAGE_V: f32 = 12.88;
