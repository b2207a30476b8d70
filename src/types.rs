//! Type aliases for consistent numeric types throughout the codebase.
//!
//! Keeping these as named aliases instead of bare `u32`/`f32` throughout the
//! crate makes the unit of a value part of its type signature at call sites.

/// Timestamp in milliseconds since boot (monotonic, never wraps to wall time).
pub type TimestampMs = u32;

/// Duration in milliseconds.
pub type DurationMs = u32;

/// Current in milliamps.
pub type MilliAmps = i32;

/// Voltage in volts.
pub type Volts = f32;

/// Temperature in degrees Celsius.
pub type Celsius = f32;

/// Ampere-hours.
pub type AmpHours = f32;

/// PWM duty register value, pre-inversion, in [0, 255].
pub type Duty = u8;

pub mod conversions {
    use super::*;

    pub fn ms_to_hours(ms: DurationMs) -> f32 {
        ms as f32 / 3_600_000.0
    }

    pub fn seconds_to_ms(seconds: u32) -> DurationMs {
        seconds.saturating_mul(1000)
    }

    pub fn ms_to_seconds(ms: DurationMs) -> u32 {
        ms / 1000
    }
}
