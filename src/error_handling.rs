//! Central fault taxonomy for the charge controller.
//!
//! Mirrors the donor crate's `SystemError`/`ErrorRecovery` split: an enum
//! carries the fault, a small dispatcher logs it with context and decides
//! whether it is recoverable. Only one path in this controller is fatal —
//! a battery sensor that cannot be read at boot — everything else is
//! handled and logged, never panicked.

use crate::logging::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    /// A shunt/voltage/temperature sample fell outside its valid range and
    /// was dropped from the running average.
    TransientSampleRejected,
    /// Panel current stayed at or below the loss threshold for the full
    /// confirmation window.
    PanelCurrentLoss,
    /// Battery voltage crossed the LVD/LVR band, toggling the load pin.
    LvdEvent,
    /// Confirmed over-voltage or over-temperature; controller entered Error.
    SafetyFault,
    /// The panel sensor could not be reached at boot or during a
    /// reachability recheck.
    PanelSensorUnavailable,
    /// The battery sensor could not be read at boot. Fatal.
    BatterySensorInitFailed,
    /// A supervisor-link line was malformed or exceeded the framing limit.
    ProtocolFramingError,
    /// Persisted `accumulated_Ah` was out of its valid range on load.
    InvalidPersistedChargeState,
    /// A `SET_` command's value failed parameter validation.
    InvalidParameter,
}

impl ControllerError {
    pub fn description(&self) -> &'static str {
        match self {
            ControllerError::TransientSampleRejected => "sample rejected as out of range",
            ControllerError::PanelCurrentLoss => "panel current loss confirmed",
            ControllerError::LvdEvent => "low-voltage disconnect/reconnect event",
            ControllerError::SafetyFault => "confirmed safety fault",
            ControllerError::PanelSensorUnavailable => "panel sensor unreachable",
            ControllerError::BatterySensorInitFailed => "battery sensor unreadable at boot",
            ControllerError::ProtocolFramingError => "malformed supervisor-link frame",
            ControllerError::InvalidPersistedChargeState => "invalid persisted accumulated_Ah",
            ControllerError::InvalidParameter => "parameter value out of range",
        }
    }

    pub fn severity(&self) -> LogLevel {
        match self {
            ControllerError::TransientSampleRejected => LogLevel::Debug,
            ControllerError::PanelCurrentLoss => LogLevel::Warn,
            ControllerError::LvdEvent => LogLevel::Info,
            ControllerError::SafetyFault => LogLevel::Error,
            ControllerError::PanelSensorUnavailable => LogLevel::Warn,
            ControllerError::BatterySensorInitFailed => LogLevel::Error,
            ControllerError::ProtocolFramingError => LogLevel::Warn,
            ControllerError::InvalidPersistedChargeState => LogLevel::Warn,
            ControllerError::InvalidParameter => LogLevel::Warn,
        }
    }

    /// Only the battery sensor boot failure halts the controller; every
    /// other fault is handled in place.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::BatterySensorInitFailed)
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Last-event diagnostic note surfaced in the JSON snapshot's
/// `notaPersonalizada` field. Updated on state changes, safety events, and
/// protocol mutations.
pub struct EventNote {
    buf: heapless::String<96>,
}

impl EventNote {
    pub fn new() -> Self {
        Self {
            buf: heapless::String::new(),
        }
    }

    pub fn set(&mut self, note: &str) {
        self.buf.clear();
        let _ = self.buf.push_str(&note[..note.len().min(96)]);
    }

    pub fn as_str(&self) -> &str {
        self.buf.as_str()
    }
}

impl Default for EventNote {
    fn default() -> Self {
        Self::new()
    }
}
