//! Supervisor link: a line-buffered ASCII command reader, `CMD:*` dispatch,
//! and the JSON snapshot writer. Framing mirrors the donor crate's
//! line-oriented command handling in spirit (accumulate into a bounded
//! buffer, act on `\n`) but is reworked for plain ASCII rather than a
//! 64-byte HID report.

use heapless::String;
use serde::Serialize;

use crate::config::Tunables;
use crate::error_handling::EventNote;
use crate::state_machine::ChargeState;
use crate::types::{Celsius, Duty, MilliAmps, TimestampMs, Volts};

pub const MAX_LINE_LENGTH: usize = 200;
pub const HEARTBEAT_INTERVAL_MS: TimestampMs = 30_000;
const HEARTBEAT_TEXT: &str = "HEARTBEAT:ESP32 Online";
pub const MAX_LOAD_OFF_SECONDS: u32 = 28_800;

/// Accumulates bytes until a `\n`, discarding the buffer on overflow
/// instead of ever returning a partial line (§4.7).
pub struct LineReader {
    buffer: String<MAX_LINE_LENGTH>,
    overflowed: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte; returns `Some(line)` once a `\n` completes it.
    /// A line that overflowed `MAX_LINE_LENGTH` is discarded silently and
    /// reported as `None` forever until the next `\n`.
    pub fn feed(&mut self, byte: u8) -> Option<String<MAX_LINE_LENGTH>> {
        if byte == b'\n' {
            let overflowed = self.overflowed;
            let line = core::mem::take(&mut self.buffer);
            self.overflowed = false;
            return if overflowed { None } else { Some(line) };
        }
        if byte == b'\r' {
            return None;
        }
        if self.buffer.push(byte as char).is_err() {
            self.overflowed = true;
            self.buffer.clear();
        }
        None
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<'a> {
    GetData,
    Set(&'a str, &'a str),
    ToggleLoad(u32),
    CancelTempOff,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseError {
    Empty,
    UnknownVerb,
    MissingArgument,
    InvalidNumber,
}

/// Parses one already-delimited line into a `Command` (§4.7, §6).
pub fn parse_command(line: &str) -> Result<Command<'_>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let rest = line.strip_prefix("CMD:").ok_or(ParseError::UnknownVerb)?;

    if rest == "GET_DATA" {
        return Ok(Command::GetData);
    }
    if rest == "CANCEL_TEMP_OFF" {
        return Ok(Command::CancelTempOff);
    }
    if let Some(arg) = rest.strip_prefix("TOGGLE_LOAD:") {
        let seconds: u32 = arg.parse().map_err(|_| ParseError::InvalidNumber)?;
        return Ok(Command::ToggleLoad(seconds.clamp(1, MAX_LOAD_OFF_SECONDS)));
    }
    if let Some(arg) = rest.strip_prefix("SET_") {
        let mut parts = arg.splitn(2, ':');
        let param = parts.next().ok_or(ParseError::MissingArgument)?;
        let value = parts.next().ok_or(ParseError::MissingArgument)?;
        return Ok(Command::Set(param, value));
    }
    Err(ParseError::UnknownVerb)
}

/// Applies a `SET_<param>:<value>` against a live `Tunables`, using the
/// same per-field validation as every other write path (§4.7: "exactly as
/// listed in §3").
pub fn apply_set(tunables: &mut Tunables, param: &str, value: &str) -> Result<(), String<64>> {
    let invalid = || String::<64>::try_from("Invalid value").unwrap_or_default();
    let bad_number = || String::<64>::try_from("Invalid number").unwrap_or_default();

    match param {
        "battery_capacity" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_battery_capacity_ah(v).map_err(|_| invalid())
        }
        "threshold_percentage" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_threshold_percentage(v).map_err(|_| invalid())
        }
        "max_allowed_current" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_max_allowed_current_ma(v).map_err(|_| invalid())
        }
        "bulk_voltage" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_bulk_voltage_v(v).map_err(|_| invalid())
        }
        "absorption_voltage" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_absorption_voltage_v(v).map_err(|_| invalid())
        }
        "float_voltage" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_float_voltage_v(v).map_err(|_| invalid())
        }
        "is_lithium" => {
            tunables.set_is_lithium(value == "1" || value.eq_ignore_ascii_case("true"));
            Ok(())
        }
        "use_dc_source" => {
            tunables.set_use_dc_source(value == "1" || value.eq_ignore_ascii_case("true"));
            Ok(())
        }
        "dc_source_amps" => {
            let v: f32 = value.parse().map_err(|_| bad_number())?;
            tunables.set_dc_source_amps(v).map_err(|_| invalid())
        }
        "factor_divider" => {
            let v: u8 = value.parse().map_err(|_| bad_number())?;
            tunables.set_factor_divider(v).map_err(|_| invalid())
        }
        _ => Err(String::<64>::try_from("Unknown parameter").unwrap_or_default()),
    }
}

/// The full `DATA:{...}` snapshot body (§6). Field names match the wire
/// contract exactly, including its mixed-case/underscore inconsistency.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    #[serde(rename = "panelToBatteryCurrent")]
    pub panel_to_battery_current: MilliAmps,
    #[serde(rename = "batteryToLoadCurrent")]
    pub battery_to_load_current: MilliAmps,
    #[serde(rename = "voltagePanel")]
    pub voltage_panel: Volts,
    #[serde(rename = "voltageBatterySensor2")]
    pub voltage_battery_sensor2: Volts,
    #[serde(rename = "currentPWM")]
    pub current_pwm: Duty,
    pub temperature: Celsius,
    #[serde(rename = "chargeState")]
    pub charge_state: &'static str,
    #[serde(rename = "bulkVoltage")]
    pub bulk_voltage: Volts,
    #[serde(rename = "absorptionVoltage")]
    pub absorption_voltage: Volts,
    #[serde(rename = "floatVoltage")]
    pub float_voltage: Volts,
    #[serde(rename = "LVD")]
    pub lvd: Volts,
    #[serde(rename = "LVR")]
    pub lvr: Volts,
    #[serde(rename = "batteryCapacity")]
    pub battery_capacity: f32,
    #[serde(rename = "thresholdPercentage")]
    pub threshold_percentage: f32,
    #[serde(rename = "maxAllowedCurrent")]
    pub max_allowed_current: f32,
    #[serde(rename = "isLithium")]
    pub is_lithium: bool,
    #[serde(rename = "maxBatteryVoltageAllowed")]
    pub max_battery_voltage_allowed: Volts,
    #[serde(rename = "absorptionCurrentThreshold_mA")]
    pub absorption_current_threshold_ma: f32,
    #[serde(rename = "currentLimitIntoFloatStage")]
    pub current_limit_into_float_stage: f32,
    #[serde(rename = "calculatedAbsorptionHours")]
    pub calculated_absorption_hours: f32,
    #[serde(rename = "accumulatedAh")]
    pub accumulated_ah: f32,
    #[serde(rename = "estimatedSOC")]
    pub estimated_soc: f32,
    #[serde(rename = "netCurrent")]
    pub net_current: MilliAmps,
    #[serde(rename = "factorDivider")]
    pub factor_divider: u8,
    #[serde(rename = "useFuenteDC")]
    pub use_fuente_dc: bool,
    #[serde(rename = "fuenteDC_Amps")]
    pub fuente_dc_amps: f32,
    #[serde(rename = "maxBulkHours")]
    pub max_bulk_hours: f32,
    #[serde(rename = "currentBulkHours")]
    pub current_bulk_hours: f32,
    #[serde(rename = "panelSensorAvailable")]
    pub panel_sensor_available: bool,
    #[serde(rename = "temporaryLoadOff")]
    pub temporary_load_off: bool,
    #[serde(rename = "loadOffRemainingSeconds")]
    pub load_off_remaining_seconds: u32,
    #[serde(rename = "loadOffDuration")]
    pub load_off_duration: u32,
    #[serde(rename = "loadOffMaxDuration")]
    pub load_off_max_duration: u32,
    #[serde(rename = "loadControlState")]
    pub load_control_state: bool,
    #[serde(rename = "notaPersonalizada")]
    pub nota_personalizada: String<96>,
    pub connected: bool,
    pub firmware_version: &'static str,
    pub uptime: TimestampMs,
}

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

impl Snapshot {
    /// Serializes to a `DATA:{...}` line using the no_std JSON encoder
    /// (§9: "never by ad hoc string concatenation").
    pub fn to_json_line<const N: usize>(&self) -> Result<String<N>, ()> {
        let mut buf = [0u8; N];
        let len = serde_json_core::to_slice(self, &mut buf).map_err(|_| ())?;
        let mut out = String::new();
        out.push_str("DATA:").map_err(|_| ())?;
        for &b in &buf[..len] {
            out.push(b as char).map_err(|_| ())?;
        }
        Ok(out)
    }
}

pub fn charge_state_str(state: ChargeState) -> &'static str {
    state.as_str()
}

pub fn ok_response(message: &str) -> String<128> {
    let mut s = String::new();
    let _ = s.push_str("OK:");
    let _ = s.push_str(message);
    s
}

pub fn error_response(reason: &str) -> String<128> {
    let mut s = String::new();
    let _ = s.push_str("ERROR:");
    let _ = s.push_str(reason);
    s
}

pub fn heartbeat_line() -> &'static str {
    HEARTBEAT_TEXT
}

/// Tracks whether a 30 s heartbeat is due (§5, §6).
pub struct Heartbeat {
    last_emitted_ms: Option<TimestampMs>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self { last_emitted_ms: None }
    }

    pub fn due(&mut self, now_ms: TimestampMs) -> bool {
        match self.last_emitted_ms {
            None => {
                self.last_emitted_ms = Some(now_ms);
                true
            }
            Some(last) if now_ms.wrapping_sub(last) >= HEARTBEAT_INTERVAL_MS => {
                self.last_emitted_ms = Some(now_ms);
                true
            }
            _ => false,
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Updates the `notaPersonalizada` event note on a state change, safety
/// event, or protocol mutation (§7).
pub fn note_state_change(note: &mut EventNote, state: ChargeState) {
    let mut text: String<96> = String::new();
    let _ = text.push_str("Estado: ");
    let _ = text.push_str(state.as_str());
    note.set(&text);
}
