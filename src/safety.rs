//! Safety supervisor: multi-sample confirmed detection of over-voltage,
//! over-temperature, and panel-current loss; LVD/LVR hysteresis for the
//! load pin; the temporary load-off timer; and the bulk re-entry timer.
//!
//! Each confirmation sequence is a small, independently testable struct
//! rather than a free-floating static, per the donor crate's
//! `SafetyMonitor`/confirmation-counter idiom generalized to this domain.

use crate::logging::{LogConfig, LogQueue};
use crate::log_safety_warn;
use crate::types::{DurationMs, TimestampMs};

pub const OVER_VOLTAGE_THRESHOLD_V: f32 = 15.0;
pub const OVER_VOLTAGE_CONFIRMATIONS: u8 = 5;
pub const OVER_VOLTAGE_INTERVAL_MS: DurationMs = 1000;

pub const TEMP_THRESHOLD_SHUTDOWN_C: f32 = 90.0;
pub const TEMP_CONFIRMATIONS: u8 = 5;
pub const TEMP_INTERVAL_MS: DurationMs = 2000;

pub const PANEL_CURRENT_LOSS_THRESHOLD_MA: i32 = 10;
pub const PANEL_CURRENT_LOSS_CONFIRMATIONS: u8 = 5;
pub const PANEL_CURRENT_LOSS_INTERVAL_MS: DurationMs = 100;

pub const LVD_V: f32 = 12.0;
pub const LVR_V: f32 = 12.5;
pub const MAX_BATTERY_VOLTAGE_ALLOWED_V: f32 = 15.0;

pub const BULK_REENTRY_VOLTAGE_V: f32 = 12.6;
pub const BULK_REENTRY_SUSTAIN_MS: DurationMs = 30_000;
pub const BULK_REENTRY_CHECK_INTERVAL_MS: DurationMs = 1000;
pub const BULK_REENTRY_CONFIRMATIONS: u8 = (BULK_REENTRY_SUSTAIN_MS / BULK_REENTRY_CHECK_INTERVAL_MS) as u8;

pub const ERROR_RECOVERY_CHECK_MS: DurationMs = 2000;
pub const ERROR_RECOVERY_MIN_VOLTAGE_V: f32 = 12.0;

pub const MAX_LOAD_OFF_MS: DurationMs = 28_800_000;
pub const ERROR_TICKLE_DUTY: u8 = 20;

/// A confirmation sequence: `threshold` must be exceeded on every check
/// spaced at least `interval_ms` apart, `count` times in a row, before the
/// condition is considered confirmed. Any check below threshold resets the
/// counter to zero.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationCounter {
    count: u8,
    last_check_ms: Option<TimestampMs>,
    threshold_count: u8,
    interval_ms: DurationMs,
}

impl ConfirmationCounter {
    pub const fn new(threshold_count: u8, interval_ms: DurationMs) -> Self {
        Self {
            count: 0,
            last_check_ms: None,
            threshold_count,
            interval_ms,
        }
    }

    /// Feed one sample. Returns `true` once `threshold_count` consecutive
    /// over-threshold checks, each separated by at least `interval_ms`,
    /// have been observed. A sample below threshold resets the counter.
    pub fn check(&mut self, now_ms: TimestampMs, over_threshold: bool) -> bool {
        if !over_threshold {
            self.count = 0;
            self.last_check_ms = None;
            return false;
        }

        let due = match self.last_check_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= self.interval_ms,
        };
        if !due {
            return self.count >= self.threshold_count;
        }

        self.last_check_ms = Some(now_ms);
        self.count = self.count.saturating_add(1);
        self.count >= self.threshold_count
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_check_ms = None;
    }

    pub fn count(&self) -> u8 {
        self.count
    }
}

/// `(active, start_ms, duration_ms)` — a timer that forces the load pin
/// OFF for `duration_ms`, clamped to `MAX_LOAD_OFF_MS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOffTimer {
    active: bool,
    start_ms: TimestampMs,
    duration_ms: DurationMs,
}

impl LoadOffTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `CMD:TOGGLE_LOAD:<seconds>` — always refreshes the timer, clamping
    /// the requested duration to `[1, MAX_LOAD_OFF_MS]`.
    pub fn activate(&mut self, now_ms: TimestampMs, requested_duration_ms: DurationMs) {
        self.active = true;
        self.start_ms = now_ms;
        self.duration_ms = requested_duration_ms.clamp(1, MAX_LOAD_OFF_MS);
    }

    /// `CMD:CANCEL_TEMP_OFF` — immediately clears the timer.
    pub fn cancel(&mut self) {
        self.active = false;
        self.duration_ms = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn duration_ms(&self) -> DurationMs {
        self.duration_ms
    }

    pub fn remaining_ms(&self, now_ms: TimestampMs) -> DurationMs {
        if !self.active {
            return 0;
        }
        let elapsed = now_ms.wrapping_sub(self.start_ms);
        self.duration_ms.saturating_sub(elapsed)
    }

    /// Advances the timer; returns `true` the instant it expires so the
    /// caller can run the §4.4 re-enable-iff-safe check exactly once.
    pub fn tick_expired(&mut self, now_ms: TimestampMs) -> bool {
        if !self.active {
            return false;
        }
        let elapsed = now_ms.wrapping_sub(self.start_ms);
        if elapsed >= self.duration_ms {
            self.active = false;
            true
        } else {
            false
        }
    }
}

/// Output of one `SafetySupervisor::evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub over_voltage_confirmed: bool,
    pub over_temperature_confirmed: bool,
    pub panel_current_lost: bool,
    pub load_pin_on: bool,
    pub force_bulk_reentry: bool,
}

pub struct SafetySupervisor {
    over_voltage: ConfirmationCounter,
    over_temperature: ConfirmationCounter,
    panel_current_loss: ConfirmationCounter,
    bulk_reentry: ConfirmationCounter,
    error_recovery: ConfirmationCounter,
    load_off_timer: LoadOffTimer,
    load_pin_on: bool,
    was_over_voltage_confirmed: bool,
    was_over_temperature_confirmed: bool,
    was_panel_current_lost: bool,
}

impl SafetySupervisor {
    pub fn new() -> Self {
        Self {
            over_voltage: ConfirmationCounter::new(OVER_VOLTAGE_CONFIRMATIONS, OVER_VOLTAGE_INTERVAL_MS),
            over_temperature: ConfirmationCounter::new(TEMP_CONFIRMATIONS, TEMP_INTERVAL_MS),
            panel_current_loss: ConfirmationCounter::new(
                PANEL_CURRENT_LOSS_CONFIRMATIONS,
                PANEL_CURRENT_LOSS_INTERVAL_MS,
            ),
            bulk_reentry: ConfirmationCounter::new(BULK_REENTRY_CONFIRMATIONS, BULK_REENTRY_CHECK_INTERVAL_MS),
            error_recovery: ConfirmationCounter::new(1, ERROR_RECOVERY_CHECK_MS),
            load_off_timer: LoadOffTimer::new(),
            load_pin_on: false,
            was_over_voltage_confirmed: false,
            was_over_temperature_confirmed: false,
            was_panel_current_lost: false,
        }
    }

    pub fn load_off_timer(&self) -> &LoadOffTimer {
        &self.load_off_timer
    }

    pub fn load_off_timer_mut(&mut self) -> &mut LoadOffTimer {
        &mut self.load_off_timer
    }

    pub fn load_pin_on(&self) -> bool {
        self.load_pin_on
    }

    /// Boot-time gate (§4.4): forces the load pin OFF if conditions are
    /// already unsafe, independent of the voltage-based initial state.
    pub fn boot_gate(&mut self, battery_v: f32, temperature_c: f32) -> bool {
        let unsafe_now = battery_v >= MAX_BATTERY_VOLTAGE_ALLOWED_V || temperature_c >= TEMP_THRESHOLD_SHUTDOWN_C;
        if unsafe_now {
            self.load_pin_on = false;
        }
        unsafe_now
    }

    /// Runs every tick, before the state machine. `duty` is the PWM duty
    /// from the previous tick (pre-adjustment), used by the panel-current
    /// loss check.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate<const N: usize>(
        &mut self,
        now_ms: TimestampMs,
        battery_v: f32,
        temperature_c: f32,
        panel_current_ma: i32,
        duty: u8,
        temp_off_active_before: bool,
        log_queue: &mut LogQueue<N>,
        log_config: &LogConfig,
    ) -> SafetyVerdict {
        let over_voltage_confirmed = self
            .over_voltage
            .check(now_ms, battery_v >= OVER_VOLTAGE_THRESHOLD_V);
        let over_temperature_confirmed = self
            .over_temperature
            .check(now_ms, temperature_c >= TEMP_THRESHOLD_SHUTDOWN_C);

        let panel_current_lost = if duty != 0 {
            self.panel_current_loss
                .check(now_ms, panel_current_ma <= PANEL_CURRENT_LOSS_THRESHOLD_MA)
        } else {
            self.panel_current_loss.reset();
            false
        };

        let force_bulk_reentry = self
            .bulk_reentry
            .check(now_ms, battery_v < BULK_REENTRY_VOLTAGE_V);

        if !temp_off_active_before {
            if battery_v < LVD_V || battery_v > MAX_BATTERY_VOLTAGE_ALLOWED_V {
                self.load_pin_on = false;
            } else if battery_v > LVR_V && battery_v < MAX_BATTERY_VOLTAGE_ALLOWED_V {
                self.load_pin_on = true;
            }
            // hysteresis band [LVD, LVR] leaves load_pin_on unchanged.
        }

        if over_voltage_confirmed && !self.was_over_voltage_confirmed {
            log_safety_warn!(log_queue, log_config, now_ms, "over-voltage confirmed at {}V", battery_v as i32);
        }
        if over_temperature_confirmed && !self.was_over_temperature_confirmed {
            log_safety_warn!(log_queue, log_config, now_ms, "over-temperature confirmed at {}C", temperature_c as i32);
        }
        if panel_current_lost && !self.was_panel_current_lost {
            log_safety_warn!(log_queue, log_config, now_ms, "panel current loss confirmed, forcing duty to 0");
        }
        self.was_over_voltage_confirmed = over_voltage_confirmed;
        self.was_over_temperature_confirmed = over_temperature_confirmed;
        self.was_panel_current_lost = panel_current_lost;

        SafetyVerdict {
            over_voltage_confirmed,
            over_temperature_confirmed,
            panel_current_lost,
            load_pin_on: self.load_pin_on,
            force_bulk_reentry,
        }
    }

    /// Runs the Error-state recovery check: all safety signals normal for
    /// one confirmation window and `battery_v >= 12.0V`.
    pub fn check_error_recovery(&mut self, now_ms: TimestampMs, battery_v: f32, all_safe: bool) -> bool {
        let clean = self.error_recovery.check(now_ms, all_safe);
        clean && battery_v >= ERROR_RECOVERY_MIN_VOLTAGE_V
    }

    /// Advances the temporary load-off timer; on expiry, re-enables the
    /// pin iff battery voltage is in the safe reconnect band, otherwise
    /// leaves it OFF (caller should record a diagnostic note).
    pub fn service_load_off_timer(&mut self, now_ms: TimestampMs, battery_v: f32) -> Option<bool> {
        if self.load_off_timer.tick_expired(now_ms) {
            let reenabled = battery_v > LVR_V && battery_v < MAX_BATTERY_VOLTAGE_ALLOWED_V;
            self.load_pin_on = reenabled;
            Some(reenabled)
        } else {
            None
        }
    }

    pub fn cancel_temp_off(&mut self, battery_v: f32) {
        self.load_off_timer.cancel();
        self.load_pin_on = battery_v > LVR_V && battery_v < MAX_BATTERY_VOLTAGE_ALLOWED_V;
    }

    pub fn force_load_off(&mut self) {
        self.load_pin_on = false;
    }
}

impl Default for SafetySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_counter_requires_consecutive_over_threshold_checks() {
        let mut c = ConfirmationCounter::new(5, 1000);
        for i in 0..4 {
            assert!(!c.check(i * 1000, true));
        }
        assert!(c.check(4000, true));
    }

    #[test]
    fn confirmation_counter_resets_on_single_clean_sample() {
        let mut c = ConfirmationCounter::new(5, 1000);
        for i in 0..4 {
            c.check(i * 1000, true);
        }
        assert!(!c.check(4000, false));
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn confirmation_counter_ignores_checks_inside_interval() {
        let mut c = ConfirmationCounter::new(2, 1000);
        assert!(!c.check(0, true));
        // second sample arrives too soon, should not advance the counter
        assert!(!c.check(500, true));
        assert!(c.check(1000, true));
    }

    fn log_fixtures() -> (LogQueue<8>, LogConfig) {
        (LogQueue::new(), LogConfig::default())
    }

    #[test]
    fn over_voltage_confirms_after_five_seconds() {
        let mut supervisor = SafetySupervisor::new();
        let (mut q, cfg) = log_fixtures();
        let mut confirmed = false;
        for i in 0..5 {
            let v = supervisor.evaluate(i * 1000, 15.1, 25.0, 2000, 100, false, &mut q, &cfg);
            confirmed = v.over_voltage_confirmed;
        }
        assert!(confirmed);
        #[cfg(feature = "safety-logs")]
        assert_eq!(q.len(), 1, "should log once on the confirming tick, not every tick after");
    }

    #[test]
    fn lvd_lvr_hysteresis_holds_band() {
        let mut supervisor = SafetySupervisor::new();
        let (mut q, cfg) = log_fixtures();
        supervisor.evaluate(0, 12.6, 25.0, 2000, 100, false, &mut q, &cfg);
        assert!(supervisor.load_pin_on());
        // inside hysteresis band: stays on
        supervisor.evaluate(1000, 12.2, 25.0, 2000, 100, false, &mut q, &cfg);
        assert!(supervisor.load_pin_on());
        supervisor.evaluate(2000, 11.9, 25.0, 2000, 100, false, &mut q, &cfg);
        assert!(!supervisor.load_pin_on());
    }

    #[test]
    fn load_off_timer_clamps_to_max() {
        let mut timer = LoadOffTimer::new();
        timer.activate(0, 50_000_000);
        assert_eq!(timer.duration_ms(), MAX_LOAD_OFF_MS);
    }

    #[test]
    fn bulk_reentry_requires_thirty_one_second_confirmations() {
        let mut supervisor = SafetySupervisor::new();
        let (mut q, cfg) = log_fixtures();
        let mut reentry = false;
        for i in 0..BULK_REENTRY_CONFIRMATIONS as u32 {
            let v = supervisor.evaluate(i * 1000, 12.3, 25.0, 2000, 100, false, &mut q, &cfg);
            reentry = v.force_bulk_reentry;
            if i + 1 < BULK_REENTRY_CONFIRMATIONS as u32 {
                assert!(!reentry, "reentry fired early at tick {i}");
            }
        }
        assert!(reentry);
    }

    #[test]
    fn bulk_reentry_resets_on_a_single_recovering_sample() {
        let mut supervisor = SafetySupervisor::new();
        let (mut q, cfg) = log_fixtures();
        for i in 0..5 {
            supervisor.evaluate(i * 1000, 12.3, 25.0, 2000, 100, false, &mut q, &cfg);
        }
        let v = supervisor.evaluate(5000, 12.9, 25.0, 2000, 100, false, &mut q, &cfg);
        assert!(!v.force_bulk_reentry);
    }

    #[test]
    fn panel_current_loss_only_checked_when_duty_nonzero() {
        let mut supervisor = SafetySupervisor::new();
        let (mut q, cfg) = log_fixtures();
        let v = supervisor.evaluate(0, 13.0, 25.0, 0, 0, false, &mut q, &cfg);
        assert!(!v.panel_current_lost);
    }
}
