//! `ControllerState`: the single owned record the main loop mutates, and
//! the scheduler that realizes the §5 iteration order. Everything the
//! command link and web-link collaborator touch lives here, borrowed
//! mutably only between ticks, never cloned or shared behind a cell —
//! the donor crate's single-resource-owner pattern generalized from one
//! RTIC shared-resources struct to a plain polling loop.

use heapless::String;

use crate::config::Tunables;
use crate::coulomb::CoulombCounter;
use crate::error_handling::{ControllerError, ControllerResult, EventNote};
use crate::logging::{LogConfig, LogQueue};
use crate::persistence::{PersistedRecord, PersistenceStore};
use crate::protocol::{self, Command, Heartbeat, ParseError, Snapshot};
use crate::pwm::{PwmChannel, PwmRegulator};
use crate::safety::SafetySupervisor;
use crate::signals::{RawSampleSource, Sampler, Signals};
use crate::state_machine::{self, ChargeState, StateMachine};
use crate::types::TimestampMs;

pub const TICK_INTERVAL_MS: TimestampMs = 1000;
pub const PERSIST_INTERVAL_MS: TimestampMs = 5 * 60 * 1000;
pub const MAX_LOOP_ITERATION_MS: TimestampMs = 15_000;
const LOG_QUEUE_CAPACITY: usize = 32;

/// Pin/line collaborators a bring-up crate wires up behind the `embedded`
/// feature. Kept as traits so the scheduler is host-testable.
pub trait LoadPin {
    fn set(&mut self, on: bool);
}

pub trait Watchdog {
    fn feed(&mut self);
}

pub struct ControllerState<S: RawSampleSource, C: PwmChannel, L: LoadPin> {
    pub tunables: Tunables,
    pub coulomb: CoulombCounter,
    pub safety: SafetySupervisor,
    pub state_machine: StateMachine,
    pub sampler: Sampler<S>,
    pub pwm: PwmRegulator<C>,
    pub load_pin: L,
    pub note: EventNote,
    pub logs: LogQueue<LOG_QUEUE_CAPACITY>,
    pub log_config: LogConfig,
    pub heartbeat: Heartbeat,
    pub last_tick_ms: Option<TimestampMs>,
    pub last_persist_ms: Option<TimestampMs>,
    pub last_signals: Signals,
}

impl<S: RawSampleSource, C: PwmChannel, L: LoadPin> ControllerState<S, C, L> {
    /// Boot sequence (§4.1 fatal path, §4.6 initial state, §4.4 boot gate).
    /// Fails only when the battery sensor cannot be read.
    pub fn boot(
        source: S,
        pwm_channel: C,
        mut load_pin: L,
        tunables: Tunables,
        battery_sensor_ok: bool,
        now_ms: TimestampMs,
    ) -> ControllerResult<Self> {
        let max_current = tunables.max_allowed_current_ma;
        let mut sampler = match Sampler::new(source, max_current, battery_sensor_ok) {
            Some(s) => s,
            None => return Err(ControllerError::BatterySensorInitFailed),
        };

        let boot_signals = sampler.sample(now_ms);
        let mut safety = SafetySupervisor::new();
        let unsafe_at_boot = safety.boot_gate(boot_signals.battery_voltage_v, boot_signals.battery_temperature_c);

        let initial = state_machine::initial_state(boot_signals.battery_voltage_v, tunables.is_lithium);
        let mut sm = StateMachine::new(initial, now_ms);
        sm.apply_boot_gate(unsafe_at_boot);

        // No persisted record has been loaded yet at this point (that
        // happens in `apply_persisted`, once the caller has read flash);
        // seed from the voltage-based estimate by feeding an
        // intentionally invalid persisted value.
        let mut coulomb = CoulombCounter::new();
        coulomb.restore(-1.0, tunables.battery_capacity_ah, boot_signals.battery_voltage_v);

        load_pin.set(!unsafe_at_boot);

        let mut note = EventNote::new();
        protocol::note_state_change(&mut note, sm.state());

        Ok(Self {
            tunables,
            coulomb,
            safety,
            state_machine: sm,
            sampler,
            pwm: PwmRegulator::new(pwm_channel),
            load_pin,
            note,
            logs: LogQueue::new(),
            log_config: LogConfig::default(),
            heartbeat: Heartbeat::new(),
            last_tick_ms: None,
            last_persist_ms: None,
            last_signals: boot_signals,
        })
    }

    /// Applies a persisted record loaded at boot, rejecting anything that
    /// fails cross-field validation (§7).
    pub fn apply_persisted(&mut self, record: &PersistedRecord, resting_voltage_v: f32) {
        if let Some(t) = record.to_tunables() {
            self.tunables = t;
        }
        self.coulomb
            .restore(record.accumulated_ah, self.tunables.battery_capacity_ah, resting_voltage_v);
    }

    /// Runs one `CMD:*` line to completion, mutating shared state between
    /// ticks only (§5 ordering guarantee).
    pub fn handle_command_line(&mut self, line: &str) -> String<128> {
        match protocol::parse_command(line) {
            Ok(Command::GetData) => protocol::ok_response("see DATA response"),
            Ok(Command::Set(param, value)) => {
                let old_capacity_ah = self.tunables.battery_capacity_ah;
                match protocol::apply_set(&mut self.tunables, param, value) {
                    Ok(()) => {
                        if param == "battery_capacity" {
                            // Keep accumulated_Ah, reclamp it to the new
                            // capacity's [0, 110%] band (§4.7).
                            self.coulomb
                                .rescale_capacity(old_capacity_ah, self.tunables.battery_capacity_ah);
                        }
                        let mut note: String<96> = String::new();
                        let _ = note.push_str("SET ");
                        let _ = note.push_str(param);
                        self.note.set(&note);
                        protocol::ok_response("updated")
                    }
                    Err(reason) => protocol::error_response(reason.as_str()),
                }
            }
            Ok(Command::ToggleLoad(seconds)) => {
                self.safety
                    .load_off_timer_mut()
                    .activate(self.last_tick_ms.unwrap_or(0), seconds.saturating_mul(1000));
                self.safety.force_load_off();
                self.load_pin.set(false);
                protocol::ok_response("load off timer set")
            }
            Ok(Command::CancelTempOff) => {
                self.safety.cancel_temp_off(self.last_signals.battery_voltage_v);
                self.load_pin.set(self.safety.load_pin_on());
                protocol::ok_response("load off cancelled")
            }
            Err(ParseError::Empty) => protocol::error_response("empty line"),
            Err(_) => protocol::error_response("malformed command"),
        }
    }

    /// Builds the `DATA:{...}` snapshot (§6).
    pub fn snapshot(&self, now_ms: TimestampMs) -> Snapshot {
        let derived = self.tunables.derived();
        let net_current = self.last_signals.panel_current_ma - self.last_signals.load_current_ma;
        let cycle = self.state_machine.cycle();
        let current_bulk_hours = cycle
            .bulk_start_time
            .map(|start| crate::types::conversions::ms_to_hours(now_ms.wrapping_sub(start)))
            .unwrap_or(0.0);

        Snapshot {
            panel_to_battery_current: self.last_signals.panel_current_ma as i32,
            battery_to_load_current: self.last_signals.load_current_ma as i32,
            voltage_panel: self.last_signals.panel_voltage_v,
            voltage_battery_sensor2: self.last_signals.battery_voltage_v,
            current_pwm: self.pwm.duty(),
            temperature: self.last_signals.battery_temperature_c,
            charge_state: self.state_machine.state().as_str(),
            bulk_voltage: self.tunables.bulk_voltage_v,
            absorption_voltage: self.tunables.absorption_voltage_v,
            float_voltage: self.tunables.float_voltage_v,
            lvd: crate::safety::LVD_V,
            lvr: crate::safety::LVR_V,
            battery_capacity: self.tunables.battery_capacity_ah,
            threshold_percentage: self.tunables.threshold_percentage,
            max_allowed_current: self.tunables.max_allowed_current_ma,
            is_lithium: self.tunables.is_lithium,
            max_battery_voltage_allowed: crate::safety::MAX_BATTERY_VOLTAGE_ALLOWED_V,
            absorption_current_threshold_ma: derived.absorption_current_threshold_ma,
            current_limit_into_float_stage: derived.current_limit_into_float_ma,
            calculated_absorption_hours: cycle.calculated_absorption_hours,
            accumulated_ah: self.coulomb.accumulated_ah(),
            estimated_soc: crate::coulomb::estimated_soc_from_voltage(self.last_signals.battery_voltage_v),
            net_current: net_current as i32,
            factor_divider: self.tunables.factor_divider,
            use_fuente_dc: self.tunables.use_dc_source,
            fuente_dc_amps: self.tunables.dc_source_amps,
            max_bulk_hours: derived.max_bulk_hours,
            current_bulk_hours,
            panel_sensor_available: self.last_signals.panel_sensor_available,
            temporary_load_off: self.safety.load_off_timer().is_active(),
            load_off_remaining_seconds: self.safety.load_off_timer().remaining_ms(now_ms) / 1000,
            load_off_duration: self.safety.load_off_timer().duration_ms() / 1000,
            load_off_max_duration: crate::safety::MAX_LOAD_OFF_MS / 1000,
            load_control_state: self.safety.load_pin_on(),
            nota_personalizada: String::try_from(self.note.as_str()).unwrap_or_default(),
            connected: true,
            firmware_version: protocol::FIRMWARE_VERSION,
            uptime: now_ms,
        }
    }

    /// A full scheduler iteration for the non-1s-gated part of §5: runs
    /// the coulomb update, persistence flush, and heartbeat. Returns
    /// `Some(snapshot line)` when a heartbeat is due. The caller is
    /// expected to have already drained the command/web links before
    /// calling this.
    pub fn run_background_iteration<P: PersistenceStore>(
        &mut self,
        now_ms: TimestampMs,
        persistence: &mut P,
    ) -> Option<String<64>> {
        self.sampler.maybe_recheck_panel_sensor(now_ms);

        self.coulomb.update(
            now_ms,
            self.last_signals.panel_current_ma,
            self.last_signals.load_current_ma,
            self.tunables.battery_capacity_ah,
        );

        let persist_due = self
            .last_persist_ms
            .map(|last| now_ms.wrapping_sub(last) >= PERSIST_INTERVAL_MS)
            .unwrap_or(true);
        if persist_due {
            let record = PersistedRecord::from_live(&self.tunables, self.coulomb.accumulated_ah(), now_ms);
            let _ = persistence.save(&record);
            self.last_persist_ms = Some(now_ms);
        }

        if self.heartbeat.due(now_ms) {
            String::try_from(protocol::heartbeat_line()).ok()
        } else {
            None
        }
    }

    /// Runs the 1-s-gated block: sample → safety → state machine → PWM
    /// write (§5 ordering guarantee). No-op if less than
    /// `TICK_INTERVAL_MS` has elapsed since the previous tick.
    pub fn maybe_run_tick(&mut self, now_ms: TimestampMs) -> bool {
        let due = self
            .last_tick_ms
            .map(|last| now_ms.wrapping_sub(last) >= TICK_INTERVAL_MS)
            .unwrap_or(true);
        if !due {
            return false;
        }
        self.last_tick_ms = Some(now_ms);

        let signals = self.sampler.sample(now_ms);
        self.last_signals = signals;

        let temp_off_active_before = self.safety.load_off_timer().is_active();
        let verdict = self.safety.evaluate(
            now_ms,
            signals.battery_voltage_v,
            signals.battery_temperature_c,
            signals.panel_current_ma as i32,
            self.pwm.duty(),
            temp_off_active_before,
            &mut self.logs,
            &self.log_config,
        );

        if let Some(reenabled) = self.safety.service_load_off_timer(now_ms, signals.battery_voltage_v) {
            self.load_pin.set(reenabled);
        } else {
            self.load_pin.set(verdict.load_pin_on && !self.safety.load_off_timer().is_active());
        }

        let prior_state = self.state_machine.state();
        let all_safe = !verdict.over_voltage_confirmed
            && !verdict.over_temperature_confirmed
            && !verdict.panel_current_lost;
        let error_recovery_ready =
            self.safety
                .check_error_recovery(now_ms, signals.battery_voltage_v, all_safe);

        let accumulated_ah = self.coulomb.accumulated_ah();
        let capacity_ah = self.tunables.battery_capacity_ah;
        let battery_v = signals.battery_voltage_v;
        let coulomb = &mut self.coulomb;

        self.state_machine.step(
            now_ms,
            &self.tunables,
            &signals,
            accumulated_ah,
            verdict.over_voltage_confirmed,
            verdict.over_temperature_confirmed,
            verdict.force_bulk_reentry,
            error_recovery_ready,
            |new_state| coulomb.reset_for_new_stage(new_state, capacity_ah, battery_v),
            &mut self.logs,
            &self.log_config,
        );

        if self.state_machine.state() != prior_state {
            protocol::note_state_change(&mut self.note, self.state_machine.state());
        }

        if self.state_machine.state() == ChargeState::Error {
            self.pwm.set_duty(crate::safety::ERROR_TICKLE_DUTY as i32);
        } else if verdict.panel_current_lost {
            self.pwm.set_duty(0);
        } else {
            let delta = self
                .state_machine
                .duty_delta_for_tick(self.pwm.duty(), &self.tunables, &signals);
            self.pwm.adjust(delta);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MapPersistenceStore;
    use crate::pwm::RecordingPwmChannel;
    use crate::signals::FakeSampleSource;

    struct RecordingLoadPin {
        on: bool,
    }

    impl LoadPin for RecordingLoadPin {
        fn set(&mut self, on: bool) {
            self.on = on;
        }
    }

    fn fake_source() -> FakeSampleSource {
        FakeSampleSource {
            panel_ma: 2000.0,
            load_ma: 0.0,
            panel_v: 18.0,
            battery_v: 12.3,
            ntc_ratio: 1.0,
            panel_reachable: true,
        }
    }

    fn boot() -> ControllerState<FakeSampleSource, RecordingPwmChannel, RecordingLoadPin> {
        ControllerState::boot(
            fake_source(),
            RecordingPwmChannel { last_written: 255 },
            RecordingLoadPin { on: false },
            Tunables::new(),
            true,
            0,
        )
        .unwrap()
    }

    #[test]
    fn boot_fails_without_battery_sensor() {
        let result = ControllerState::boot(
            fake_source(),
            RecordingPwmChannel { last_written: 255 },
            RecordingLoadPin { on: false },
            Tunables::new(),
            false,
            0,
        );
        assert_eq!(result.unwrap_err(), ControllerError::BatterySensorInitFailed);
    }

    #[test]
    fn boot_selects_bulk_below_rest_voltage() {
        let state = boot();
        assert_eq!(state.state_machine.state(), ChargeState::Bulk);
    }

    #[test]
    fn tick_increments_duty_in_bulk_low_battery() {
        let mut state = boot();
        state.maybe_run_tick(1000);
        assert_eq!(state.pwm.duty(), 1);
        for t in 2..=60 {
            state.maybe_run_tick(t * 1000);
        }
        assert_eq!(state.pwm.duty(), 60);
    }

    #[test]
    fn tick_is_gated_to_one_second() {
        let mut state = boot();
        assert!(state.maybe_run_tick(0));
        assert!(!state.maybe_run_tick(500));
        assert!(state.maybe_run_tick(1000));
    }

    #[test]
    fn get_data_command_returns_ok() {
        let mut state = boot();
        let response = state.handle_command_line("CMD:GET_DATA");
        assert_eq!(response.as_str(), "OK:see DATA response");
    }

    #[test]
    fn set_command_updates_tunables_and_note() {
        let mut state = boot();
        let response = state.handle_command_line("CMD:SET_bulk_voltage:14.4");
        assert_eq!(response.as_str(), "OK:updated");
        assert_eq!(state.tunables.bulk_voltage_v, 14.4);
    }

    #[test]
    fn set_battery_capacity_rescales_accumulated_ah_instead_of_resetting_it() {
        let mut state = boot();
        let before = state.coulomb.accumulated_ah();
        let response = state.handle_command_line("CMD:SET_battery_capacity:100");
        assert_eq!(response.as_str(), "OK:updated");
        assert_eq!(state.tunables.battery_capacity_ah, 100.0);
        // accumulated_Ah is preserved (not reset to 0), only reclamped.
        assert_eq!(state.coulomb.accumulated_ah(), before.clamp(0.0, 110.0));
    }

    #[test]
    fn set_command_rejects_out_of_range_value() {
        let mut state = boot();
        let response = state.handle_command_line("CMD:SET_battery_capacity:99999");
        assert!(response.as_str().starts_with("ERROR:"));
    }

    #[test]
    fn toggle_load_forces_pin_off_and_cancel_restores() {
        let mut state = boot();
        state.handle_command_line("CMD:TOGGLE_LOAD:10");
        assert!(!state.load_pin.on);
        state.handle_command_line("CMD:CANCEL_TEMP_OFF");
        assert!(!state.safety.load_off_timer().is_active());
    }

    #[test]
    fn background_iteration_flushes_persistence_on_first_call() {
        let mut state = boot();
        let mut store = MapPersistenceStore::new();
        state.maybe_run_tick(0);
        state.run_background_iteration(0, &mut store);
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn sustained_overvoltage_forces_error_and_load_off() {
        let mut state = boot();
        state.sampler = Sampler::new(
            FakeSampleSource {
                panel_ma: 2000.0,
                load_ma: 0.0,
                panel_v: 18.0,
                battery_v: 15.1,
                ntc_ratio: 1.0,
                panel_reachable: true,
            },
            state.tunables.max_allowed_current_ma,
            true,
        )
        .unwrap();
        for t in 0..5 {
            state.maybe_run_tick(t * 1000);
        }
        assert_eq!(state.state_machine.state(), ChargeState::Error);
        assert!(!state.load_pin.on);
    }

    #[test]
    fn panel_current_loss_forces_duty_to_zero_even_while_bulk_law_wants_to_climb() {
        let mut state = boot();
        state.maybe_run_tick(1000);
        assert_eq!(state.pwm.duty(), 1);

        state.sampler = Sampler::new(
            FakeSampleSource {
                panel_ma: 0.0,
                load_ma: 0.0,
                panel_v: 18.0,
                battery_v: 12.3, // still below bulk_V, so the Bulk law alone would keep climbing
                ntc_ratio: 1.0,
                panel_reachable: true,
            },
            state.tunables.max_allowed_current_ma,
            true,
        )
        .unwrap();

        for t in 2..=6 {
            state.maybe_run_tick(t * 1000);
        }
        assert_eq!(state.pwm.duty(), 0);
    }

    #[test]
    fn snapshot_reports_current_charge_state() {
        let state = boot();
        let snapshot = state.snapshot(0);
        assert_eq!(snapshot.charge_state, "BULK_CHARGE");
    }
}
