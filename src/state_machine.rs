//! Charge state machine: Bulk/Absorption/Float/Error transitions, the
//! per-stage PWM duty laws, and the absorption-time computation.
//!
//! The four states map to an exhaustive match with no default arm (§9): any
//! new variant is a compile error at every match site until handled.

use crate::config::defaults::CHARGED_BATTERY_REST_VOLTAGE_V;
use crate::config::Tunables;
use crate::log_charge_info;
use crate::logging::{LogConfig, LogQueue};
use crate::safety::ERROR_TICKLE_DUTY;
use crate::signals::Signals;
use crate::types::TimestampMs;

pub const MAX_ABSORPTION_HOURS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Bulk,
    Absorption,
    Float,
    Error,
}

impl ChargeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeState::Bulk => "BULK_CHARGE",
            ChargeState::Absorption => "ABSORPTION_CHARGE",
            ChargeState::Float => "FLOAT_CHARGE",
            ChargeState::Error => "ERROR",
        }
    }
}

/// Cycle state mutated by the state machine (§3), persisted every 5 min.
#[derive(Debug, Clone, Copy)]
pub struct CycleState {
    pub bulk_start_time: Option<TimestampMs>,
    pub absorption_start_time: Option<TimestampMs>,
    pub calculated_absorption_hours: f32,
}

impl CycleState {
    pub fn new() -> Self {
        Self {
            bulk_start_time: None,
            absorption_start_time: None,
            calculated_absorption_hours: MAX_ABSORPTION_HOURS / 2.0,
        }
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Chooses the boot-time initial state (§4.6).
pub fn initial_state(battery_v: f32, is_lithium: bool) -> ChargeState {
    if battery_v >= CHARGED_BATTERY_REST_VOLTAGE_V {
        if is_lithium {
            ChargeState::Absorption
        } else {
            ChargeState::Float
        }
    } else {
        ChargeState::Bulk
    }
}

/// One step of the per-state PWM duty law (§4.5). Returns the `adjust(Δ)`
/// value; the caller applies it via `PwmRegulator::adjust`.
pub fn duty_delta(
    state: ChargeState,
    tunables: &Tunables,
    signals: &Signals,
    net_current_below_absorption_threshold: bool,
) -> i32 {
    let charge_current = signals.panel_current_ma;
    let load_current = signals.load_current_ma;

    match state {
        ChargeState::Bulk => {
            if charge_current > tunables.max_allowed_current_ma {
                -5
            } else if signals.battery_voltage_v < tunables.bulk_voltage_v {
                1
            } else {
                -1
            }
        }
        ChargeState::Absorption => {
            if tunables.is_lithium {
                if charge_current > load_current {
                    -3
                } else {
                    1
                }
            } else if signals.battery_voltage_v > tunables.absorption_voltage_v {
                -1
            } else if signals.battery_voltage_v < tunables.absorption_voltage_v {
                if charge_current < tunables.max_allowed_current_ma {
                    1
                } else {
                    -2
                }
            } else {
                let _ = net_current_below_absorption_threshold;
                0
            }
        }
        ChargeState::Float => {
            let derived = tunables.derived();
            if charge_current <= derived.current_limit_into_float_ma + load_current {
                if signals.battery_voltage_v < tunables.float_voltage_v {
                    1
                } else if signals.battery_voltage_v > tunables.float_voltage_v {
                    -1
                } else {
                    0
                }
            } else {
                -2
            }
        }
        ChargeState::Error => {
            // Forced to a tickle value; duty_delta is not used for Error,
            // see `StateMachine::apply_error_duty`.
            0
        }
    }
}

/// Recomputes `calculated_absorption_hours` (§4.6), evaluated each
/// Absorption tick before the transition check.
pub fn recompute_absorption_hours(
    accumulated_ah: f32,
    capacity_ah: f32,
    net_current_ma: f32,
) -> f32 {
    let net_a = net_current_ma / 1000.0;
    if net_a <= 0.0 {
        MAX_ABSORPTION_HOURS / 2.0
    } else {
        let charged_pct = if capacity_ah > 0.0 {
            accumulated_ah / capacity_ah * 100.0
        } else {
            0.0
        };
        let remaining = capacity_ah * (100.0 - charged_pct) / 100.0 * 1.1;
        (remaining / net_a).min(MAX_ABSORPTION_HOURS)
    }
}

pub struct StateMachine {
    state: ChargeState,
    cycle: CycleState,
}

impl StateMachine {
    pub fn new(initial: ChargeState, now_ms: TimestampMs) -> Self {
        let mut cycle = CycleState::new();
        if initial == ChargeState::Bulk {
            cycle.bulk_start_time = Some(now_ms);
        } else if initial == ChargeState::Absorption {
            cycle.absorption_start_time = Some(now_ms);
        }
        Self {
            state: initial,
            cycle,
        }
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    pub fn cycle(&self) -> &CycleState {
        &self.cycle
    }

    pub fn force_error(&mut self) {
        self.state = ChargeState::Error;
    }

    pub fn force_bulk(&mut self, now_ms: TimestampMs) {
        self.state = ChargeState::Bulk;
        self.cycle.bulk_start_time = Some(now_ms);
        self.cycle.absorption_start_time = None;
    }

    pub fn recover_from_error_to_absorption(&mut self, now_ms: TimestampMs) {
        self.state = ChargeState::Absorption;
        self.cycle.absorption_start_time = Some(now_ms);
        self.cycle.bulk_start_time = None;
    }

    /// The PWM delta to apply this tick, including the Error tickle rule.
    pub fn duty_delta_for_tick(&self, duty_before: u8, tunables: &Tunables, signals: &Signals) -> i32 {
        match self.state {
            ChargeState::Error => ERROR_TICKLE_DUTY as i32 - duty_before as i32,
            other => duty_delta(other, tunables, signals, false),
        }
    }

    /// Evaluates transitions at the end of the tick's duty application
    /// (§4.6). `coulomb_reset` is called exactly once when a transition to
    /// Float occurs, matching the coulomb counter's `reset_for_new_stage`
    /// contract.
    #[allow(clippy::too_many_arguments)]
    pub fn step<const N: usize>(
        &mut self,
        now_ms: TimestampMs,
        tunables: &Tunables,
        signals: &Signals,
        accumulated_ah: f32,
        over_voltage_confirmed: bool,
        over_temperature_confirmed: bool,
        force_bulk_reentry: bool,
        error_recovery_ready: bool,
        mut coulomb_reset: impl FnMut(ChargeState),
        log_queue: &mut LogQueue<N>,
        log_config: &LogConfig,
    ) {
        let prior_state = self.state;

        if over_voltage_confirmed || over_temperature_confirmed {
            self.force_error();
            log_charge_info!(
                log_queue, log_config, now_ms,
                "{} -> {} (safety fault)", prior_state.as_str(), self.state.as_str()
            );
            return;
        }

        match self.state {
            ChargeState::Error => {
                if error_recovery_ready {
                    self.recover_from_error_to_absorption(now_ms);
                }
            }
            ChargeState::Bulk => {
                let bulk_start = self.cycle.bulk_start_time.unwrap_or(now_ms);
                let elapsed_hours = crate::types::conversions::ms_to_hours(now_ms.wrapping_sub(bulk_start));
                let dc_time_exceeded =
                    tunables.use_dc_source && elapsed_hours >= tunables.derived().max_bulk_hours;

                if signals.battery_voltage_v >= tunables.bulk_voltage_v || dc_time_exceeded {
                    self.state = ChargeState::Absorption;
                    self.cycle.absorption_start_time = Some(now_ms);
                    self.cycle.bulk_start_time = None;
                }
            }
            ChargeState::Absorption => {
                let net_current_ma = signals.panel_current_ma - signals.load_current_ma;
                self.cycle.calculated_absorption_hours =
                    recompute_absorption_hours(accumulated_ah, tunables.battery_capacity_ah, net_current_ma);

                if tunables.is_lithium {
                    // Li absorption never transitions to Float (§4.6).
                } else {
                    let start = self.cycle.absorption_start_time.unwrap_or(now_ms);
                    let elapsed_hours = crate::types::conversions::ms_to_hours(now_ms.wrapping_sub(start));
                    let net_below_threshold =
                        net_current_ma <= tunables.derived().absorption_current_threshold_ma;
                    let timer_elapsed = elapsed_hours >= self.cycle.calculated_absorption_hours;

                    if net_below_threshold || timer_elapsed {
                        self.state = ChargeState::Float;
                        coulomb_reset(ChargeState::Float);
                    }
                }
            }
            ChargeState::Float => {
                if force_bulk_reentry {
                    self.force_bulk(now_ms);
                }
            }
        }

        if self.state != prior_state {
            log_charge_info!(
                log_queue, log_config, now_ms,
                "{} -> {}", prior_state.as_str(), self.state.as_str()
            );
        }
    }

    /// Boot-time safety gate (§4.4): forces Error regardless of the
    /// voltage-based initial state choice if conditions are unsafe.
    pub fn apply_boot_gate(&mut self, unsafe_at_boot: bool) {
        if unsafe_at_boot {
            self.state = ChargeState::Error;
        }
    }
}
