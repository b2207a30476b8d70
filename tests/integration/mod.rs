//! Scenario/integration tests exercising `ControllerState` end to end
//! against fake signal sources, built on the `mock-hardware` feature.
//! These mirror the six named scenarios called out for this controller.

use charge_controller::config::Tunables;
use charge_controller::controller::{ControllerState, LoadPin};
use charge_controller::persistence::MapPersistenceStore;
use charge_controller::pwm::RecordingPwmChannel;
use charge_controller::signals::FakeSampleSource;
use charge_controller::state_machine::ChargeState;

struct FakeLoadPin {
    on: bool,
}

impl LoadPin for FakeLoadPin {
    fn set(&mut self, on: bool) {
        self.on = on;
    }
}

fn source(battery_v: f32, panel_ma: f32, load_ma: f32) -> FakeSampleSource {
    FakeSampleSource {
        panel_ma,
        load_ma,
        panel_v: 18.0,
        battery_v,
        ntc_ratio: 1.0,
        panel_reachable: true,
    }
}

fn boot_with(
    battery_v: f32,
    panel_ma: f32,
    load_ma: f32,
    tunables: Tunables,
) -> ControllerState<FakeSampleSource, RecordingPwmChannel, FakeLoadPin> {
    ControllerState::boot(
        source(battery_v, panel_ma, load_ma),
        RecordingPwmChannel { last_written: 255 },
        FakeLoadPin { on: false },
        tunables,
        true,
        0,
    )
    .unwrap()
}

#[test]
fn scenario_bulk_entry_at_low_battery() {
    let mut controller = boot_with(12.3, 2000.0, 0.0, Tunables::new());
    controller.maybe_run_tick(1000);
    assert_eq!(controller.state_machine.state(), ChargeState::Bulk);
    assert_eq!(controller.pwm.duty(), 1);

    for t in 2..=60 {
        controller.maybe_run_tick(t * 1000);
    }
    assert_eq!(controller.pwm.duty(), 60);
}

#[test]
fn scenario_bulk_to_absorption_by_voltage() {
    let mut tunables = Tunables::new();
    tunables.set_bulk_voltage_v(14.4).unwrap();
    let mut controller = boot_with(14.45, 2000.0, 0.0, tunables);

    controller.maybe_run_tick(1000);
    assert_eq!(controller.state_machine.state(), ChargeState::Absorption);
    assert!(controller.state_machine.cycle().bulk_start_time.is_none());
}

#[test]
fn scenario_bulk_to_absorption_by_dc_source_time() {
    let mut tunables = Tunables::new();
    tunables.set_battery_capacity_ah(50.0).unwrap();
    tunables.set_use_dc_source(true);
    tunables.set_dc_source_amps(10.0).unwrap();
    assert_eq!(tunables.derived().max_bulk_hours, 5.0);

    let mut controller = boot_with(12.3, 2000.0, 0.0, tunables);
    controller.maybe_run_tick(5 * 3_600_000);
    assert_eq!(controller.state_machine.state(), ChargeState::Absorption);
}

#[test]
fn scenario_absorption_to_float_on_low_net_current() {
    let mut tunables = Tunables::new();
    tunables.set_battery_capacity_ah(50.0).unwrap();
    tunables.set_threshold_percentage(1.0).unwrap();

    let mut controller = boot_with(14.3, 2000.0, 0.0, tunables);
    // Drive straight into Absorption by holding voltage above bulk_V.
    controller.maybe_run_tick(1000);
    assert_eq!(controller.state_machine.state(), ChargeState::Absorption);

    // Now low net current should push Absorption -> Float.
    controller.sampler = charge_controller::signals::Sampler::new(
        source(14.2, 400.0, 0.0),
        controller.tunables.max_allowed_current_ma,
        true,
    )
    .unwrap();
    controller.maybe_run_tick(2000);
    assert_eq!(controller.state_machine.state(), ChargeState::Float);
}

#[test]
fn scenario_temporary_load_off_clamps_to_max() {
    let mut controller = boot_with(13.0, 2000.0, 0.0, Tunables::new());
    let response = controller.handle_command_line("CMD:TOGGLE_LOAD:50000");
    assert_eq!(response.as_str(), "OK:load off timer set");
    assert!(!controller.load_pin.on);
    assert_eq!(controller.safety.load_off_timer().duration_ms(), 28_800_000);
}

#[test]
fn scenario_overvoltage_recovery_returns_to_absorption() {
    let mut controller = boot_with(15.1, 2000.0, 0.0, Tunables::new());
    for t in 0..5 {
        controller.maybe_run_tick(t * 1000);
    }
    assert_eq!(controller.state_machine.state(), ChargeState::Error);
    assert!(!controller.load_pin.on);

    controller.sampler = charge_controller::signals::Sampler::new(
        source(13.8, 2000.0, 0.0),
        controller.tunables.max_allowed_current_ma,
        true,
    )
    .unwrap();
    controller.maybe_run_tick(5000);
    controller.maybe_run_tick(7000);
    assert_eq!(controller.state_machine.state(), ChargeState::Absorption);
    assert!(controller.load_pin.on);
}

#[test]
fn get_data_is_idempotent_between_sample_changes() {
    let controller = boot_with(13.0, 2000.0, 0.0, Tunables::new());
    let first = controller.snapshot(1000);
    let second = controller.snapshot(1000);
    assert_eq!(first.charge_state, second.charge_state);
    assert_eq!(first.current_pwm, second.current_pwm);
    assert_eq!(first.accumulated_ah, second.accumulated_ah);
}
