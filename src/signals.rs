//! Signal sampler: averaged current/voltage/temperature reads with
//! validity filtering. The ADC/I²C wiring is out of scope (§1); this module
//! expresses the averaging, rejection, and Steinhart–Hart arithmetic
//! against a small `RawSampleSource` trait so it is host-testable without
//! hardware.

const SAMPLES_PER_AVERAGE: usize = 20;
const SHUNT_SCALE_FACTOR: f32 = 10.0; // 10 mOhm shunt convention
const PANEL_RECHECK_INTERVAL_MS: u32 = 60_000;

// Steinhart-Hart / NTC divider constants (§4.1). R0 = 10 kOhm at 25 C is
// folded into the caller-supplied resistance ratio (R / R0).
const NTC_BETA: f32 = 3984.0;
const NTC_T0_KELVIN: f32 = 298.15; // 25 C

/// One raw reading source: battery/panel current shunts, voltage dividers,
/// and the NTC thermistor divider. Implemented by a thin hardware adapter
/// behind the `embedded` feature, and by a fake in tests.
pub trait RawSampleSource {
    /// One raw shunt current sample in mA, before the 10x scale factor.
    fn sample_raw_current_ma(&mut self, source: CurrentSource) -> f32;
    fn read_panel_voltage_v(&mut self) -> f32;
    fn read_battery_voltage_v(&mut self) -> f32;
    /// NTC divider ratio in [0, 1], where 1.0 means divider output equals
    /// supply (fully cold) — i.e. suitable as input to the Steinhart-Hart
    /// resistance ratio `R / R0`.
    fn read_ntc_resistance_ratio(&mut self) -> f32;
    fn panel_sensor_reachable(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentSource {
    Panel,
    Load,
}

/// Sanitizes a possibly-NaN/infinite reading to 0.0, per §3.
fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Converts an NTC resistance ratio to degrees Celsius via the
/// Steinhart-Hart/Beta equation (§4.1).
pub fn steinhart_hart_celsius(resistance_ratio: f32) -> f32 {
    if resistance_ratio <= 0.0 {
        return sanitize(f32::NAN);
    }
    let inv_t = 1.0 / NTC_T0_KELVIN + (1.0 / NTC_BETA) * libm_ln(resistance_ratio);
    let kelvin = 1.0 / inv_t;
    sanitize(kelvin - 273.15)
}

// `no_std` has no `f32::ln`; this crate is built with `std` for host tests
// and the `embedded` feature pulls in `libm` transitively via
// `rp2040-hal`'s float intrinsics, so a direct `ln` call is valid in both
// configurations actually compiled.
fn libm_ln(x: f32) -> f32 {
    x.ln()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    pub panel_current_ma: f32,
    pub load_current_ma: f32,
    pub panel_voltage_v: f32,
    pub battery_voltage_v: f32,
    pub battery_temperature_c: f32,
    pub panel_sensor_available: bool,
}

pub struct Sampler<S: RawSampleSource> {
    source: S,
    panel_sensor_available: bool,
    last_panel_recheck_ms: u32,
    max_allowed_current_ma: f32,
}

impl<S: RawSampleSource> Sampler<S> {
    /// Boot-time construction. The battery sensor is mandatory: if it
    /// cannot be read, construction fails and the caller must refuse to
    /// start (§4.1, §7 — the one fatal path in this controller).
    pub fn new(mut source: S, max_allowed_current_ma: f32, battery_sensor_ok: bool) -> Option<Self> {
        if !battery_sensor_ok {
            return None;
        }
        let panel_sensor_available = source.panel_sensor_reachable();
        Some(Self {
            source,
            panel_sensor_available,
            last_panel_recheck_ms: 0,
            max_allowed_current_ma,
        })
    }

    pub fn panel_sensor_available(&self) -> bool {
        self.panel_sensor_available
    }

    /// Rechecks panel sensor reachability at most once every 60s.
    pub fn maybe_recheck_panel_sensor(&mut self, now_ms: u32) {
        if self.panel_sensor_available {
            return;
        }
        if now_ms.wrapping_sub(self.last_panel_recheck_ms) >= PANEL_RECHECK_INTERVAL_MS {
            self.last_panel_recheck_ms = now_ms;
            self.panel_sensor_available = self.source.panel_sensor_reachable();
        }
    }

    /// 20-sample averaged current read with out-of-range rejection (§4.1).
    pub fn read_average_current(&mut self, which: CurrentSource) -> f32 {
        if which == CurrentSource::Panel && !self.panel_sensor_available {
            return 0.0;
        }
        let mut sum = 0.0f32;
        let mut valid = 0u32;
        for _ in 0..SAMPLES_PER_AVERAGE {
            let raw = self.source.sample_raw_current_ma(which) * SHUNT_SCALE_FACTOR;
            if raw >= 0.0 && raw <= self.max_allowed_current_ma {
                sum += raw;
                valid += 1;
            }
        }
        if valid == 0 {
            0.0
        } else {
            sum / valid as f32
        }
    }

    fn read_average_temperature_c(&mut self) -> f32 {
        let mut sum = 0.0f32;
        for _ in 0..SAMPLES_PER_AVERAGE {
            sum += self.source.read_ntc_resistance_ratio();
        }
        let avg_ratio = sum / SAMPLES_PER_AVERAGE as f32;
        steinhart_hart_celsius(avg_ratio)
    }

    /// Samples every signal for one tick (§2 data flow: Sampler first).
    pub fn sample(&mut self, now_ms: u32) -> Signals {
        self.maybe_recheck_panel_sensor(now_ms);
        Signals {
            panel_current_ma: self.read_average_current(CurrentSource::Panel).max(0.0),
            load_current_ma: self.read_average_current(CurrentSource::Load).max(0.0),
            panel_voltage_v: sanitize(self.source.read_panel_voltage_v()).max(0.0),
            battery_voltage_v: sanitize(self.source.read_battery_voltage_v()).max(0.0),
            battery_temperature_c: self.read_average_temperature_c(),
            panel_sensor_available: self.panel_sensor_available,
        }
    }
}

#[cfg(any(test, feature = "mock-hardware"))]
pub struct FakeSampleSource {
    pub panel_ma: f32,
    pub load_ma: f32,
    pub panel_v: f32,
    pub battery_v: f32,
    pub ntc_ratio: f32,
    pub panel_reachable: bool,
}

#[cfg(any(test, feature = "mock-hardware"))]
impl RawSampleSource for FakeSampleSource {
    fn sample_raw_current_ma(&mut self, source: CurrentSource) -> f32 {
        match source {
            CurrentSource::Panel => self.panel_ma / SHUNT_SCALE_FACTOR,
            CurrentSource::Load => self.load_ma / SHUNT_SCALE_FACTOR,
        }
    }

    fn read_panel_voltage_v(&mut self) -> f32 {
        self.panel_v
    }

    fn read_battery_voltage_v(&mut self) -> f32 {
        self.battery_v
    }

    fn read_ntc_resistance_ratio(&mut self) -> f32 {
        self.ntc_ratio
    }

    fn panel_sensor_reachable(&mut self) -> bool {
        self.panel_reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake() -> FakeSampleSource {
        FakeSampleSource {
            panel_ma: 2000.0,
            load_ma: 500.0,
            panel_v: 18.0,
            battery_v: 13.0,
            ntc_ratio: 1.0,
            panel_reachable: true,
        }
    }

    #[test]
    fn sampler_construction_fails_without_battery_sensor() {
        assert!(Sampler::new(fake(), 6000.0, false).is_none());
    }

    #[test]
    fn average_current_rejects_out_of_range_samples() {
        let mut source = fake();
        source.panel_ma = 20_000.0; // above max_allowed, every sample rejected
        let mut sampler = Sampler::new(source, 6000.0, true).unwrap();
        assert_eq!(sampler.read_average_current(CurrentSource::Panel), 0.0);
    }

    #[test]
    fn average_current_returns_mean_of_valid_samples() {
        let mut sampler = Sampler::new(fake(), 6000.0, true).unwrap();
        assert!((sampler.read_average_current(CurrentSource::Panel) - 2000.0).abs() < 0.01);
    }

    #[test]
    fn panel_unavailable_yields_zero_current_without_sampling() {
        let mut source = fake();
        source.panel_reachable = false;
        let mut sampler = Sampler::new(source, 6000.0, true).unwrap();
        assert!(!sampler.panel_sensor_available());
        assert_eq!(sampler.read_average_current(CurrentSource::Panel), 0.0);
    }

    #[test]
    fn panel_recheck_happens_only_after_interval() {
        let mut source = fake();
        source.panel_reachable = false;
        let mut sampler = Sampler::new(source, 6000.0, true).unwrap();
        sampler.maybe_recheck_panel_sensor(1000);
        assert!(!sampler.panel_sensor_available());
        sampler.maybe_recheck_panel_sensor(PANEL_RECHECK_INTERVAL_MS);
        // source still reports unreachable by default struct state
        assert!(!sampler.panel_sensor_available());
    }

    #[test]
    fn nan_voltage_is_sanitized_to_zero() {
        let mut source = fake();
        source.battery_v = f32::NAN;
        let mut sampler = Sampler::new(source, 6000.0, true).unwrap();
        let signals = sampler.sample(0);
        assert_eq!(signals.battery_voltage_v, 0.0);
    }

    #[test]
    fn steinhart_hart_is_reasonable_at_room_temperature() {
        // ratio 1.0 means R == R0 == 10k at 25C by construction
        let celsius = steinhart_hart_celsius(1.0);
        assert!((celsius - 25.0).abs() < 0.5);
    }
}
