//! On-target entry point, compiled only under `hardware-tests` and run
//! with `harness = false`. This repository does not attempt to drive real
//! ADC/PWM/flash peripherals from CI; the arithmetic and protocol logic
//! this binary would exercise on a board is already covered on host by
//! `tests/unit` and `tests/integration` against fake signal sources.
//!
//! Wiring a probe-rs or defmt-test runner here is deployment-specific and
//! left to the bring-up crate that owns the physical board.

#![no_std]
#![no_main]

use panic_probe as _;

#[cfg(feature = "hardware-tests")]
#[rp2040_hal::entry]
fn main() -> ! {
    defmt::info!("embedded test harness not implemented in this repository");
    loop {
        cortex_m::asm::wfi();
    }
}
