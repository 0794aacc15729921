//! ESP32 GPIO implementation of the single-wire bus.

use super::{BusError, SingleWireBus};
use crate::config::is_io_capable_gpio;
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pins, Pull};
use esp_idf_hal::interrupt;
use esp_idf_sys::EspError;
use log::info;

/// Sensor data line on an open-drain GPIO.
pub struct EspSingleWire {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
}

impl EspSingleWire {
    /// Configure `pin` as open-drain with the internal pull-up enabled.
    pub fn new(pin: AnyIOPin) -> Result<Self, EspError> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        info!("Sensor line ready on GPIO{}", pin.pin());
        Ok(Self { pin })
    }
}

/// Take GPIO number `gpio` out of `pins` for the sensor line.
///
/// `None` if that pin cannot drive an open-drain line.
pub fn sensor_pin(pins: Pins, gpio: i32) -> Option<AnyIOPin> {
    if !is_io_capable_gpio(gpio) {
        return None;
    }
    let pin: AnyIOPin = match gpio {
        0 => pins.gpio0.into(),
        2 => pins.gpio2.into(),
        4 => pins.gpio4.into(),
        5 => pins.gpio5.into(),
        12 => pins.gpio12.into(),
        13 => pins.gpio13.into(),
        14 => pins.gpio14.into(),
        15 => pins.gpio15.into(),
        16 => pins.gpio16.into(),
        17 => pins.gpio17.into(),
        18 => pins.gpio18.into(),
        19 => pins.gpio19.into(),
        21 => pins.gpio21.into(),
        22 => pins.gpio22.into(),
        23 => pins.gpio23.into(),
        25 => pins.gpio25.into(),
        26 => pins.gpio26.into(),
        27 => pins.gpio27.into(),
        32 => pins.gpio32.into(),
        33 => pins.gpio33.into(),
        _ => return None,
    };
    Some(pin)
}

fn bus_error(e: EspError) -> BusError {
    BusError(format!("GPIO: {}", e))
}

impl SingleWireBus for EspSingleWire {
    fn drive_low(&mut self) -> Result<(), BusError> {
        self.pin.set_low().map_err(bus_error)
    }

    fn release(&mut self) -> Result<(), BusError> {
        self.pin.set_high().map_err(bus_error)
    }

    fn set_input(&mut self) -> Result<(), BusError> {
        // Open-drain: a released line is already readable.
        self.pin.set_high().map_err(bus_error)
    }

    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }

    fn delay_us(&mut self, us: u32) {
        Ets::delay_us(us);
    }

    fn now_us(&mut self) -> u64 {
        // SAFETY: esp_timer is started by the IDF before app_main.
        let now = unsafe { esp_idf_sys::esp_timer_get_time() };
        now.max(0) as u64
    }

    fn with_preemption_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        interrupt::free(|| f(self))
    }
}
