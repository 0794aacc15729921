//! Single-wire temperature/humidity sensor.
//!
//! The sensor shares one open-drain data line with the host. A read is:
//!
//! ```text
//! host:   ‾‾‾\________18 ms________/‾‾ 40 µs ‾‾ (release, switch to input)
//! sensor:                                       \__80 µs__/‾‾80 µs‾‾\
//! bit:    \__50 µs__/‾‾ 26-28 µs ‾‾\   = 0
//!         \__50 µs__/‾‾‾‾‾ 70 µs ‾‾‾‾‾\ = 1
//! ```
//!
//! 40 bits form five bytes: humidity, humidity fraction, temperature,
//! temperature fraction and checksum. The sensor class handled here only
//! reports whole units, so the fractions are ignored.
//!
//! The protocol logic is written against [`SingleWireBus`] so it can run
//! on a simulated line ([`crate::sim::SimulatedLine`]) on the host.

use log::{debug, warn};
use std::fmt;

#[cfg(feature = "esp32")]
mod esp;
#[cfg(feature = "esp32")]
pub use esp::{sensor_pin, EspSingleWire};

/// Host wake pulse length.
pub const WAKE_PULSE_US: u32 = 18_000;

/// High time after the wake pulse before the host stops driving the line.
pub const RELEASE_US: u32 = 40;

/// Budget for each acknowledgement phase and each bit separator.
pub const PHASE_TIMEOUT_US: u64 = 10_000;

/// Budget for the whole frame, from the start of the acknowledgement.
///
/// The frame is read with interrupts masked, so this also bounds that
/// window. A nominal frame takes about 5 ms.
pub const FRAME_TIMEOUT_US: u64 = 8_000;

/// Longest high pulse measured; anything longer is clamped.
pub const MAX_PULSE_US: u64 = 100;

/// Pulses up to and including this width decode as `0`, longer ones as `1`.
pub const BIT_THRESHOLD_US: u64 = 30;

/// Bits per frame.
pub const FRAME_BITS: usize = 40;

/// A validated sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReading {
    /// Whole degrees Celsius.
    pub temperature: u8,
    /// Whole percent relative humidity.
    pub humidity: u8,
    /// False only for the placeholder shown before the first good read.
    pub valid: bool,
}

impl SensorReading {
    pub fn new(temperature: u8, humidity: u8) -> Self {
        Self {
            temperature,
            humidity,
            valid: true,
        }
    }
}

/// Failure reported by the GPIO driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError(pub String);

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BusError {}

/// Host side of the single-wire data line.
pub trait SingleWireBus {
    /// Drive the line low.
    fn drive_low(&mut self) -> Result<(), BusError>;
    /// Stop driving low; the pull-up takes the line high.
    fn release(&mut self) -> Result<(), BusError>;
    /// Hand the line to the sensor.
    fn set_input(&mut self) -> Result<(), BusError>;
    /// Sample the line.
    fn is_high(&mut self) -> bool;
    /// Busy-wait `us` microseconds.
    fn delay_us(&mut self, us: u32);
    /// Monotonic microsecond clock.
    fn now_us(&mut self) -> u64;

    /// Run `f` where it cannot be preempted.
    ///
    /// Bit sampling tolerates only a few microseconds of jitter.
    fn with_preemption_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        f(self)
    }
}

/// A point in time on the bus clock after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start_us: u64,
    budget_us: u64,
}

impl Deadline {
    pub fn new(now_us: u64, budget_us: u64) -> Self {
        Self { start_us: now_us, budget_us }
    }

    /// Microseconds since the deadline was armed.
    pub fn elapsed(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.start_us)
    }

    pub fn expired(&self, now_us: u64) -> bool {
        self.elapsed(now_us) >= self.budget_us
    }
}

/// Decode a measured high-pulse width into a bit.
pub fn classify_pulse(width_us: u64) -> bool {
    width_us > BIT_THRESHOLD_US
}

/// Pack 40 bits, most significant first, into five bytes.
pub fn assemble_frame(bits: &[bool; FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, &bit) in bits.iter().enumerate() {
        frame[i / 8] = (frame[i / 8] << 1) | u8::from(bit);
    }
    frame
}

/// Check the checksum byte and extract the reading.
pub fn validate_frame(frame: &[u8; 5]) -> Result<SensorReading, DecodeError> {
    if checksum(&[frame[0], frame[1], frame[2], frame[3]]) != frame[4] {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(SensorReading::new(frame[2], frame[0]))
}

/// Checksum byte for the first four frame bytes.
pub fn checksum(data: &[u8; 4]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Runs the read protocol on a [`SingleWireBus`].
pub struct SensorProtocolDecoder<B> {
    bus: B,
}

impl<B: SingleWireBus> SensorProtocolDecoder<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Borrow the bus.
    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Perform one read.
    ///
    /// Blocks for roughly 25 ms. Nothing is cached: on error the caller keeps
    /// whatever reading it had.
    pub fn decode(&mut self) -> Result<SensorReading, DecodeError> {
        self.bus.drive_low()?;
        self.bus.delay_us(WAKE_PULSE_US);
        self.bus.release()?;
        self.bus.delay_us(RELEASE_US);
        self.bus.set_input()?;

        let frame = self.bus.with_preemption_disabled(read_frame)?;
        debug!("Sensor frame: {:02x?}", frame);

        let reading = validate_frame(&frame).inspect_err(|_| {
            warn!("Sensor checksum mismatch: {:02x?}", frame);
        })?;
        debug!(
            "Sensor reading: {} C, {} %",
            reading.temperature, reading.humidity
        );
        Ok(reading)
    }
}

fn read_frame<B: SingleWireBus>(bus: &mut B) -> Result<[u8; 5], DecodeError> {
    let frame = Deadline::new(bus.now_us(), FRAME_TIMEOUT_US);

    // Acknowledgement: the sensor pulls low, then high, then low again for
    // the first bit separator.
    wait_while(bus, true, &frame).ok_or(DecodeError::NoResponse)?;
    wait_while(bus, false, &frame).ok_or(DecodeError::NoResponse)?;
    wait_while(bus, true, &frame).ok_or(DecodeError::NoResponse)?;

    let mut bits = [false; FRAME_BITS];
    for (index, bit) in bits.iter_mut().enumerate() {
        wait_while(bus, false, &frame).ok_or(DecodeError::Timeout(index))?;
        *bit = classify_pulse(measure_high(bus));
    }
    Ok(assemble_frame(&bits))
}

// Poll once per microsecond until the level changes. `None` when either the
// phase or the frame budget runs out.
fn wait_while<B: SingleWireBus>(bus: &mut B, high: bool, frame: &Deadline) -> Option<()> {
    let phase = Deadline::new(bus.now_us(), PHASE_TIMEOUT_US);
    while bus.is_high() == high {
        let now = bus.now_us();
        if phase.expired(now) || frame.expired(now) {
            return None;
        }
        bus.delay_us(1);
    }
    Some(())
}

fn measure_high<B: SingleWireBus>(bus: &mut B) -> u64 {
    let deadline = Deadline::new(bus.now_us(), MAX_PULSE_US);
    while bus.is_high() {
        if deadline.expired(bus.now_us()) {
            return MAX_PULSE_US;
        }
        bus.delay_us(1);
    }
    deadline.elapsed(bus.now_us()).min(MAX_PULSE_US)
}

/// Errors that can occur during a sensor read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The sensor did not acknowledge the wake pulse.
    NoResponse,
    /// The separator before the given bit did not end within the phase or
    /// frame budget.
    Timeout(usize),
    /// The checksum byte does not match the data.
    ChecksumMismatch,
    /// The GPIO driver failed.
    Bus(BusError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "sensor did not respond"),
            Self::Timeout(bit) => write!(f, "timeout reading bit {}", bit),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::Bus(e) => write!(f, "bus error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<BusError> for DecodeError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}
