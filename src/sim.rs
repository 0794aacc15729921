//! Host simulation of the sensor data line.
//!
//! [`SimulatedLine`] implements [`SingleWireBus`] on a virtual microsecond
//! clock that only advances through `delay_us`, so decoding is exact and
//! instant. Each time the host hands the line to the sensor, the next
//! [`Response`] is rendered into a waveform.

use crate::sensor::{checksum, BusError, SingleWireBus, FRAME_BITS};
use std::fmt;

/// Sensor-side waveform timings, in microseconds.
const RESPONSE_DELAY_US: u64 = 30;
const ACK_LOW_US: u64 = 80;
const ACK_HIGH_US: u64 = 80;
const SEPARATOR_US: u64 = 50;

/// Nominal pulse widths.
pub const ZERO_PULSE_US: u32 = 26;
pub const ONE_PULSE_US: u32 = 70;

/// What the simulated sensor does when woken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Send `frame` using the given high-pulse widths.
    Frame {
        frame: [u8; 5],
        zero_us: u32,
        one_us: u32,
    },
    /// Never acknowledge.
    Silent,
    /// Send the first `after_bits` bits, then hold the line low.
    StuckLow { frame: [u8; 5], after_bits: usize },
    /// Send `frame` with every bit separator held low for `separator_us`.
    SlowSeparators { frame: [u8; 5], separator_us: u64 },
}

impl Response {
    /// `frame` with nominal timing.
    pub fn frame(frame: [u8; 5]) -> Self {
        Self::Frame {
            frame,
            zero_us: ZERO_PULSE_US,
            one_us: ONE_PULSE_US,
        }
    }

    /// A well-formed frame for a reading.
    pub fn reading(temperature: u8, humidity: u8) -> Self {
        let data = [humidity, 0, temperature, 0];
        Self::frame([data[0], data[1], data[2], data[3], checksum(&data)])
    }
}

type ResponseSource = Box<dyn FnMut() -> Response + Send>;

/// Simulated single-wire line with a virtual clock.
pub struct SimulatedLine {
    now: u64,
    driving_low: bool,
    // (level, end time) pairs, in order.
    waveform: Vec<(bool, u64)>,
    level_after: bool,
    source: ResponseSource,
    critical_sections: usize,
    longest_critical_section_us: u64,
}

impl SimulatedLine {
    /// A line whose sensor answers with `source()` on every read.
    pub fn new(source: impl FnMut() -> Response + Send + 'static) -> Self {
        Self {
            now: 0,
            driving_low: false,
            waveform: Vec::new(),
            level_after: true,
            source: Box::new(source),
            critical_sections: 0,
            longest_critical_section_us: 0,
        }
    }

    /// A line that gives the same response every time.
    pub fn fixed(response: Response) -> Self {
        Self::new(move || response.clone())
    }

    /// Slowly varying plausible readings, used by the host node.
    pub fn drifting() -> Self {
        let mut tick: u32 = 0;
        Self::new(move || {
            tick = tick.wrapping_add(1);
            let temperature = 20 + (tick % 7) as u8;
            let humidity = 45 + (tick % 11) as u8;
            Response::reading(temperature, humidity)
        })
    }

    /// Number of preemption-free sections entered so far.
    pub fn critical_sections(&self) -> usize {
        self.critical_sections
    }

    /// Longest virtual time spent in one preemption-free section.
    pub fn longest_critical_section_us(&self) -> u64 {
        self.longest_critical_section_us
    }

    fn render(&mut self, response: Response) {
        self.waveform.clear();
        let mut t = self.now;
        let mut push = |waveform: &mut Vec<(bool, u64)>, level: bool, us: u64| {
            t += us;
            waveform.push((level, t));
        };

        let mut separator_us = SEPARATOR_US;
        let (frame, zero_us, one_us, bits) = match response {
            Response::Silent => {
                self.level_after = true;
                return;
            }
            Response::Frame {
                frame,
                zero_us,
                one_us,
            } => {
                self.level_after = true;
                (frame, zero_us, one_us, FRAME_BITS)
            }
            Response::StuckLow { frame, after_bits } => {
                self.level_after = false;
                (frame, ZERO_PULSE_US, ONE_PULSE_US, after_bits.min(FRAME_BITS))
            }
            Response::SlowSeparators {
                frame,
                separator_us: slow,
            } => {
                self.level_after = true;
                separator_us = slow;
                (frame, ZERO_PULSE_US, ONE_PULSE_US, FRAME_BITS)
            }
        };

        push(&mut self.waveform, true, RESPONSE_DELAY_US);
        push(&mut self.waveform, false, ACK_LOW_US);
        push(&mut self.waveform, true, ACK_HIGH_US);
        for i in 0..bits {
            let bit = frame[i / 8] & (0x80 >> (i % 8)) != 0;
            let width = if bit { one_us } else { zero_us };
            push(&mut self.waveform, false, separator_us);
            push(&mut self.waveform, true, u64::from(width));
        }
        if bits == FRAME_BITS {
            push(&mut self.waveform, false, separator_us);
        }
    }
}

impl fmt::Debug for SimulatedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedLine")
            .field("now", &self.now)
            .field("driving_low", &self.driving_low)
            .finish()
    }
}

impl SingleWireBus for SimulatedLine {
    fn drive_low(&mut self) -> Result<(), BusError> {
        self.driving_low = true;
        self.waveform.clear();
        self.level_after = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), BusError> {
        self.driving_low = false;
        Ok(())
    }

    fn set_input(&mut self) -> Result<(), BusError> {
        self.driving_low = false;
        let response = (self.source)();
        self.render(response);
        Ok(())
    }

    fn is_high(&mut self) -> bool {
        if self.driving_low {
            return false;
        }
        self.waveform
            .iter()
            .find(|(_, end)| *end > self.now)
            .map(|(level, _)| *level)
            .unwrap_or(self.level_after)
    }

    fn delay_us(&mut self, us: u32) {
        self.now += u64::from(us);
    }

    fn now_us(&mut self) -> u64 {
        self.now
    }

    fn with_preemption_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.critical_sections += 1;
        let start = self.now;
        let result = f(self);
        self.longest_critical_section_us = self
            .longest_critical_section_us
            .max(self.now - start);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorProtocolDecoder, SensorReading};

    #[test]
    fn test_idle_line_is_high() {
        let mut line = SimulatedLine::fixed(Response::Silent);
        assert!(line.is_high());
        line.drive_low().unwrap();
        assert!(!line.is_high());
        line.release().unwrap();
        assert!(line.is_high());
    }

    #[test]
    fn test_waveform_starts_with_ack() {
        let mut line = SimulatedLine::fixed(Response::reading(1, 2));
        line.set_input().unwrap();
        assert!(line.is_high());
        line.delay_us(RESPONSE_DELAY_US as u32);
        assert!(!line.is_high());
        line.delay_us(ACK_LOW_US as u32);
        assert!(line.is_high());
    }

    #[test]
    fn test_drifting_readings_decode() {
        let mut decoder = SensorProtocolDecoder::new(SimulatedLine::drifting());
        let first = decoder.decode().unwrap();
        let second = decoder.decode().unwrap();
        assert_eq!(first, SensorReading::new(21, 46));
        assert_eq!(second, SensorReading::new(22, 47));
    }
}
