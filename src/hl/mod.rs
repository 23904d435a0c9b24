//! High-level interface to the TDC-GP21
//!
//! The entry point to this API is the [TdcGp21] struct. Please refer to
//! the documentation there for more details.
//!
//! This module implements a high-level interface to the GP21. This is the
//! recommended way to access the chip using this crate, unless you need
//! the greater flexibility provided by the [register-level interface].
//!
//! [register-level interface]: ../ll/index.html

use crate::ll;
use embedded_hal::{blocking::spi, digital::v2::OutputPin};
use serde::{Deserialize, Serialize};

pub use error::*;
pub use ready::*;
pub use uninitialized::*;

mod error;
mod ready;
mod uninitialized;

/// HIT selector: first stop on channel 1 (laser current detector)
pub(crate) const HIT_FIRST_STOP_CH1: u8 = 0x1;

/// HIT selector: first stop on channel 2 (photosensor rising edge)
pub(crate) const HIT_FIRST_STOP_CH2: u8 = 0x9;

/// HIT selector: second stop on channel 2 (photosensor falling edge)
pub(crate) const HIT_SECOND_STOP_CH2: u8 = 0xA;

/// Entry point to the TDC-GP21 driver API
///
/// A fresh driver starts out in the [Uninitialized] state; [init] resets
/// and configures the chip, runs the link self-test, and returns the
/// driver in the [Ready] state, from which measurement cycles can be run.
///
/// The driver owns the SPI bus and chip select pin exclusively. A full
/// measurement cycle must run to completion before the next one starts;
/// there is no internal reentrancy guard, so concurrent use from several
/// execution contexts has to be excluded by the caller.
///
/// [init]: struct.TdcGp21.html#method.init
pub struct TdcGp21<SPI, CS, State> {
    ll: ll::TdcGp21<SPI, CS>,
    _state: State,
}

/// Indicates that the chip has not been reset and configured yet
pub struct Uninitialized;

/// Indicates that the chip is configured and ready to measure
pub struct Ready;

impl<SPI, CS, State> TdcGp21<SPI, CS, State> {
    /// Direct access to the low-level interface
    pub fn ll(&mut self) -> &mut ll::TdcGp21<SPI, CS> {
        &mut self.ll
    }
}

impl<SPI, CS, State> TdcGp21<SPI, CS, State>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Write CR1, selecting which two detected edges the ALU subtracts
    ///
    /// Everything besides the HIT selectors is fixed for this front end:
    /// one expected hit on channel 1 (laser), two on channel 2
    /// (photosensor), the fire pulse as TDC start, the divided 32 kHz
    /// clock on the channel-2 timing stop and the STOP2 TDC output on
    /// channel 1.
    pub(crate) fn write_hit_config(&mut self, hit1: u8, hit2: u8) -> Result<(), Error<SPI, CS>> {
        self.ll.cr1().write(|w| {
            w.hit1(hit1)
                .hit2(hit2)
                .hitin1(1)
                .hitin2(2)
                .sel_start_fire(1)
                .sel_tsto2(7)
                .sel_tsto1(3)
        })?;

        Ok(())
    }
}

/// The result of one measurement cycle
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MeasurementPoint {
    /// Interval between the laser-fire edge and the first photosensor edge
    pub start_value: u16,

    /// Interval between the photosensor's rising and falling edges
    pub width_value: u16,
}

impl MeasurementPoint {
    /// The value written into both fields when the chip reports a timeout
    ///
    /// A genuine full-scale reading is indistinguishable from this
    /// sentinel. That ambiguity comes with the chip's error-value
    /// mechanism; callers that care need to treat full-scale readings as
    /// suspect.
    pub const INVALID: u16 = 0xFFFF;

    /// Whether neither field carries the timeout sentinel
    pub fn is_valid(&self) -> bool {
        self.start_value != Self::INVALID && self.width_value != Self::INVALID
    }
}

/// Process-wide device state flags
///
/// Owned by the caller and typically shared between subsystems of a larger
/// firmware. This driver only ever ORs [DeviceState::INIT_FAIL] into it,
/// from the init self-test; it never reads or clears any flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeviceState(u16);

impl DeviceState {
    /// Set when the init read-back self-test does not see the expected pattern
    pub const INIT_FAIL: u16 = 1 << 0;

    /// Create an empty flag mask
    pub fn new() -> Self {
        DeviceState(0)
    }

    /// OR a flag into the mask
    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }

    /// Test a flag
    pub fn is_set(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    /// The raw flag mask
    pub fn mask(&self) -> u16 {
        self.0
    }
}
