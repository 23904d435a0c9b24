//! Low-level interface to the TDC-GP21
//!
//! This module implements an opcode- and register-level interface to the
//! GP21. Users of this library should typically not need to use this.
//! Please consider using the [high-level interface] instead.
//!
//! The chip's configuration registers are write-only 32-bit words. Each
//! register is built fresh from named fields through a closure-based write
//! API and transmitted in a single bus transaction; nothing is cached on
//! the host side. Field values are checked against their declared bit
//! width, and against overlap with fields already set in the same word.
//! A violation is a programming error and panics.
//!
//! [high-level interface]: ../hl/index.html

use core::{fmt, marker::PhantomData};

use embedded_hal::{blocking::spi, digital::v2::OutputPin};
use num_enum::IntoPrimitive;

/// Base of the register read opcodes
///
/// The opcode for reading read register `n` is `READ_REG_BASE + n`.
pub const READ_REG_BASE: u8 = 0xB0;

/// Base of the register write opcodes
///
/// The opcode for writing configuration register `n` is
/// `WRITE_REG_BASE + n`.
pub const WRITE_REG_BASE: u8 = 0x80;

/// Single-byte commands understood by the GP21
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Re-arm the measurement unit
    ///
    /// Must be sent before every `StartTof`, not just once after reset.
    Init = 0x70,

    /// Reset the chip to its power-on state
    Reset = 0x50,

    /// Trigger one time-of-flight measurement cycle
    StartTof = 0x01,
}

/// Entry point to the GP21 driver's low-level API
///
/// Please consider using [hl::TdcGp21] instead.
///
/// [hl::TdcGp21]: ../hl/struct.TdcGp21.html
pub struct TdcGp21<SPI, CS> {
    spi: SPI,
    chip_select: CS,
}

impl<SPI, CS> TdcGp21<SPI, CS> {
    /// Create a new instance of `TdcGp21`
    ///
    /// Requires the SPI peripheral and the chip select pin that are
    /// connected to the GP21.
    pub fn new(spi: SPI, chip_select: CS) -> Self {
        TdcGp21 { spi, chip_select }
    }
}

impl<SPI, CS> TdcGp21<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Send a single opcode byte
    ///
    /// Used for the commands that expect no response: `Reset`, `Init` and
    /// `StartTof`. One framed bus transaction.
    pub fn send_command(&mut self, opcode: Opcode) -> Result<(), Error<SPI, CS>> {
        self.select()?;
        self.spi
            .write(&[opcode.into()])
            .map_err(|err| Error::Write(err))?;
        self.deselect()
    }

    /// Write a 32-bit word to a configuration register
    ///
    /// Transmits `WRITE_REG_BASE + index` followed by the word, most
    /// significant byte first. One framed bus transaction.
    pub fn write_register(&mut self, index: u8, value: u32) -> Result<(), Error<SPI, CS>> {
        let [b3, b2, b1, b0] = value.to_be_bytes();
        let buffer = [WRITE_REG_BASE + index, b3, b2, b1, b0];

        self.select()?;
        self.spi
            .write(&buffer)
            .map_err(|err| Error::Write(err))?;
        self.deselect()
    }

    /// Read `count` bytes (1 to 4) from a read register
    ///
    /// Transmits `READ_REG_BASE + index`, then clocks in `count` bytes,
    /// assembled most significant byte first. One framed bus transaction.
    pub fn read_bytes(&mut self, count: usize, index: u8) -> Result<u32, Error<SPI, CS>> {
        let mut buffer = [0; 4];

        self.select()?;
        self.spi
            .write(&[READ_REG_BASE + index])
            .map_err(|err| Error::Write(err))?;
        let read = self
            .spi
            .transfer(&mut buffer[..count])
            .map_err(|err| Error::Transfer(err))?;

        let mut value = 0;
        for byte in read {
            value = value << 8 | u32::from(*byte);
        }

        self.deselect()?;
        Ok(value)
    }

    /// Read the upper 16 bits of a 4-byte read register
    ///
    /// The GP21 places its ALU results in the upper half-word of the
    /// result registers, so this is the usual way to fetch a measurement.
    pub fn read_register_upper_half(&mut self, index: u8) -> Result<u16, Error<SPI, CS>> {
        let value = self.read_bytes(4, index)?;
        Ok((value >> 16) as u16)
    }

    fn select(&mut self) -> Result<(), Error<SPI, CS>> {
        self.chip_select
            .set_low()
            .map_err(|err| Error::ChipSelect(err))
    }

    fn deselect(&mut self) -> Result<(), Error<SPI, CS>> {
        self.chip_select
            .set_high()
            .map_err(|err| Error::ChipSelect(err))
    }
}

/// Provides write access to a configuration register
///
/// You can get an instance for a given register using one of the methods
/// on [`TdcGp21`].
pub struct RegAccessor<'s, R, SPI, CS>(&'s mut TdcGp21<SPI, CS>, PhantomData<R>);

impl<'s, R, SPI, CS> RegAccessor<'s, R, SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Pack the register's fields and write the word to the chip
    ///
    /// The word starts out zeroed; fields not set by the closure stay
    /// zero. The write happens in a single bus transaction.
    pub fn write<F>(&mut self, f: F) -> Result<(), Error<SPI, CS>>
    where
        R: Register + Writable,
        F: FnOnce(&mut R::Write) -> &mut R::Write,
    {
        let mut w = R::write();
        f(&mut w);

        self.0.write_register(R::INDEX, R::word(&w))
    }
}

/// An SPI error that can occur when communicating with the GP21
pub enum Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// SPI error occured during a transfer transaction
    Transfer(<SPI as spi::Transfer<u8>>::Error),

    /// SPI error occured during a write transaction
    Write(<SPI as spi::Write<u8>>::Error),

    /// Error occured while changing the chip select signal
    ChipSelect(<CS as OutputPin>::Error),
}

// We can't derive this implementation, as the compiler will complain that
// the associated error type doesn't implement `Debug`.
impl<SPI, CS> fmt::Debug for Error<SPI, CS>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    <SPI as spi::Transfer<u8>>::Error: fmt::Debug,
    <SPI as spi::Write<u8>>::Error: fmt::Debug,
    CS: OutputPin,
    <CS as OutputPin>::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transfer(error) => write!(f, "Transfer({:?})", error),
            Error::Write(error) => write!(f, "Write({:?})", error),
            Error::ChipSelect(error) => write!(f, "ChipSelect({:?})", error),
        }
    }
}

/// Implemented for all configuration registers
///
/// The GP21 datasheet, section 3.2, specifies the register indices.
pub trait Register {
    /// The register index
    const INDEX: u8;
}

/// Marker trait for registers that can be written to
///
/// All GP21 configuration registers are write-only; read-back goes through
/// the separate read register map.
pub trait Writable {
    /// The type that is used to write to the register
    type Write;

    /// Return the write type for this register
    fn write() -> Self::Write;

    /// Return the packed 32-bit word
    fn word(w: &Self::Write) -> u32;
}

/// Shifts a field value into place and merges it into the word
///
/// Panics if the value does not fit the declared width, or if one of the
/// target bits has already been set. Both are contract violations in the
/// calling code, not runtime conditions.
fn pack_field(word: u32, offset: u32, width: u32, value: u32) -> u32 {
    let mask = ((1u64 << width) - 1) as u32;

    assert!(value <= mask, "field value exceeds declared bit width");
    assert!(
        word & (mask << offset) == 0,
        "field overlaps bits already set in this word"
    );

    word | value << offset
}

/// Generates register implementations
macro_rules! impl_registers {
    (
        $(
            $index:expr,
            $name:ident($name_lower:ident) {
            #[$doc:meta]
            $(
                $field:ident,
                $offset:expr,
                $width:expr,
                $ty:ty;
                #[$field_doc:meta]
            )*
            }
        )*
    ) => {
        $(
            #[$doc]
            #[allow(non_camel_case_types)]
            pub struct $name;

            impl Register for $name {
                const INDEX: u8 = $index;
            }

            impl Writable for $name {
                type Write = $name_lower::W;

                fn write() -> Self::Write {
                    $name_lower::W(0)
                }

                fn word(w: &Self::Write) -> u32 {
                    w.0
                }
            }

            #[$doc]
            pub mod $name_lower {
                /// Used to write to the register
                pub struct W(pub(crate) u32);

                impl W {
                    $(
                        #[$field_doc]
                        pub fn $field(&mut self, value: $ty) -> &mut Self {
                            self.0 = super::pack_field(
                                self.0,
                                $offset,
                                $width,
                                value as u32,
                            );
                            self
                        }
                    )*
                }
            }
        )*

        impl<SPI, CS> TdcGp21<SPI, CS> {
            $(
                #[$doc]
                pub fn $name_lower(&mut self) -> RegAccessor<$name, SPI, CS> {
                    RegAccessor(self, PhantomData)
                }
            )*
        }
    }
}

// All configuration registers are implemented in this macro invocation. It
// follows the following syntax:
// <index>, <name-upper>(name-lower) { /// <doc>
//     <field 1>
//     <field 2>
//     ...
// }
//
// Each field follows the following syntax:
// <name>, <bit-offset>, <bit-width>, <type>; /// <doc>
impl_registers! {
    0, CR0(cr0) { /// Fire pulse and clock configuration
        anz_fire,       28, 4, u8; /// Number of pulses generated by the fire pulse generator
        div_fire,       24, 4, u8; /// Predivider for the fire pulse generator clock
        anz_per_calres, 22, 2, u8; /// Number of periods used for calibrating the ceramic resonator
        div_clkhs,      20, 2, u8; /// Predivider for the high-speed clock
        start_clkhs,    18, 2, u8; /// Oscillator settling interval; 1 keeps the oscillator continuously on
        calibrate,      13, 1, u8; /// Enables calibration calculation in the ALU
        no_cal_auto,    12, 1, u8; /// 1 disables the auto-calibration run
        messb2,         11, 1, u8; /// 1 selects measurement mode 2
        neg_stop2,      10, 1, u8; /// Inverts the STOP2 input
        neg_stop1,       9, 1, u8; /// Inverts the STOP1 input
        neg_start,       8, 1, u8; /// Inverts the START input
    }
    1, CR1(cr1) { /// Hit selection and ALU operand configuration
        hit2,           28, 4, u8; /// Second operand of the ALU subtraction
        hit1,           24, 4, u8; /// First operand of the ALU subtraction
        en_fast_init,   23, 1, u8; /// Enables the fast init operation
        hitin2,         19, 3, u8; /// Number of hits expected on channel 2
        hitin1,         16, 3, u8; /// Number of hits expected on channel 1
        curr32k,        15, 1, u8; /// Low current option for the 32 kHz oscillator
        sel_start_fire, 14, 1, u8; /// Uses the fire pulse as TDC start and disables the START input
        sel_tsto2,      11, 3, u8; /// Functionality of the EN_START pin
        sel_tsto1,       8, 3, u8; /// Functionality of the FIRE_IN pin
    }
    2, CR2(cr2) { /// Interrupt sources and edge sensitivity
        en_int,  29,  3, u8;  /// Activated interrupt sources
        rfedge2, 28,  1, u8;  /// 1 makes channel 2 sensitive to rising and falling edges
        rfedge1, 27,  1, u8;  /// 1 makes channel 1 sensitive to rising and falling edges
        delval1,  8, 19, u32; /// Stop enable delay for hit 1, channel 1
    }
    3, CR3(cr3) { /// Timeout handling
        en_err_val,   29,  1, u8;  /// A timeout forces the ALU to write the error value
        sel_timo_mb2, 27,  2, u8;  /// Timeout predivider in measurement mode 2
        delval2,       8, 19, u32; /// Stop enable delay for hit 2, channel 1
    }
    4, CR4(cr4) { /// Stop enable delay
        delval3, 8, 19, u32; /// Stop enable delay for hit 3, channel 1
    }
    5, CR5(cr5) { /// Fire pulse output configuration
        conf_fire,     29,  3, u8;  /// Output configuration for the pulse generator
        en_startnoise, 28,  1, u8;  /// Enables additional noise on the start channel
        dis_phaseshift, 27, 1, u8;  /// 1 disables the phase noise unit
        repeat_fire,   24,  3, u8;  /// Number of fire pulse sequence repetitions
        phfire,         8, 16, u16; /// Phase reversal pattern for the pulse sequence
    }
    6, CR6(cr6) { /// Analog part and fire buffer configuration
        en_analog,  31, 1, u8; /// Activates the analog part
        da_korr,    25, 4, u8; /// Comparator offset
        tw2,        22, 2, u8; /// Capacitor charge-up timer
        fireo_def,  14, 1, u8; /// Default level of the inactive fire buffer; 1 is low
        quad_res,   13, 1, u8; /// Quadruples the resolution
        double_res, 12, 1, u8; /// Doubles the resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_field_round_trips() {
        let cases = [(28u32, 4u32, 9u32), (8, 19, 0x7FFFF), (0, 1, 1), (14, 1, 1)];

        for &(offset, width, value) in &cases {
            let word = pack_field(0, offset, width, value);
            let mask = ((1u64 << width) - 1) as u32;

            assert_eq!(word >> offset & mask, value);
            assert_eq!(word & !(mask << offset), 0);
        }
    }

    #[test]
    #[should_panic]
    fn pack_field_rejects_oversized_values() {
        pack_field(0, 24, 4, 16);
    }

    #[test]
    #[should_panic]
    fn pack_field_rejects_overlapping_fields() {
        let word = pack_field(0, 8, 3, 7);
        pack_field(word, 10, 2, 1);
    }

    #[test]
    fn cr1_word_packs_all_fields() {
        let mut w = cr1::W(0);
        w.hit1(0x9)
            .hit2(0x1)
            .hitin1(1)
            .hitin2(2)
            .sel_start_fire(1)
            .sel_tsto2(7)
            .sel_tsto1(3);

        assert_eq!(CR1::word(&w), 0x19117B00);
    }

    #[test]
    fn unset_fields_stay_zero() {
        let mut w = cr6::W(0);
        w.fireo_def(1);

        assert_eq!(CR6::word(&w), 0x0000_4000);
    }
}
