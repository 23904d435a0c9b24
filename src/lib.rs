//! Driver crate for the acam TDC-GP21 time-to-digital converter
//!
//! The GP21 measures sub-microsecond intervals between signal edges. This
//! driver configures the chip for a laser rangefinder front end: the laser
//! current detector is connected to the STOP1 input, the photosensor to
//! STOP2, and the chip's single ALU is re-armed mid-cycle so that every
//! fired pulse yields both a time-of-flight value and a pulse-width value.
//!
//! The chip is driven over a chip-select-framed SPI bus through the
//! `embedded-hal` blocking traits. The recommended entry point is the
//! high-level interface in the [hl] module; the [ll] module exposes the
//! opcode and register level for anything the high-level API doesn't cover.
//!
//! [hl]: hl/index.html
//! [ll]: ll/index.html

#![no_std]
#![deny(missing_docs)]

pub mod hl;
pub mod ll;

pub use hl::{DeviceState, Error, MeasurementPoint, Ready, TdcGp21, Uninitialized};
