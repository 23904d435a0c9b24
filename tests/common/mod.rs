//! Shared mock bus for the driver tests
//!
//! Implements the embedded-hal traits the driver needs on top of shared
//! state (interior mutability via `Rc<RefCell<..>>`) with an operations
//! log, so tests can assert the exact sequence of chip-select-framed
//! transactions the driver issues. Read responses are canned: each
//! `queue_response` call provides the bytes the chip returns on the next
//! transfer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use tdc_gp21::{DeviceState, Ready, TdcGp21, Uninitialized};

/// One bus-level operation, as seen by the chip
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Chip select driven low (transaction start)
    CsLow,
    /// Chip select driven high (transaction end)
    CsHigh,
    /// Write-only SPI transaction with the transmitted bytes
    Write(Vec<u8>),
    /// Full-duplex SPI transfer with the transmitted bytes
    Transfer(Vec<u8>),
    /// Blocking millisecond delay
    DelayMs(u8),
    /// Blocking microsecond delay
    DelayUs(u8),
}

#[derive(Debug, Default)]
struct BusState {
    operations: Vec<Operation>,
    responses: VecDeque<Vec<u8>>,
}

/// Handle to the shared mock bus state
#[derive(Clone, Default)]
pub struct MockBus {
    state: Rc<RefCell<BusState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The SPI peripheral handed to the driver
    pub fn spi(&self) -> MockSpi {
        MockSpi {
            state: self.state.clone(),
        }
    }

    /// The chip select pin handed to the driver
    pub fn pin(&self) -> MockPin {
        MockPin {
            state: self.state.clone(),
        }
    }

    /// The delay provider handed to the driver
    pub fn delay(&self) -> MockDelay {
        MockDelay {
            state: self.state.clone(),
        }
    }

    /// Queue the bytes the chip returns on the next transfer
    pub fn queue_response(&self, bytes: &[u8]) {
        self.state.borrow_mut().responses.push_back(bytes.to_vec());
    }

    /// The operations log
    pub fn operations(&self) -> Vec<Operation> {
        self.state.borrow().operations.clone()
    }

    /// Clear the operations log
    pub fn clear_operations(&self) {
        self.state.borrow_mut().operations.clear();
    }

    /// The payloads of all SPI write transactions, in order
    ///
    /// The first byte of each payload is the opcode, so this is the
    /// command stream the chip saw.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// The 32-bit words of all writes to the given configuration register
    pub fn register_words(&self, index: u8) -> Vec<u32> {
        self.writes()
            .iter()
            .filter(|w| w.len() == 5 && w[0] == 0x80 + index)
            .map(|w| u32::from_be_bytes([w[1], w[2], w[3], w[4]]))
            .collect()
    }
}

pub struct MockSpi {
    state: Rc<RefCell<BusState>>,
}

impl Write<u8> for MockSpi {
    type Error = Infallible;

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.state
            .borrow_mut()
            .operations
            .push(Operation::Write(words.to_vec()));
        Ok(())
    }
}

impl Transfer<u8> for MockSpi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut state = self.state.borrow_mut();
        state
            .operations
            .push(Operation::Transfer(words.to_vec()));

        if let Some(response) = state.responses.pop_front() {
            for (byte, value) in words.iter_mut().zip(response) {
                *byte = value;
            }
        }

        Ok(words)
    }
}

pub struct MockPin {
    state: Rc<RefCell<BusState>>,
}

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().operations.push(Operation::CsLow);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().operations.push(Operation::CsHigh);
        Ok(())
    }
}

pub struct MockDelay {
    state: Rc<RefCell<BusState>>,
}

impl DelayMs<u8> for MockDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.state
            .borrow_mut()
            .operations
            .push(Operation::DelayMs(ms));
    }
}

impl DelayUs<u8> for MockDelay {
    fn delay_us(&mut self, us: u8) {
        self.state
            .borrow_mut()
            .operations
            .push(Operation::DelayUs(us));
    }
}

/// A fresh uninitialized driver on a mock bus
#[allow(dead_code)]
pub fn new_driver() -> (TdcGp21<MockSpi, MockPin, Uninitialized>, MockBus) {
    let bus = MockBus::new();
    let driver = TdcGp21::new(bus.spi(), bus.pin());
    (driver, bus)
}

/// An initialized driver with a passing self-test; the log is cleared so
/// tests only see the operations they trigger themselves
#[allow(dead_code)]
pub fn ready_driver() -> (TdcGp21<MockSpi, MockPin, Ready>, MockBus) {
    let (driver, bus) = new_driver();
    bus.queue_response(&[0x55]);

    let mut state = DeviceState::new();
    let mut delay = bus.delay();
    let driver = driver.init(&mut delay, &mut state).unwrap();
    assert!(!state.is_set(DeviceState::INIT_FAIL));

    bus.clear_operations();
    (driver, bus)
}
