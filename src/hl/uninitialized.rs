use crate::{
    hl::{DeviceState, Ready, Uninitialized, HIT_FIRST_STOP_CH1, HIT_FIRST_STOP_CH2},
    ll, Error, TdcGp21,
};
use embedded_hal::{
    blocking::{delay::DelayMs, spi},
    digital::v2::OutputPin,
};

/// Read register returning the upper byte of write register 1, used to
/// verify the serial link
const SELF_TEST_INDEX: u8 = 5;

/// The pattern the self-test expects to read back
const SELF_TEST_PATTERN: u32 = 0x55;

/// Settling time after a chip reset
const RESET_DELAY_MS: u8 = 100;

impl<SPI, CS> TdcGp21<SPI, CS, Uninitialized>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Create a new instance of `TdcGp21`
    ///
    /// Requires the SPI peripheral and the chip select pin that are
    /// connected to the GP21.
    pub fn new(spi: SPI, chip_select: CS) -> Self {
        TdcGp21 {
            ll: ll::TdcGp21::new(spi, chip_select),
            _state: Uninitialized,
        }
    }

    /// Reset and configure the chip, then verify the serial link
    ///
    /// Sends the reset opcode, waits out the chip's settling time, writes
    /// the static configuration and runs the read-back self-test. If the
    /// self-test does not see the expected pattern,
    /// [DeviceState::INIT_FAIL] is ORed into `state`; the flag is never
    /// cleared by this driver and the returned driver is handed out
    /// regardless, so the caller decides whether to trust it.
    pub fn init<D>(
        mut self,
        delay: &mut D,
        state: &mut DeviceState,
    ) -> Result<TdcGp21<SPI, CS, Ready>, Error<SPI, CS>>
    where
        D: DelayMs<u8>,
    {
        self.ll.send_command(ll::Opcode::Reset)?;
        delay.delay_ms(RESET_DELAY_MS);

        self.configure()?;
        self.self_test(state)?;

        Ok(TdcGp21 {
            ll: self.ll,
            _state: Ready,
        })
    }

    /// Write the static configuration
    ///
    /// Everything here is set once and never touched again; only CR1 is
    /// rewritten per measurement cycle, by the sequencer.
    fn configure(&mut self) -> Result<(), Error<SPI, CS>> {
        // One fire pulse, fire clock divided by 8, high-speed clock
        // divided by 2, oscillator continuously on, no calibration.
        self.ll.cr0().write(|w| {
            w.anz_fire(1)
                .div_fire(7)
                .div_clkhs(1)
                .start_clkhs(1)
                .calibrate(0)
                .no_cal_auto(1)
        })?;

        // Start in time-of-flight mode. The sequencer rewrites CR1 at the
        // top of every cycle anyway; this just leaves the ALU in a
        // defined mode after init.
        self.write_hit_config(HIT_FIRST_STOP_CH2, HIT_FIRST_STOP_CH1)?;

        // Timeout and ALU interrupt sources, rising and falling edge
        // sensitivity on channel 2 (the photosensor pulse has to deliver
        // both of its edges).
        self.ll.cr2().write(|w| w.en_int(0b101).rfedge2(1))?;

        // A timeout forces the ALU to write the error value instead of
        // leaving stale data in the result register.
        self.ll.cr3().write(|w| w.en_err_val(1))?;

        // Enable the FIRE_UP output buffer, disable phase-shift noise.
        self.ll.cr5().write(|w| w.conf_fire(2).dis_phaseshift(1))?;

        // The fire output idles low.
        self.ll.cr6().write(|w| w.fireo_def(1))?;

        Ok(())
    }

    /// Read-back check of the serial link and chip presence
    fn self_test(&mut self, state: &mut DeviceState) -> Result<(), Error<SPI, CS>> {
        let value = self.ll.read_bytes(1, SELF_TEST_INDEX)?;

        if value != SELF_TEST_PATTERN {
            state.set(DeviceState::INIT_FAIL);
        }

        Ok(())
    }
}
