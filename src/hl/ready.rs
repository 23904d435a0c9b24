use crate::{
    hl::{
        MeasurementPoint, Ready, HIT_FIRST_STOP_CH1, HIT_FIRST_STOP_CH2, HIT_SECOND_STOP_CH2,
    },
    ll, Error, TdcGp21,
};
use embedded_hal::{
    blocking::{delay::DelayUs, spi},
    digital::v2::OutputPin,
};

/// Read register holding the time-of-flight ALU result
const RESULT_START: u8 = 0;

/// Read register holding the pulse-width ALU result
const RESULT_WIDTH: u8 = 1;

/// Read register holding the 16-bit status word
const STATUS_INDEX: u8 = 4;

/// Status bit set when the measurement ran into the chip's timeout
const STATUS_TIMEOUT: u16 = 1 << 9;

/// Settling time between the width reconfiguration and the second result
/// read. Empirically chosen; the ALU's done flag is not polled in this
/// setup.
const ALU_SETTLE_US: u8 = 5;

impl<SPI, CS> TdcGp21<SPI, CS, Ready>
where
    SPI: spi::Transfer<u8> + spi::Write<u8>,
    CS: OutputPin,
{
    /// Run one full measurement cycle
    ///
    /// Fires the laser with the ALU configured for time of flight, then
    /// re-arms the ALU for pulse width, so the single pulse yields both
    /// values. On a chip timeout, both fields of the returned point are
    /// [MeasurementPoint::INVALID]; the cycle is not retried, the caller
    /// starts a fresh one if it wants another sample.
    pub fn measure<D>(&mut self, delay: &mut D) -> Result<MeasurementPoint, Error<SPI, CS>>
    where
        D: DelayUs<u8>,
    {
        self.start_pulse()?;
        self.read_point(delay)
    }

    /// Configure the ALU for time of flight and trigger a measurement
    ///
    /// HIT1 selects the first photosensor edge, HIT2 the laser edge, so
    /// the ALU computes photosensor minus laser. INIT has to precede
    /// START on every single cycle; the chip does not re-arm itself.
    pub fn start_pulse(&mut self) -> Result<(), Error<SPI, CS>> {
        self.write_hit_config(HIT_FIRST_STOP_CH2, HIT_FIRST_STOP_CH1)?;

        self.ll.send_command(ll::Opcode::Init)?;
        self.ll.send_command(ll::Opcode::StartTof)?;

        Ok(())
    }

    /// Read both results of a triggered measurement
    ///
    /// Reads the time of flight, then rewrites CR1 so the ALU computes
    /// the pulse width (falling minus rising edge on the photosensor
    /// channel), waits for the second computation and reads that too.
    /// This reconfigure-then-reread step is what gets two independent
    /// intervals out of the chip's one ALU before the next trigger.
    ///
    /// If the status register reports a timeout, both values are replaced
    /// with [MeasurementPoint::INVALID], regardless of what was read.
    pub fn read_point<D>(&mut self, delay: &mut D) -> Result<MeasurementPoint, Error<SPI, CS>>
    where
        D: DelayUs<u8>,
    {
        let mut start_value = self.ll.read_register_upper_half(RESULT_START)?;

        self.write_hit_config(HIT_SECOND_STOP_CH2, HIT_FIRST_STOP_CH2)?;
        delay.delay_us(ALU_SETTLE_US);

        let mut width_value = self.ll.read_register_upper_half(RESULT_WIDTH)?;

        if self.timed_out()? {
            start_value = MeasurementPoint::INVALID;
            width_value = MeasurementPoint::INVALID;
        }

        Ok(MeasurementPoint {
            start_value,
            width_value,
        })
    }

    /// Read the raw time-of-flight result
    ///
    /// Fetches the upper half-word of the first result register without
    /// reconfiguring the ALU or checking the status register. Useful when
    /// only the start value is of interest.
    pub fn read_raw_value(&mut self) -> Result<u16, Error<SPI, CS>> {
        let value = self.ll.read_register_upper_half(RESULT_START)?;
        Ok(value)
    }

    /// Whether the last measurement ran into the chip's internal timeout
    fn timed_out(&mut self) -> Result<bool, Error<SPI, CS>> {
        let status = self.ll.read_bytes(2, STATUS_INDEX)? as u16;
        Ok(status & STATUS_TIMEOUT != 0)
    }
}
