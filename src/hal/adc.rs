//! Analog Sensor Input
//!
//! Reads an analog accelerometer axis with blocking single conversions and
//! turns the 12-bit unsigned reading into a signed Q15 sample centered on
//! mid-scale, ready for [`crate::pipeline::Feature::add_value`].

use embassy_stm32::adc::{Adc, AdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;
use fixed::types::I1F15;

/// Mid-scale of a 12-bit conversion
const ADC_MID_SCALE: i32 = 2048;

/// Left shift from 12-bit to 16-bit range
const ADC_TO_Q15_SHIFT: u32 = 4;

/// One 12-bit conversion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdcSample {
    raw: u16,
}

impl AdcSample {
    /// Wrap a raw conversion (upper bits are ignored)
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self { raw: raw & 0x0FFF }
    }

    /// Raw 12-bit value (0-4095)
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Signed Q15 sample, mid-scale maps to 0
    #[must_use]
    pub fn to_q15(self) -> I1F15 {
        let centered = (i32::from(self.raw) - ADC_MID_SCALE) << ADC_TO_Q15_SHIFT;
        I1F15::from_bits(i16::try_from(centered).unwrap_or(i16::MAX))
    }
}

impl defmt::Format for AdcSample {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ADC({})", self.raw);
    }
}

/// Accelerometer axis on ADC1
pub struct AccelAdc<'d> {
    adc: Adc<'d, ADC1>,
}

impl AccelAdc<'_> {
    /// Take ADC1 with a sample time suited to a high impedance sensor output
    #[must_use]
    pub fn new(adc: ADC1) -> Self {
        let mut adc = Adc::new(adc);
        adc.set_sample_time(SampleTime::CYCLES247_5);
        Self { adc }
    }

    /// One blocking conversion of `channel`
    pub fn read<T: AdcChannel<ADC1>>(&mut self, channel: &mut T) -> AdcSample {
        AdcSample::from_raw(self.adc.blocking_read(channel))
    }
}
