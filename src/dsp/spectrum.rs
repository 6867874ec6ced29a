//! Q15 Spectrum Processing
//!
//! Amplitude spectrum, band-pass filtering and frequency-domain integration
//! of a one-sided real FFT stored as `i16` (Q15 raw) bins. Integration
//! divides bin `k` by `k * omega`; to keep precision in 16 bits the result
//! is multiplied by a power-of-two rescaling factor chosen from the largest
//! integrated bin, and callers divide it back out of the final RMS.

use core::f32::consts::PI;

#[cfg(feature = "embedded")]
use micromath::F32Ext;

use crate::config::RESCALE_TARGET_BIT;

/// Round and saturate a float into a Q15 raw value
#[must_use]
pub fn quantize(value: f32) -> i16 {
    // `as` saturates on overflow
    value.round() as i16
}

/// Frequency resolution of an FFT (Hz per bin)
#[must_use]
pub fn bin_width(sampling_rate: u16, sample_count: usize) -> f32 {
    f32::from(sampling_rate) / sample_count as f32
}

/// Amplitude of each bin `sqrt(re^2 + im^2)`
///
/// Fills `amplitudes` over the shortest of the three slices.
pub fn amplitudes(re: &[i16], im: &[i16], amplitudes: &mut [i16]) {
    for ((a, &r), &i) in amplitudes.iter_mut().zip(re).zip(im) {
        let power = i32::from(r) * i32::from(r) + i32::from(i) * i32::from(i);
        *a = quantize((power as f32).sqrt());
    }
}

/// RMS of the time signal from its one-sided amplitude spectrum
///
/// Every non-DC bin counts twice since the negative frequencies are not
/// stored. With `remove_dc` the mean of the signal is ignored, which makes
/// this the agitation level of an accelerometer window.
#[must_use]
pub fn spectrum_rms(amplitudes: &[i16], remove_dc: bool) -> f32 {
    let mut total = 0.0f32;
    for (k, &a) in amplitudes.iter().enumerate() {
        let a = f32::from(a);
        if k == 0 {
            if !remove_dc {
                total += a * a;
            }
        } else {
            total += 2.0 * a * a;
        }
    }
    total.sqrt()
}

/// Power-of-two factor that keeps an integrated spectrum inside Q15
///
/// `amplitudes` is the one-sided spectrum of a `sample_count` long window.
#[must_use]
pub fn integral_rescaling_factor(amplitudes: &[i16], sample_count: usize, sampling_rate: u16) -> u16 {
    let omega = 2.0 * PI * bin_width(sampling_rate, sample_count);
    let max_val = amplitudes
        .iter()
        .enumerate()
        .skip(1)
        .map(|(k, &a)| f32::from(a) / (k as f32 * omega))
        .fold(2.0f32, f32::max);
    let bit = (RESCALE_TARGET_BIT - max_val.log2().ceil() as i32).max(0);
    1u16 << bit
}

/// Band-pass and integrate a one-sided amplitude spectrum in place
///
/// Bins below `low_cut_hz` (and always the DC bin) and from `high_cut_hz`
/// up to Nyquist are zeroed; the rest are divided by `k * omega` and
/// multiplied by `scaling`.
pub fn filter_and_integrate(
    amplitudes: &mut [i16],
    sample_count: usize,
    sampling_rate: u16,
    low_cut_hz: u16,
    high_cut_hz: u16,
    scaling: u16,
) {
    let df = bin_width(sampling_rate, sample_count);
    let nyquist = sample_count / 2;
    let end = amplitudes.len().min(nyquist + 1);
    let low_idx = ((f32::from(low_cut_hz) / df) as usize).max(1).min(end);
    let high_idx = ((f32::from(high_cut_hz) / df) as usize).min(nyquist + 1).min(end);
    let omega = 2.0 * PI * df / f32::from(scaling);

    for a in &mut amplitudes[..low_idx] {
        *a = 0;
    }
    if high_idx < end {
        for a in &mut amplitudes[high_idx..end] {
            *a = 0;
        }
    }
    for k in low_idx..high_idx {
        amplitudes[k] = quantize(f32::from(amplitudes[k]) / (k as f32 * omega));
    }
}
