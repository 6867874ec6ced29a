//! Computer kernels
//!
//! Pure functions from source windows to destination values. A kernel
//! never touches features: it reads [`SourceView`]s and pushes values into
//! a [`Staging`] area that the pipeline applies to the destinations once
//! the kernel returned.

use fixed::types::I1F15;
use heapless::Vec;

#[cfg(feature = "embedded")]
use micromath::F32Ext;

use crate::config::{MAX_DESTINATIONS, MAX_FFT_SIZE, MAX_STAGED_OUTPUTS};
use crate::dsp::fft::real_fft;
use crate::dsp::spectrum::{
    amplitudes, bin_width, filter_and_integrate, integral_rescaling_factor, quantize, spectrum_rms,
};
use crate::dsp::stats::{mean, rms, sum, sum_of_squares};
use crate::types::OperationState;

use super::computer::{AudioDbSettings, ComputerKind, FftSettings, RmsSettings, SumSettings};
use super::values::{Sample, SampleSlice};

const MAX_BINS: usize = MAX_FFT_SIZE / 2 + 1;

/// What a kernel sees of one source
#[derive(Clone, Copy, Debug)]
pub struct SourceView<'s> {
    /// The window to consume
    pub samples: SampleSlice<'s>,
    /// Source sampling rate (Hz)
    pub sampling_rate: u16,
    /// Source resolution
    pub resolution: f32,
    /// Source operation state
    pub operation_state: OperationState,
}

/// Metadata a kernel propagates to a destination
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DestinationMeta {
    /// Sampling rate (Hz)
    pub sampling_rate: u16,
    /// Resolution
    pub resolution: f32,
}

/// Values produced by one compute pass, keyed by destination rank
#[derive(Debug)]
pub struct Staging {
    outputs: Vec<(u8, Sample), MAX_STAGED_OUTPUTS>,
    meta: [Option<DestinationMeta>; MAX_DESTINATIONS],
    overflowed: bool,
}

impl Staging {
    /// Empty staging area
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outputs: Vec::new(),
            meta: [None; MAX_DESTINATIONS],
            overflowed: false,
        }
    }

    /// Drop staged values and metadata
    pub fn clear(&mut self) {
        self.outputs.clear();
        self.meta = [None; MAX_DESTINATIONS];
        self.overflowed = false;
    }

    /// Stage a value for the destination of rank `destination`
    pub fn emit(&mut self, destination: usize, sample: Sample) {
        // destination < MAX_DESTINATIONS, fits in u8
        if self.outputs.push((destination as u8, sample)).is_err() && !self.overflowed {
            self.overflowed = true;
            pipeline_warn!("compute output truncated at {} values", MAX_STAGED_OUTPUTS);
        }
    }

    /// Set the metadata propagated to the destination of rank `destination`
    pub fn describe(&mut self, destination: usize, sampling_rate: u16, resolution: f32) {
        if let Some(slot) = self.meta.get_mut(destination) {
            *slot = Some(DestinationMeta {
                sampling_rate,
                resolution,
            });
        }
    }

    /// Staged values in emission order
    #[must_use]
    pub fn outputs(&self) -> &[(u8, Sample)] {
        &self.outputs
    }

    /// Metadata staged for the destination of rank `destination`
    #[must_use]
    pub fn meta(&self, destination: usize) -> Option<DestinationMeta> {
        self.meta.get(destination).copied().flatten()
    }
}

impl Default for Staging {
    fn default() -> Self {
        Self::new()
    }
}

/// Working memory of the FFT kernel, shared by every FFT computer
#[derive(Debug)]
pub struct FftScratch {
    re: [f32; MAX_FFT_SIZE],
    im: [f32; MAX_FFT_SIZE],
    spectrum_re: [i16; MAX_BINS],
    spectrum_im: [i16; MAX_BINS],
    amplitudes: [i16; MAX_BINS],
    work: [i16; MAX_BINS],
}

impl FftScratch {
    /// Zeroed scratch space
    #[must_use]
    pub const fn new() -> Self {
        Self {
            re: [0.0; MAX_FFT_SIZE],
            im: [0.0; MAX_FFT_SIZE],
            spectrum_re: [0; MAX_BINS],
            spectrum_im: [0; MAX_BINS],
            amplitudes: [0; MAX_BINS],
            work: [0; MAX_BINS],
        }
    }
}

impl Default for FftScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the kernel of `kind`
///
/// `reduced_len` is the number of `(index, re, im)` triples the FFT kernel
/// keeps; other kernels ignore it.
pub fn run(
    kind: &ComputerKind,
    sources: &[SourceView<'_>],
    reduced_len: usize,
    staging: &mut Staging,
    fft: &mut FftScratch,
) {
    let Some(first) = sources.first() else {
        return;
    };
    match kind {
        ComputerKind::SignalRms(settings) => signal_rms(first, settings, staging),
        ComputerKind::SectionSum(settings) => section_sum(sources, settings, staging),
        ComputerKind::MultiSourceSum(settings) => multi_source_sum(sources, settings, staging),
        ComputerKind::Q15Fft(settings) => q15_fft(first, settings, reduced_len, staging, fft),
        ComputerKind::AudioDb(settings) => audio_db(first, settings, staging),
        ComputerKind::OperationState => operation_state(sources, staging),
    }
}

/// RMS of one window, optionally around its mean and normalized by length
pub fn signal_rms(source: &SourceView<'_>, settings: &RmsSettings, staging: &mut Staging) {
    let offset = if settings.remove_mean {
        mean(source.samples.iter_raw())
    } else {
        0.0
    };
    let level = if settings.normalize {
        rms(source.samples.iter_raw(), offset)
    } else {
        sum_of_squares(source.samples.iter_raw(), offset).0.sqrt()
    };
    staging.describe(0, source.sampling_rate, source.resolution);
    staging.emit(0, Sample::Float(level * settings.calibration_scaling));
}

/// Sum of each source window into the destination of the same rank
pub fn section_sum(sources: &[SourceView<'_>], settings: &SumSettings, staging: &mut Staging) {
    for (rank, source) in sources.iter().enumerate() {
        let length = source.samples.len();
        let mut total = if settings.rms_like {
            sum_of_squares(source.samples.iter_raw(), 0.0).0
        } else {
            sum(source.samples.iter_raw())
        };
        if (settings.normalize || settings.rms_like) && length > 0 {
            total /= length as f32;
        }
        if settings.rms_like {
            total = total.sqrt();
        }
        staging.describe(rank, source.sampling_rate, source.resolution);
        staging.emit(rank, Sample::Float(total));
    }
}

/// Element-wise combination of parallel source windows
pub fn multi_source_sum(sources: &[SourceView<'_>], settings: &SumSettings, staging: &mut Staging) {
    let Some(first) = sources.first() else {
        return;
    };
    let length = sources.iter().map(|s| s.samples.len()).min().unwrap_or(0);
    let count = sources.len() as f32;
    staging.describe(0, first.sampling_rate, first.resolution);
    for k in 0..length {
        let mut total = 0.0f32;
        for source in sources {
            let v = source.samples.raw(k);
            total += if settings.rms_like { v * v } else { v };
        }
        if settings.normalize || settings.rms_like {
            total /= count;
        }
        if settings.rms_like {
            total = total.sqrt();
        }
        staging.emit(0, Sample::Float(total));
    }
}

/// Audio level in dB: `20 * mean(log10 |x|)`, then calibration
///
/// Products of sample magnitudes are accumulated in a `u64` and only
/// passed through `log10` when the next product could overflow.
pub fn audio_db(source: &SourceView<'_>, settings: &AudioDbSettings, staging: &mut Staging) {
    let length = source.samples.len();
    let max_abs = source
        .samples
        .iter_raw()
        .fold(0.0f32, |m, v| m.max(v.abs())) as u64;
    let mut log_sum = 0.0f32;
    if max_abs > 0 {
        let limit = u64::MAX / max_abs;
        let mut accu: u64 = 1;
        for v in source.samples.iter_raw() {
            let magnitude = v.abs() as u64;
            if magnitude == 0 {
                continue;
            }
            if accu > limit {
                log_sum += (accu as f32).log10();
                accu = 1;
            }
            accu *= magnitude;
        }
        log_sum += (accu as f32).log10();
    }
    let db = if length == 0 {
        0.0
    } else {
        20.0 * log_sum / length as f32
    };
    staging.describe(0, source.sampling_rate, source.resolution);
    staging.emit(
        0,
        Sample::Float(db * settings.calibration_scaling + settings.calibration_offset),
    );
}

/// Highest operation state among the sources, as a float level
pub fn operation_state(sources: &[SourceView<'_>], staging: &mut Staging) {
    let Some(first) = sources.first() else {
        return;
    };
    let worst = sources
        .iter()
        .map(|s| s.operation_state)
        .max()
        .unwrap_or_default();
    staging.describe(0, first.sampling_rate, 1.0);
    staging.emit(0, Sample::Float(f32::from(worst.as_u8())));
}

/// FFT features of an acceleration window
///
/// Destinations, by rank:
/// 0. reduced FFT: the `reduced_len` largest bins as `(index, re, im)` Q15
/// 1. main frequency: first of those peaks strictly inside the band (Hz)
/// 2. velocity RMS: single integration of the band-passed spectrum
/// 3. displacement RMS: double integration
///
/// When the acceleration RMS (DC excluded) is at most `min_agitation` the
/// node is still and destinations 1 to 3 receive 0. A main frequency that
/// no peak satisfies is also reported as 0.
pub fn q15_fft(
    source: &SourceView<'_>,
    settings: &FftSettings,
    reduced_len: usize,
    staging: &mut Staging,
    fft: &mut FftScratch,
) {
    let rate = source.sampling_rate;
    let resolution = source.resolution;
    for rank in 0..4 {
        staging.describe(rank, rate, if rank == 1 { 1.0 } else { resolution });
    }

    let Some(n) = real_fft(source.samples.iter_raw(), &mut fft.re, &mut fft.im) else {
        pipeline_warn!("FFT length {} is not a power of two", source.samples.len());
        return;
    };
    let bins = n / 2 + 1;
    for k in 0..bins {
        fft.spectrum_re[k] = quantize(fft.re[k]);
        fft.spectrum_im[k] = quantize(fft.im[k]);
    }
    amplitudes(&fft.spectrum_re[..bins], &fft.spectrum_im[..bins], &mut fft.amplitudes[..bins]);

    let agitation = spectrum_rms(&fft.amplitudes[..bins], true);
    let in_motion = agitation * resolution > settings.min_agitation;
    if !in_motion {
        pipeline_debug!("still: agitation {} below {}", agitation * resolution, settings.min_agitation);
    }

    // Reduced FFT: repeatedly take the largest remaining bin
    let df = bin_width(rate, n);
    let low = f32::from(settings.low_cut_hz);
    let high = f32::from(settings.high_cut_hz);
    let mut main_frequency = None;
    fft.work[..bins].copy_from_slice(&fft.amplitudes[..bins]);
    for _ in 0..reduced_len.min(bins) {
        let mut peak = 0;
        for k in 1..bins {
            if fft.work[k] > fft.work[peak] {
                peak = k;
            }
        }
        // Amplitudes are non-negative, -1 marks a bin as taken
        fft.work[peak] = -1;
        // peak < MAX_BINS, fits in i16
        staging.emit(0, Sample::Q15(I1F15::from_bits(peak as i16)));
        staging.emit(0, Sample::Q15(I1F15::from_bits(fft.spectrum_re[peak])));
        staging.emit(0, Sample::Q15(I1F15::from_bits(fft.spectrum_im[peak])));
        if in_motion && main_frequency.is_none() {
            let frequency = df * peak as f32;
            if frequency > low && frequency < high {
                main_frequency = Some(frequency);
            }
        }
    }
    staging.emit(1, Sample::Float(main_frequency.unwrap_or(0.0)));

    if !in_motion {
        staging.emit(2, Sample::Float(0.0));
        staging.emit(3, Sample::Float(0.0));
        return;
    }

    let spectrum = &mut fft.amplitudes[..bins];
    let scaling1 = integral_rescaling_factor(spectrum, n, rate);
    filter_and_integrate(spectrum, n, rate, settings.low_cut_hz, settings.high_cut_hz, scaling1);
    let velocity =
        spectrum_rms(spectrum, false) * 1000.0 / f32::from(scaling1) * settings.velocity_scaling;
    staging.emit(2, Sample::Float(velocity));

    let scaling2 = integral_rescaling_factor(spectrum, n, rate);
    filter_and_integrate(spectrum, n, rate, settings.low_cut_hz, settings.high_cut_hz, scaling2);
    let displacement = spectrum_rms(spectrum, false) * 1000.0
        / (f32::from(scaling1) * f32::from(scaling2))
        * settings.displacement_scaling;
    staging.emit(3, Sample::Float(displacement));
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn view(samples: SampleSlice<'_>) -> SourceView<'_> {
        SourceView {
            samples,
            sampling_rate: 100,
            resolution: 0.5,
            operation_state: OperationState::Idle,
        }
    }

    fn float_at(staging: &Staging, i: usize) -> f32 {
        match staging.outputs()[i].1 {
            Sample::Float(v) => v,
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_rms_removes_mean() {
        let data = [3.0f32, 5.0, 3.0, 5.0];
        let mut staging = Staging::new();
        signal_rms(&view(SampleSlice::Float(&data)), &RmsSettings::default(), &mut staging);
        assert!((float_at(&staging, 0) - 1.0).abs() < 1e-6);
        assert_eq!(
            staging.meta(0),
            Some(DestinationMeta {
                sampling_rate: 100,
                resolution: 0.5
            })
        );
    }

    #[test]
    fn test_signal_rms_without_normalization() {
        let data = [1.0f32, -1.0, 1.0, -1.0];
        let settings = RmsSettings {
            remove_mean: false,
            normalize: false,
            calibration_scaling: 2.0,
        };
        let mut staging = Staging::new();
        signal_rms(&view(SampleSlice::Float(&data)), &settings, &mut staging);
        // sqrt(4) * 2
        assert!((float_at(&staging, 0) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_section_sum_modes() {
        let data = [3.0f32, 4.0];
        let source = view(SampleSlice::Float(&data));
        let mut staging = Staging::new();
        section_sum(&[source], &SumSettings::default(), &mut staging);
        section_sum(
            &[source],
            &SumSettings {
                normalize: true,
                rms_like: false,
            },
            &mut staging,
        );
        section_sum(
            &[source],
            &SumSettings {
                normalize: false,
                rms_like: true,
            },
            &mut staging,
        );
        assert!((float_at(&staging, 0) - 7.0).abs() < 1e-6);
        assert!((float_at(&staging, 1) - 3.5).abs() < 1e-6);
        // sqrt((9 + 16) / 2)
        assert!((float_at(&staging, 2) - 12.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_multi_source_sum_root_sum_square() {
        let x = [3.0f32, 1.0];
        let y = [4.0f32, 1.0];
        let sources = [view(SampleSlice::Float(&x)), view(SampleSlice::Float(&y))];
        let mut staging = Staging::new();
        multi_source_sum(
            &sources,
            &SumSettings {
                normalize: false,
                rms_like: true,
            },
            &mut staging,
        );
        assert_eq!(staging.outputs().len(), 2);
        assert!((float_at(&staging, 0) - 12.5f32.sqrt()).abs() < 1e-6);
        assert!((float_at(&staging, 1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_audio_db_of_constant_level() {
        let data = [I1F15::from_bits(100); 64];
        let mut staging = Staging::new();
        audio_db(
            &view(SampleSlice::Q15(&data)),
            &AudioDbSettings {
                calibration_scaling: 1.0,
                calibration_offset: 3.0,
            },
            &mut staging,
        );
        // 20 * log10(100) + 3
        assert!((float_at(&staging, 0) - 43.0).abs() < 1e-3);
    }

    #[test]
    fn test_audio_db_of_silence() {
        let data = [I1F15::ZERO; 16];
        let mut staging = Staging::new();
        audio_db(&view(SampleSlice::Q15(&data)), &AudioDbSettings::default(), &mut staging);
        assert_eq!(float_at(&staging, 0), 0.0);
    }

    #[test]
    fn test_operation_state_takes_worst_source() {
        let data = [0.0f32];
        let mut warning = view(SampleSlice::Float(&data));
        warning.operation_state = OperationState::Warning;
        let normal = SourceView {
            operation_state: OperationState::Normal,
            ..warning
        };
        let mut staging = Staging::new();
        operation_state(&[normal, warning], &mut staging);
        assert_eq!(float_at(&staging, 0), 2.0);
    }

    #[test]
    fn test_staging_truncates_instead_of_failing() {
        let mut staging = Staging::new();
        for _ in 0..MAX_STAGED_OUTPUTS + 10 {
            staging.emit(0, Sample::Float(1.0));
        }
        assert_eq!(staging.outputs().len(), MAX_STAGED_OUTPUTS);
        staging.clear();
        assert!(staging.outputs().is_empty());
    }
}
