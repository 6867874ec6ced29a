//! Digital Signal Processing
//!
//! Provides the numeric building blocks of the feature computers:
//! - Radix-2 complex FFT with 1/N output scaling
//! - Q15 spectrum amplitudes, band-pass and frequency-domain integration
//! - Mean / RMS / sum statistics over raw sample streams

pub mod fft;
pub mod spectrum;
pub mod stats;
