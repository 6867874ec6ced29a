//! Feature sample storage
//!
//! A feature does not own its samples: it borrows a caller-provided array
//! (usually a `static`) in one of three formats. Kernels read samples as
//! *raw* `f32` values, i.e. sensor counts for the fixed-point formats and
//! the stored value for floats; `resolution` turns raw into physical units.

use fixed::types::{I1F15, I1F31};

#[cfg(feature = "embedded")]
use micromath::F32Ext;

use crate::types::SampleFormat;

/// One sample in any storage format
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    /// Q1.15 sample
    Q15(I1F15),
    /// Q1.31 sample
    Q31(I1F31),
    /// Float sample
    Float(f32),
}

impl Sample {
    /// Raw value of the sample (counts for fixed point)
    #[must_use]
    pub fn raw(self) -> f32 {
        match self {
            Self::Q15(v) => f32::from(v.to_bits()),
            Self::Q31(v) => v.to_bits() as f32,
            Self::Float(v) => v,
        }
    }
}

/// Mutable sample storage borrowed by a feature
pub enum FeatureValues<'a> {
    /// Q1.15 storage (accelerometer)
    Q15(&'a mut [I1F15]),
    /// Q1.31 storage (audio)
    Q31(&'a mut [I1F31]),
    /// Float storage (computed features)
    Float(&'a mut [f32]),
}

impl FeatureValues<'_> {
    /// Number of samples the storage can hold
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Q15(v) => v.len(),
            Self::Q31(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    /// Whether the storage is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage format
    #[must_use]
    pub fn format(&self) -> SampleFormat {
        match self {
            Self::Q15(_) => SampleFormat::Q15,
            Self::Q31(_) => SampleFormat::Q31,
            Self::Float(_) => SampleFormat::Float,
        }
    }

    /// Store `sample` at `index`, converting to the storage format
    ///
    /// Floats are rounded and saturated into fixed point raw counts; fixed
    /// point formats convert between each other by value.
    pub(crate) fn set(&mut self, index: usize, sample: Sample) {
        match (self, sample) {
            (Self::Q15(v), Sample::Q15(s)) => v[index] = s,
            (Self::Q15(v), Sample::Q31(s)) => v[index] = s.saturating_to_num(),
            (Self::Q15(v), Sample::Float(s)) => v[index] = I1F15::from_bits(s.round() as i16),
            (Self::Q31(v), Sample::Q31(s)) => v[index] = s,
            (Self::Q31(v), Sample::Q15(s)) => v[index] = I1F31::from_num(s),
            (Self::Q31(v), Sample::Float(s)) => v[index] = I1F31::from_bits(s.round() as i32),
            (Self::Float(v), s) => v[index] = s.raw(),
        }
    }

    /// Zero every sample
    pub(crate) fn clear(&mut self) {
        match self {
            Self::Q15(v) => v.fill(I1F15::ZERO),
            Self::Q31(v) => v.fill(I1F31::ZERO),
            Self::Float(v) => v.fill(0.0),
        }
    }

    /// Read-only view of `start..end`
    pub(crate) fn slice(&self, start: usize, end: usize) -> SampleSlice<'_> {
        match self {
            Self::Q15(v) => SampleSlice::Q15(&v[start..end]),
            Self::Q31(v) => SampleSlice::Q31(&v[start..end]),
            Self::Float(v) => SampleSlice::Float(&v[start..end]),
        }
    }
}

/// Read-only view over samples of any format
#[derive(Clone, Copy, Debug)]
pub enum SampleSlice<'s> {
    /// Q1.15 samples
    Q15(&'s [I1F15]),
    /// Q1.31 samples
    Q31(&'s [I1F31]),
    /// Float samples
    Float(&'s [f32]),
}

impl<'s> SampleSlice<'s> {
    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Q15(v) => v.len(),
            Self::Q31(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    /// Whether the view is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value of sample `index`
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn raw(&self, index: usize) -> f32 {
        self.get(index).raw()
    }

    /// Sample `index` as a [`Sample`]
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Sample {
        match self {
            Self::Q15(v) => Sample::Q15(v[index]),
            Self::Q31(v) => Sample::Q31(v[index]),
            Self::Float(v) => Sample::Float(v[index]),
        }
    }

    /// Iterate over raw values
    #[must_use]
    pub fn iter_raw(self) -> RawSamples<'s> {
        RawSamples { slice: self, pos: 0 }
    }
}

/// Iterator over the raw values of a [`SampleSlice`]
#[derive(Clone, Debug)]
pub struct RawSamples<'s> {
    slice: SampleSlice<'s>,
    pos: usize,
}

impl Iterator for RawSamples<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos < self.slice.len() {
            let value = self.slice.raw(self.pos);
            self.pos += 1;
            Some(value)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slice.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RawSamples<'_> {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for fixed::types::I1F15 {}
    impl Sealed for fixed::types::I1F31 {}
    impl Sealed for f32 {}
}

/// Sample types a feature can store
///
/// Implemented for [`I1F15`], [`I1F31`] and `f32`.
pub trait SampleValue: Copy + sealed::Sealed {
    /// Wrap the value as a [`Sample`]
    fn into_sample(self) -> Sample;

    /// Borrow a view as `&[Self]` if it has this format
    fn view(slice: SampleSlice<'_>) -> Option<&[Self]>;
}

impl SampleValue for I1F15 {
    fn into_sample(self) -> Sample {
        Sample::Q15(self)
    }

    fn view(slice: SampleSlice<'_>) -> Option<&[Self]> {
        match slice {
            SampleSlice::Q15(v) => Some(v),
            _ => None,
        }
    }
}

impl SampleValue for I1F31 {
    fn into_sample(self) -> Sample {
        Sample::Q31(self)
    }

    fn view(slice: SampleSlice<'_>) -> Option<&[Self]> {
        match slice {
            SampleSlice::Q31(v) => Some(v),
            _ => None,
        }
    }
}

impl SampleValue for f32 {
    fn into_sample(self) -> Sample {
        Sample::Float(self)
    }

    fn view(slice: SampleSlice<'_>) -> Option<&[Self]> {
        match slice {
            SampleSlice::Float(v) => Some(v),
            _ => None,
        }
    }
}
