//! Feature Computers
//!
//! A [`FeatureComputer`] reads windows of 1 to [`MAX_SOURCES`] source
//! features and writes into 1 to [`MAX_DESTINATIONS`] destination features.
//! The set of algorithms is closed, so the algorithm is a [`ComputerKind`]
//! variant carrying its settings and dispatched by a single `match` in
//! [`super::kernels`].

use heapless::Vec;

use crate::config::{
    ACCEL_RMS_SCALING, AUDIO_DB_OFFSET, AUDIO_DB_SCALING, DEFAULT_HIGH_CUT_HZ, DEFAULT_LOW_CUT_HZ,
    DEFAULT_MIN_AGITATION, DISPLACEMENT_RMS_SCALING, MAX_DESTINATIONS, MAX_SOURCES,
    VELOCITY_RMS_SCALING,
};
use crate::types::{FeatureId, ReceiverIdx};

/// Settings of the signal RMS computer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RmsSettings {
    /// Subtract the window mean before squaring
    pub remove_mean: bool,
    /// Divide the sum of squares by the window length
    pub normalize: bool,
    /// Calibration factor applied to the result
    pub calibration_scaling: f32,
}

impl Default for RmsSettings {
    fn default() -> Self {
        Self {
            remove_mean: true,
            normalize: true,
            calibration_scaling: ACCEL_RMS_SCALING,
        }
    }
}

/// Settings shared by the section sum and multi-source sum computers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SumSettings {
    /// Divide the sum by the number of terms
    pub normalize: bool,
    /// Root-sum-square combine (implies averaging before the root)
    pub rms_like: bool,
}

/// Settings of the Q15 FFT computer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FftSettings {
    /// Band-pass lower cutoff (Hz)
    pub low_cut_hz: u16,
    /// Band-pass upper cutoff (Hz)
    pub high_cut_hz: u16,
    /// Minimum acceleration RMS (physical units) to be in motion
    pub min_agitation: f32,
    /// Calibration factor of the velocity RMS
    pub velocity_scaling: f32,
    /// Calibration factor of the displacement RMS
    pub displacement_scaling: f32,
}

impl Default for FftSettings {
    fn default() -> Self {
        Self {
            low_cut_hz: DEFAULT_LOW_CUT_HZ,
            high_cut_hz: DEFAULT_HIGH_CUT_HZ,
            min_agitation: DEFAULT_MIN_AGITATION,
            velocity_scaling: VELOCITY_RMS_SCALING,
            displacement_scaling: DISPLACEMENT_RMS_SCALING,
        }
    }
}

/// Settings of the audio dB computer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioDbSettings {
    /// Calibration factor applied to the dB value
    pub calibration_scaling: f32,
    /// Calibration offset added after scaling
    pub calibration_offset: f32,
}

impl Default for AudioDbSettings {
    fn default() -> Self {
        Self {
            calibration_scaling: AUDIO_DB_SCALING,
            calibration_offset: AUDIO_DB_OFFSET,
        }
    }
}

/// Algorithm run by a feature computer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ComputerKind {
    /// RMS of one source window into one float destination
    SignalRms(RmsSettings),
    /// Sum of each source's window into the destination of the same rank
    SectionSum(SumSettings),
    /// Element-wise sum across sources into one destination
    MultiSourceSum(SumSettings),
    /// FFT of one window into reduced FFT, main frequency, velocity RMS
    /// and displacement RMS destinations (in that order)
    Q15Fft(FftSettings),
    /// dB level of an audio window into one float destination
    AudioDb(AudioDbSettings),
    /// Highest operation state of the sources into one float destination
    OperationState,
}

impl ComputerKind {
    /// Accepted destination counts (inclusive)
    #[must_use]
    pub const fn destination_range(&self) -> (usize, usize) {
        match self {
            Self::SectionSum(_) => (1, MAX_DESTINATIONS),
            Self::Q15Fft(_) => (4, 4),
            Self::SignalRms(_) | Self::MultiSourceSum(_) | Self::AudioDb(_) | Self::OperationState => {
                (1, 1)
            }
        }
    }

    /// Maximum number of sources
    #[must_use]
    pub const fn max_sources(&self, destination_count: usize) -> usize {
        match self {
            Self::SignalRms(_) | Self::Q15Fft(_) | Self::AudioDb(_) => 1,
            Self::SectionSum(_) => destination_count,
            Self::MultiSourceSum(_) | Self::OperationState => MAX_SOURCES,
        }
    }

    /// Short label for logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SignalRms(_) => "SignalRMS",
            Self::SectionSum(_) => "SectionSum",
            Self::MultiSourceSum(_) => "MultiSourceSum",
            Self::Q15Fft(_) => "Q15FFT",
            Self::AudioDb(_) => "AudioDB",
            Self::OperationState => "OperationState",
        }
    }
}

/// A source of a computer: which feature, as which receiver, how many sections
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLink {
    /// Source feature
    pub feature: FeatureId,
    /// Receiver index assigned by the source feature
    pub receiver: ReceiverIdx,
    /// Sections consumed per compute
    pub window: usize,
}

/// A node of the computation graph
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureComputer {
    kind: ComputerKind,
    active: bool,
    sources: Vec<SourceLink, MAX_SOURCES>,
    destinations: Vec<FeatureId, MAX_DESTINATIONS>,
}

impl FeatureComputer {
    pub(crate) fn new(kind: ComputerKind, destinations: Vec<FeatureId, MAX_DESTINATIONS>) -> Self {
        Self {
            kind,
            active: false,
            sources: Vec::new(),
            destinations,
        }
    }

    /// Algorithm and settings
    #[must_use]
    pub const fn kind(&self) -> &ComputerKind {
        &self.kind
    }

    /// Replace the settings (the variant must stay the same to keep arity)
    pub fn set_kind(&mut self, kind: ComputerKind) -> bool {
        if core::mem::discriminant(&kind) == core::mem::discriminant(&self.kind) {
            self.kind = kind;
            true
        } else {
            false
        }
    }

    /// Whether the computer runs on `compute`
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Enable computation
    ///
    /// Goes through [`Pipeline`](super::Pipeline) so source receivers
    /// follow the flag.
    pub(crate) fn activate(&mut self) {
        self.active = true;
    }

    /// Disable computation
    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    /// Registered sources
    #[must_use]
    pub fn sources(&self) -> &[SourceLink] {
        &self.sources
    }

    /// Destination features
    #[must_use]
    pub fn destinations(&self) -> &[FeatureId] {
        &self.destinations
    }

    pub(crate) fn push_source(&mut self, link: SourceLink) -> Result<(), SourceLink> {
        self.sources.push(link)
    }
}
