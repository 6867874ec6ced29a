//! Pipeline construction errors
//!
//! Runtime operations never fail: they return `bool` or apply a corrective
//! transition. Only wiring the pipeline at startup can be rejected, and
//! every rejection is also logged where it happens.

use thiserror_no_std::Error;

/// Error raised while building a pipeline
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// A feature or group with the same name already exists
    #[error("duplicate name")]
    DuplicateName,
    /// A name does not fit in the fixed-capacity name string
    #[error("name too long")]
    NameTooLong,
    /// A fixed-capacity table (features, receivers, sources...) is full
    #[error("capacity exceeded")]
    CapacityExceeded,
    /// Section count or section size out of range, or storage too small
    #[error("invalid buffer geometry")]
    InvalidGeometry,
    /// Sections per compute must be non-zero and divide the section count
    #[error("window does not divide section count")]
    InvalidWindow,
    /// FFT length must be a power of two no larger than the scratch space
    #[error("unsupported FFT length")]
    InvalidFftLength,
    /// The computer kind does not accept this many sources or destinations
    #[error("wrong number of sources or destinations")]
    InvalidArity,
    /// The feature is already the destination of another computer
    #[error("feature already computed")]
    AlreadyComputed,
    /// A handle does not belong to this pipeline
    #[error("unknown handle")]
    UnknownHandle,
    /// A compute pass would emit more values than the staging area holds
    #[error("output too large")]
    OutputTooLarge,
}

#[cfg(feature = "embedded")]
impl defmt::Format for PipelineError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::DuplicateName => defmt::write!(f, "DuplicateName"),
            Self::NameTooLong => defmt::write!(f, "NameTooLong"),
            Self::CapacityExceeded => defmt::write!(f, "CapacityExceeded"),
            Self::InvalidGeometry => defmt::write!(f, "InvalidGeometry"),
            Self::InvalidWindow => defmt::write!(f, "InvalidWindow"),
            Self::InvalidFftLength => defmt::write!(f, "InvalidFftLength"),
            Self::InvalidArity => defmt::write!(f, "InvalidArity"),
            Self::AlreadyComputed => defmt::write!(f, "AlreadyComputed"),
            Self::UnknownHandle => defmt::write!(f, "UnknownHandle"),
            Self::OutputTooLarge => defmt::write!(f, "OutputTooLarge"),
        }
    }
}

/// Result alias for pipeline construction
pub type PipelineResult<T> = Result<T, PipelineError>;
