//! Shared types used across the pipeline
//!
//! Arena handles, the operation state classification and sample format
//! tags. Handles are plain indices into the fixed-capacity vectors owned by
//! [`crate::pipeline::Pipeline`]; they are only meaningful for the pipeline
//! that issued them.

use core::fmt;

use crate::config::{NAME_CAPACITY, OPERATION_STATE_THRESHOLD_COUNT};

/// Fixed-capacity name of a feature or group
pub type Name = heapless::String<NAME_CAPACITY>;

/// Handle of a feature inside a pipeline
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub(crate) u8);

impl FeatureId {
    /// Arena index of this feature
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureId({})", self.0)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for FeatureId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "feature#{}", self.0);
    }
}

/// Handle of a feature computer inside a pipeline
///
/// A feature that is not computed (raw sensor data) has no computer, which
/// is expressed as `Option<ComputerId>` rather than a reserved id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputerId(pub(crate) u8);

impl ComputerId {
    /// Arena index of this computer
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComputerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComputerId({})", self.0)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for ComputerId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "computer#{}", self.0);
    }
}

/// Handle of a feature group inside a pipeline
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub(crate) u8);

impl GroupId {
    /// Arena index of this group
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for GroupId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "group#{}", self.0);
    }
}

/// Index of a receiver registered on one feature
///
/// Returned by [`crate::pipeline::Feature::add_receiver`]; selects the
/// receiver's read cursor and acknowledgement column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReceiverIdx(pub(crate) u8);

impl ReceiverIdx {
    /// Position of the receiver in the feature's receiver list
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for ReceiverIdx {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "receiver#{}", self.0);
    }
}

/// Four level health classification of a feature value
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OperationState {
    /// Below the first threshold (or classification disabled)
    #[default]
    Idle = 0,
    /// Above the first threshold
    Normal = 1,
    /// Above the second threshold
    Warning = 2,
    /// Above the third threshold
    Danger = 3,
}

impl OperationState {
    /// Classify a value against 3 ordered thresholds
    ///
    /// Comparisons are strict: a value equal to a threshold stays in the
    /// lower state.
    #[must_use]
    pub fn classify(value: f32, thresholds: &[f32; OPERATION_STATE_THRESHOLD_COUNT]) -> Self {
        if value > thresholds[2] {
            Self::Danger
        } else if value > thresholds[1] {
            Self::Warning
        } else if value > thresholds[0] {
            Self::Normal
        } else {
            Self::Idle
        }
    }

    /// Decode a state from its numeric value (as stored in a float feature)
    ///
    /// Values are rounded to the nearest level and clamped to `Danger`.
    #[must_use]
    pub fn from_value(value: f32) -> Self {
        if value >= 2.5 {
            Self::Danger
        } else if value >= 1.5 {
            Self::Warning
        } else if value >= 0.5 {
            Self::Normal
        } else {
            Self::Idle
        }
    }

    /// Single ASCII digit used on the wire
    #[must_use]
    pub const fn as_digit(self) -> char {
        match self {
            Self::Idle => '0',
            Self::Normal => '1',
            Self::Warning => '2',
            Self::Danger => '3',
        }
    }

    /// Numeric value of the state
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for OperationState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Idle => defmt::write!(f, "IDLE"),
            Self::Normal => defmt::write!(f, "NORMAL"),
            Self::Warning => defmt::write!(f, "WARNING"),
            Self::Danger => defmt::write!(f, "DANGER"),
        }
    }
}

/// Storage format of a feature's samples
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed Q1.15 fixed point (raw 16 bit sensor counts)
    Q15,
    /// Signed Q1.31 fixed point (raw 32 bit audio counts)
    Q31,
    /// 32 bit float (computed features)
    Float,
}

#[cfg(feature = "embedded")]
impl defmt::Format for SampleFormat {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Q15 => defmt::write!(f, "Q15"),
            Self::Q31 => defmt::write!(f, "Q31"),
            Self::Float => defmt::write!(f, "F32"),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_classify_uses_strict_thresholds() {
        let t = [1.0, 2.0, 3.0];
        assert_eq!(OperationState::classify(0.5, &t), OperationState::Idle);
        assert_eq!(OperationState::classify(1.0, &t), OperationState::Idle);
        assert_eq!(OperationState::classify(1.5, &t), OperationState::Normal);
        assert_eq!(OperationState::classify(2.5, &t), OperationState::Warning);
        assert_eq!(OperationState::classify(3.5, &t), OperationState::Danger);
    }

    #[test]
    fn test_state_ordering_matches_severity() {
        assert!(OperationState::Idle < OperationState::Normal);
        assert!(OperationState::Warning < OperationState::Danger);
        assert_eq!(OperationState::default(), OperationState::Idle);
    }

    #[test]
    fn test_from_value_round_trips_numeric_levels() {
        for state in [
            OperationState::Idle,
            OperationState::Normal,
            OperationState::Warning,
            OperationState::Danger,
        ] {
            assert_eq!(OperationState::from_value(f32::from(state.as_u8())), state);
        }
        assert_eq!(OperationState::Warning.as_digit(), '2');
    }
}
