//! Feature Pipeline
//!
//! [`Pipeline`] owns every feature, computer and group of the node in
//! fixed-capacity vectors and hands out index handles. It is built once at
//! startup (the only fallible phase) and then driven from the main loop:
//!
//! ```text
//! sensor ──add_value──> Feature ──compute_all──> Feature ... ──> FeatureGroup
//!                                                                  │ stream
//!                                                                  v
//!                                                             SendingQueue
//! ```
//!
//! - [`buffer`]: section ring buffer with multi-receiver acknowledgement
//! - [`computer`] / [`kernels`]: computation graph nodes and their algorithms
//! - [`graph`]: activation and deactivation traversal
//! - [`group`]: send scheduling and serialization

pub mod buffer;
pub mod computer;
pub mod graph;
pub mod group;
pub mod kernels;
pub mod values;

use heapless::Vec;

use crate::config::{
    MAX_COMPUTERS, MAX_FEATURES, MAX_FFT_SIZE, MAX_GROUPS, MAX_SOURCES, MAX_STAGED_OUTPUTS,
};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ComputerId, FeatureId, GroupId, OperationState, ReceiverIdx};

pub use buffer::{BufferCounters, Feature};
pub use computer::{
    AudioDbSettings, ComputerKind, FeatureComputer, FftSettings, RmsSettings, SourceLink,
    SumSettings,
};
pub use group::FeatureGroup;
pub use kernels::{FftScratch, SourceView, Staging};
pub use values::{FeatureValues, Sample, SampleSlice, SampleValue};

/// Arena of features, computers and groups
pub struct Pipeline<'a> {
    features: Vec<Feature<'a>, MAX_FEATURES>,
    computers: Vec<FeatureComputer, MAX_COMPUTERS>,
    groups: Vec<FeatureGroup, MAX_GROUPS>,
    operation_state_feature: Option<FeatureId>,
    staging: Staging,
    fft: FftScratch,
}

impl<'a> Pipeline<'a> {
    /// Empty pipeline
    #[must_use]
    pub const fn new() -> Self {
        Self {
            features: Vec::new(),
            computers: Vec::new(),
            groups: Vec::new(),
            operation_state_feature: None,
            staging: Staging::new(),
            fft: FftScratch::new(),
        }
    }

    // ========================================================================
    // Features
    // ========================================================================

    /// Register a feature
    ///
    /// # Errors
    /// `DuplicateName` if a feature has the same name, `CapacityExceeded`
    /// if [`MAX_FEATURES`] are registered.
    pub fn add_feature(&mut self, feature: Feature<'a>) -> PipelineResult<FeatureId> {
        if self.feature_by_name(feature.name()).is_some() {
            pipeline_warn!("duplicate feature name {}", feature.name());
            return Err(PipelineError::DuplicateName);
        }
        let idx = self.features.len();
        if self.features.push(feature).is_err() {
            pipeline_warn!("feature capacity of {} exceeded", MAX_FEATURES);
            return Err(PipelineError::CapacityExceeded);
        }
        // idx < MAX_FEATURES, fits in u8
        Ok(FeatureId(idx as u8))
    }

    /// Feature behind a handle
    #[must_use]
    pub fn feature(&self, id: FeatureId) -> Option<&Feature<'a>> {
        self.features.get(id.index())
    }

    /// Mutable feature behind a handle (sensor side uses this to add values)
    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature<'a>> {
        self.features.get_mut(id.index())
    }

    /// Find a feature by name
    #[must_use]
    pub fn feature_by_name(&self, name: &str) -> Option<FeatureId> {
        self.features
            .iter()
            .position(|f| f.name() == name)
            // position < MAX_FEATURES, fits in u8
            .map(|idx| FeatureId(idx as u8))
    }

    /// All features in registration order
    #[must_use]
    pub fn features(&self) -> &[Feature<'a>] {
        &self.features
    }

    // ========================================================================
    // Computers
    // ========================================================================

    /// Register a computer writing into `destinations`
    ///
    /// # Errors
    /// `InvalidArity` if the kind does not accept this many destinations,
    /// `UnknownHandle` for a foreign feature, `AlreadyComputed` if a
    /// destination already has a computer, `OutputTooLarge` if a reduced
    /// FFT destination asks for more values than can be staged and
    /// `CapacityExceeded` if [`MAX_COMPUTERS`] are registered.
    pub fn add_computer(
        &mut self,
        kind: ComputerKind,
        destinations: &[FeatureId],
    ) -> PipelineResult<ComputerId> {
        let (min, max) = kind.destination_range();
        if destinations.len() < min || destinations.len() > max {
            pipeline_warn!("{} takes {} to {} destinations", kind.label(), min, max);
            return Err(PipelineError::InvalidArity);
        }
        for &dest in destinations {
            let feature = self.feature(dest).ok_or(PipelineError::UnknownHandle)?;
            if feature.computer().is_some() {
                pipeline_warn!("{} already has a computer", feature.name());
                return Err(PipelineError::AlreadyComputed);
            }
        }
        if let ComputerKind::Q15Fft(_) = kind {
            let reduced = self.features[destinations[0].index()].section_size() / 3;
            if 3 * reduced + 3 > MAX_STAGED_OUTPUTS {
                return Err(PipelineError::OutputTooLarge);
            }
        }

        let idx = self.computers.len();
        if idx >= MAX_COMPUTERS {
            pipeline_warn!("computer capacity of {} exceeded", MAX_COMPUTERS);
            return Err(PipelineError::CapacityExceeded);
        }
        // idx < MAX_COMPUTERS, fits in u8
        let id = ComputerId(idx as u8);
        let mut dests = Vec::new();
        for &dest in destinations {
            // destinations.len() <= MAX_DESTINATIONS, checked above
            let _ = dests.push(dest);
            self.features[dest.index()].set_computer(id);
        }
        let _ = self.computers.push(FeatureComputer::new(kind, dests));
        Ok(id)
    }

    /// Register `feature` as a source of `computer`, read `window` sections
    /// at a time
    ///
    /// # Errors
    /// `UnknownHandle` for foreign handles, `InvalidArity` if the computer
    /// has all the sources its kind accepts, `InvalidFftLength` if an FFT
    /// window is not a power of two up to [`MAX_FFT_SIZE`], `OutputTooLarge`
    /// if a multi-source window exceeds the staging area, plus the errors
    /// of [`Feature::add_receiver`].
    pub fn add_source(
        &mut self,
        computer: ComputerId,
        feature: FeatureId,
        window: usize,
    ) -> PipelineResult<ReceiverIdx> {
        let node = self
            .computers
            .get(computer.index())
            .ok_or(PipelineError::UnknownHandle)?;
        let source = self
            .features
            .get(feature.index())
            .ok_or(PipelineError::UnknownHandle)?;
        let kind = *node.kind();
        if node.sources().len() >= kind.max_sources(node.destinations().len()) {
            pipeline_warn!("{} cannot take another source", kind.label());
            return Err(PipelineError::InvalidArity);
        }
        let length = window * source.section_size();
        match kind {
            ComputerKind::Q15Fft(_) if !length.is_power_of_two() || length > MAX_FFT_SIZE => {
                pipeline_warn!("{}: FFT over {} samples unsupported", source.name(), length);
                return Err(PipelineError::InvalidFftLength);
            }
            ComputerKind::MultiSourceSum(_) if length > MAX_STAGED_OUTPUTS => {
                return Err(PipelineError::OutputTooLarge);
            }
            _ => {}
        }

        let receiver = self.features[feature.index()].add_receiver(Some(computer), window)?;
        if !node.is_active() {
            self.features[feature.index()].pause_receiver(receiver);
        }
        let link = SourceLink {
            feature,
            receiver,
            window,
        };
        // max_sources() <= MAX_SOURCES, checked above
        let _ = self.computers[computer.index()].push_source(link);
        Ok(receiver)
    }

    /// Computer behind a handle
    #[must_use]
    pub fn computer(&self, id: ComputerId) -> Option<&FeatureComputer> {
        self.computers.get(id.index())
    }

    /// Mutable computer behind a handle (to tune settings)
    pub fn computer_mut(&mut self, id: ComputerId) -> Option<&mut FeatureComputer> {
        self.computers.get_mut(id.index())
    }

    /// All computers in registration order
    #[must_use]
    pub fn computers(&self) -> &[FeatureComputer] {
        &self.computers
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Register a group
    ///
    /// # Errors
    /// `DuplicateName` if a group has the same name, `CapacityExceeded` if
    /// [`MAX_GROUPS`] are registered.
    pub fn add_group(&mut self, group: FeatureGroup) -> PipelineResult<GroupId> {
        if self.group_by_name(group.name()).is_some() {
            pipeline_warn!("duplicate group name {}", group.name());
            return Err(PipelineError::DuplicateName);
        }
        let idx = self.groups.len();
        if self.groups.push(group).is_err() {
            pipeline_warn!("group capacity of {} exceeded", MAX_GROUPS);
            return Err(PipelineError::CapacityExceeded);
        }
        // idx < MAX_GROUPS, fits in u8
        Ok(GroupId(idx as u8))
    }

    /// Append a feature to a group
    ///
    /// # Errors
    /// `UnknownHandle` for foreign handles, plus the errors of
    /// [`FeatureGroup::add_feature`].
    pub fn add_feature_to_group(&mut self, group: GroupId, feature: FeatureId) -> PipelineResult<()> {
        if self.feature(feature).is_none() {
            return Err(PipelineError::UnknownHandle);
        }
        self.groups
            .get_mut(group.index())
            .ok_or(PipelineError::UnknownHandle)?
            .add_feature(feature)
    }

    /// Group behind a handle
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&FeatureGroup> {
        self.groups.get(id.index())
    }

    /// Mutable group behind a handle
    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut FeatureGroup> {
        self.groups.get_mut(id.index())
    }

    /// Find a group by name
    #[must_use]
    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.name() == name)
            // position < MAX_GROUPS, fits in u8
            .map(|idx| GroupId(idx as u8))
    }

    /// All groups in registration order
    #[must_use]
    pub fn groups(&self) -> &[FeatureGroup] {
        &self.groups
    }

    // ========================================================================
    // Device operation state
    // ========================================================================

    /// Designate the feature that always stays live and carries the device
    /// operation state
    ///
    /// # Errors
    /// `UnknownHandle` for a foreign handle.
    pub fn set_operation_state_feature(&mut self, feature: FeatureId) -> PipelineResult<()> {
        if self.feature(feature).is_none() {
            return Err(PipelineError::UnknownHandle);
        }
        self.operation_state_feature = Some(feature);
        Ok(())
    }

    /// The designated operation state feature
    #[must_use]
    pub const fn operation_state_feature(&self) -> Option<FeatureId> {
        self.operation_state_feature
    }

    /// Latest device operation state (`Idle` until first computed)
    #[must_use]
    pub fn device_operation_state(&self) -> OperationState {
        self.operation_state_feature
            .and_then(|id| self.feature(id))
            .and_then(Feature::latest_value)
            .map_or(OperationState::Idle, OperationState::from_value)
    }

    // ========================================================================
    // Computation
    // ========================================================================

    /// Run one computer if it can
    ///
    /// Returns `false` without side effects unless the computer is active,
    /// every source has its window ready and every destination can record.
    /// Otherwise runs the kernel, writes the destinations, acknowledges
    /// each source window exactly once and returns `true`.
    pub fn compute(&mut self, id: ComputerId) -> bool {
        let Some(computer) = self.computers.get(id.index()) else {
            return false;
        };
        if !computer.is_active() || computer.sources().is_empty() {
            return false;
        }
        for link in computer.sources() {
            if !self.features[link.feature.index()].is_ready_to_compute(link.receiver, link.window) {
                return false;
            }
        }
        for dest in computer.destinations() {
            let feature = &self.features[dest.index()];
            if !feature.is_ready_to_record(1) {
                pipeline_debug!("{}: {} not ready to record", computer.kind().label(), feature.name());
                return false;
            }
        }

        let reduced_len = computer
            .destinations()
            .first()
            .map_or(0, |d| self.features[d.index()].section_size() / 3);
        self.staging.clear();
        {
            // Views borrow the features until the kernel has run
            let mut views: Vec<SourceView<'_>, MAX_SOURCES> = Vec::new();
            for link in computer.sources() {
                let feature = &self.features[link.feature.index()];
                let Some(samples) = feature.next_samples(link.receiver) else {
                    return false;
                };
                // sources() holds at most MAX_SOURCES links
                let _ = views.push(SourceView {
                    samples,
                    sampling_rate: feature.sampling_rate(),
                    resolution: feature.resolution(),
                    operation_state: feature.operation_state(),
                });
            }
            kernels::run(computer.kind(), &views, reduced_len, &mut self.staging, &mut self.fft);
        }

        let destinations = computer.destinations();
        for (rank, dest) in destinations.iter().enumerate() {
            if let Some(meta) = self.staging.meta(rank) {
                let feature = &mut self.features[dest.index()];
                feature.set_sampling_rate(meta.sampling_rate);
                feature.set_resolution(meta.resolution);
            }
        }
        for &(rank, sample) in self.staging.outputs() {
            if let Some(dest) = destinations.get(usize::from(rank)) {
                self.features[dest.index()].add_sample(sample);
            }
        }
        for link in computer.sources() {
            self.features[link.feature.index()].acknowledge(link.receiver);
        }
        true
    }

    /// Run every computer once, in registration order
    ///
    /// Returns how many actually computed.
    pub fn compute_all(&mut self) -> usize {
        let mut computed = 0;
        for idx in 0..self.computers.len() {
            // idx < MAX_COMPUTERS, fits in u8
            if self.compute(ComputerId(idx as u8)) {
                computed += 1;
            }
        }
        computed
    }
}

impl Default for Pipeline<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_feature_name_rejected() {
        let mut a = [0.0f32; 2];
        let mut b = [0.0f32; 2];
        let mut pipeline = Pipeline::new();
        let first = Feature::new("A1X", 2, 1, FeatureValues::Float(&mut a)).unwrap();
        let second = Feature::new("A1X", 2, 1, FeatureValues::Float(&mut b)).unwrap();
        assert!(pipeline.add_feature(first).is_ok());
        assert_eq!(pipeline.add_feature(second), Err(PipelineError::DuplicateName));
    }

    #[test]
    fn test_destination_cannot_have_two_computers() {
        let mut storage = [0.0f32; 2];
        let mut pipeline = Pipeline::new();
        let dest = pipeline
            .add_feature(Feature::new("R", 2, 1, FeatureValues::Float(&mut storage)).unwrap())
            .unwrap();
        let kind = ComputerKind::SignalRms(RmsSettings::default());
        assert!(pipeline.add_computer(kind, &[dest]).is_ok());
        assert_eq!(pipeline.add_computer(kind, &[dest]), Err(PipelineError::AlreadyComputed));
    }

    #[test]
    fn test_fft_window_must_be_power_of_two() {
        let mut raw = [fixed::types::I1F15::ZERO; 8 * 96];
        let mut reduced = [fixed::types::I1F15::ZERO; 12];
        let mut scalars = [[0.0f32; 2]; 3];
        let mut pipeline = Pipeline::new();
        let source = pipeline
            .add_feature(Feature::new("A0X", 8, 96, FeatureValues::Q15(&mut raw)).unwrap())
            .unwrap();
        let fft = pipeline
            .add_feature(Feature::new("FAX", 2, 6, FeatureValues::Q15(&mut reduced)).unwrap())
            .unwrap();
        let [f, v, d] = &mut scalars;
        let freq = pipeline
            .add_feature(Feature::new("FFX", 2, 1, FeatureValues::Float(f)).unwrap())
            .unwrap();
        let vel = pipeline
            .add_feature(Feature::new("VAX", 2, 1, FeatureValues::Float(v)).unwrap())
            .unwrap();
        let disp = pipeline
            .add_feature(Feature::new("DAX", 2, 1, FeatureValues::Float(d)).unwrap())
            .unwrap();
        let computer = pipeline
            .add_computer(ComputerKind::Q15Fft(FftSettings::default()), &[fft, freq, vel, disp])
            .unwrap();
        assert_eq!(
            pipeline.add_source(computer, source, 2),
            Err(PipelineError::InvalidFftLength)
        );
        assert_eq!(pipeline.feature(source).map(Feature::receiver_count), Some(0));
    }

    #[test]
    fn test_inactive_computer_never_computes() {
        let mut raw = [0.0f32; 4];
        let mut out = [0.0f32; 2];
        let mut pipeline = Pipeline::new();
        let source = pipeline
            .add_feature(Feature::new("SRC", 2, 2, FeatureValues::Float(&mut raw)).unwrap())
            .unwrap();
        let dest = pipeline
            .add_feature(Feature::new("DST", 2, 1, FeatureValues::Float(&mut out)).unwrap())
            .unwrap();
        let computer = pipeline
            .add_computer(ComputerKind::SignalRms(RmsSettings::default()), &[dest])
            .unwrap();
        let receiver = pipeline.add_source(computer, source, 1).unwrap();
        for v in [1.0f32, 2.0] {
            pipeline.feature_mut(source).unwrap().add_value(v);
        }
        assert!(!pipeline.compute(computer));
        // Nothing consumed while inactive, and nothing held back either
        assert!(pipeline.feature(source).unwrap().is_ready_to_compute(receiver, 1));
        assert!(pipeline.feature(source).unwrap().is_ready_to_record(2));

        // Activation skips what was published before it
        pipeline.activate_feature(dest);
        assert!(!pipeline.compute(computer));
        for v in [3.0f32, 4.0] {
            pipeline.feature_mut(source).unwrap().add_value(v);
        }
        assert!(pipeline.compute(computer));
        assert!(!pipeline.feature(source).unwrap().is_ready_to_compute(receiver, 1));
    }
}
