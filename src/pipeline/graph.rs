//! Activation Graph
//!
//! Features and computers are only processed while active. Activating a
//! feature activates the computer producing it and, depth first, every
//! feature that computer reads. Deactivation walks the same edges
//! backwards but stops at any feature something else still needs: a
//! feature streamed by a group, or read by an active computer. "Still
//! needed" is recomputed from the receivers each time, there are no
//! reference counts.
//!
//! The graph is a DAG by construction contract; a cycle would recurse
//! without bound.

use heapless::Vec;

use crate::config::{MAX_GROUP_FEATURES, MAX_SOURCES};
use crate::types::{ComputerId, FeatureId, GroupId};

use super::Pipeline;

impl Pipeline<'_> {
    fn source_features(&self, computer: ComputerId) -> Vec<FeatureId, MAX_SOURCES> {
        self.computers
            .get(computer.index())
            .map(|c| c.sources().iter().map(|link| link.feature).collect())
            .unwrap_or_default()
    }

    /// Switch a computer on or off, pausing or resuming its source receivers
    ///
    /// A paused receiver no longer holds back its source; a resumed one
    /// only reads what is published from then on.
    fn set_computer_active(&mut self, id: ComputerId, active: bool) {
        let Some(computer) = self.computers.get_mut(id.index()) else {
            return;
        };
        if computer.is_active() == active {
            return;
        }
        if active {
            computer.activate();
        } else {
            computer.deactivate();
        }
        for link in computer.sources() {
            let feature = &mut self.features[link.feature.index()];
            if active {
                feature.resume_receiver(link.receiver);
            } else {
                feature.pause_receiver(link.receiver);
            }
        }
    }

    /// Mark `id` required, with its computer and all its inputs
    pub fn activate_feature(&mut self, id: FeatureId) {
        let Some(feature) = self.features.get_mut(id.index()) else {
            return;
        };
        feature.activate();
        let Some(computer) = feature.computer() else {
            return;
        };
        self.set_computer_active(computer, true);
        for source in self.source_features(computer) {
            self.activate_feature(source);
        }
    }

    /// Whether nothing needs `id` any more
    ///
    /// True iff the feature is not streamed by a group and every computer
    /// reading it is inactive.
    #[must_use]
    pub fn is_feature_deactivatable(&self, id: FeatureId) -> bool {
        let Some(feature) = self.features.get(id.index()) else {
            return false;
        };
        !feature.is_streaming()
            && feature
                .receiver_computers()
                .all(|c| !self.computers[c.index()].is_active())
    }

    /// Release `id`, tearing down what only it needed
    ///
    /// The producing computer is deactivated once none of its destinations
    /// is active, then each of its sources that became unneeded is
    /// released in turn.
    pub fn deactivate_feature(&mut self, id: FeatureId) {
        let Some(feature) = self.features.get_mut(id.index()) else {
            return;
        };
        feature.deactivate();
        let Some(computer) = feature.computer() else {
            return;
        };
        let node = &self.computers[computer.index()];
        if node
            .destinations()
            .iter()
            .any(|dest| self.features[dest.index()].is_active())
        {
            return;
        }
        self.set_computer_active(computer, false);
        for source in self.source_features(computer) {
            if self.is_feature_deactivatable(source) {
                self.deactivate_feature(source);
            }
        }
    }

    /// Activate group `id` and stream its members
    ///
    /// The operation state feature is always activated and streamed as
    /// well, even when the group is empty.
    pub fn activate_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get_mut(id.index()) else {
            return;
        };
        group.activate();
        let members: Vec<FeatureId, MAX_GROUP_FEATURES> = group.features().iter().copied().collect();
        for feature in members.into_iter().chain(self.operation_state_feature) {
            if let Some(f) = self.features.get_mut(feature.index()) {
                f.enable_streaming();
            }
            self.activate_feature(feature);
        }
    }

    /// Deactivate group `id` and release members nothing else needs
    ///
    /// Members streamed by another active group, and the operation state
    /// feature, stay live.
    pub fn deactivate_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get_mut(id.index()) else {
            return;
        };
        group.deactivate();
        let members: Vec<FeatureId, MAX_GROUP_FEATURES> = group.features().iter().copied().collect();
        for feature in members {
            if Some(feature) == self.operation_state_feature
                || self.groups.iter().any(|g| g.is_active() && g.contains(feature))
            {
                continue;
            }
            if let Some(f) = self.features.get_mut(feature.index()) {
                f.disable_streaming();
            }
            if self.is_feature_deactivatable(feature) {
                self.deactivate_feature(feature);
            }
        }
    }

    /// Deactivate every feature and computer
    pub fn deactivate_all_features(&mut self) {
        for feature in &mut self.features {
            feature.deactivate();
        }
        for idx in 0..self.computers.len() {
            // idx < MAX_COMPUTERS, fits in u8
            self.set_computer_active(ComputerId(idx as u8), false);
        }
    }

    /// Deactivate every group
    ///
    /// Features are left as they are, see
    /// [`Pipeline::deactivate_all_features`].
    pub fn deactivate_all_groups(&mut self) {
        for group in &mut self.groups {
            group.deactivate();
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::pipeline::{ComputerKind, Feature, FeatureGroup, FeatureValues, RmsSettings};

    #[test]
    fn test_activation_is_transitive() {
        let mut raw = [0.0f32; 4];
        let mut rms = [0.0f32; 2];
        let mut pipeline = Pipeline::new();
        let a = pipeline
            .add_feature(Feature::new("A0X", 2, 2, FeatureValues::Float(&mut raw)).unwrap())
            .unwrap();
        let b = pipeline
            .add_feature(Feature::new("A1X", 2, 1, FeatureValues::Float(&mut rms)).unwrap())
            .unwrap();
        let c = pipeline
            .add_computer(ComputerKind::SignalRms(RmsSettings::default()), &[b])
            .unwrap();
        pipeline.add_source(c, a, 1).unwrap();

        pipeline.activate_feature(b);
        assert!(pipeline.feature(a).unwrap().is_active());
        assert!(pipeline.computer(c).unwrap().is_active());
        assert!(!pipeline.is_feature_deactivatable(a));

        pipeline.deactivate_feature(b);
        assert!(!pipeline.feature(a).unwrap().is_active());
        assert!(!pipeline.computer(c).unwrap().is_active());
    }

    #[test]
    fn test_streamed_source_survives_teardown() {
        let mut raw = [0.0f32; 4];
        let mut rms = [0.0f32; 2];
        let mut pipeline = Pipeline::new();
        let a = pipeline
            .add_feature(Feature::new("A0X", 2, 2, FeatureValues::Float(&mut raw)).unwrap())
            .unwrap();
        let b = pipeline
            .add_feature(Feature::new("A1X", 2, 1, FeatureValues::Float(&mut rms)).unwrap())
            .unwrap();
        let c = pipeline
            .add_computer(ComputerKind::SignalRms(RmsSettings::default()), &[b])
            .unwrap();
        pipeline.add_source(c, a, 1).unwrap();
        let raw_group = pipeline.add_group(FeatureGroup::new("RAW", 512).unwrap()).unwrap();
        pipeline.add_feature_to_group(raw_group, a).unwrap();

        pipeline.activate_group(raw_group);
        pipeline.activate_feature(b);
        pipeline.deactivate_feature(b);
        assert!(pipeline.feature(a).unwrap().is_active());
        assert!(pipeline.feature(a).unwrap().is_streaming());
    }

    #[test]
    fn test_deactivate_all() {
        let mut raw = [0.0f32; 4];
        let mut pipeline = Pipeline::new();
        let a = pipeline
            .add_feature(Feature::new("A0X", 2, 2, FeatureValues::Float(&mut raw)).unwrap())
            .unwrap();
        let g = pipeline.add_group(FeatureGroup::new("RAW", 512).unwrap()).unwrap();
        pipeline.add_feature_to_group(g, a).unwrap();
        pipeline.activate_group(g);
        pipeline.deactivate_all_groups();
        pipeline.deactivate_all_features();
        assert!(!pipeline.group(g).unwrap().is_active());
        assert!(!pipeline.feature(a).unwrap().is_active());
        assert!(!pipeline.feature(a).unwrap().is_streaming());
    }
}
