//! Activation Graph Tests
//!
//! Transitive activation and conservative teardown across computers and
//! groups.
//! Run with: cargo test --features std --test activation_tests

use fixed::types::I1F15;
use vibration_node::pipeline::{
    ComputerKind, Feature, FeatureGroup, FeatureValues, FftSettings, Pipeline, RmsSettings,
    SumSettings,
};
use vibration_node::types::{ComputerId, FeatureId, GroupId};

/// Handles of the motion graph built by [`motion_graph`]
struct Motion {
    accel: FeatureId,
    rms: FeatureId,
    energy: FeatureId,
    freq: FeatureId,
    vel: FeatureId,
    disp: FeatureId,
    ops: FeatureId,
    rms_computer: ComputerId,
    energy_computer: ComputerId,
    fft_computer: ComputerId,
}

struct Storage {
    raw: [I1F15; 256],
    reduced: [I1F15; 6],
    scalars: [[f32; 2]; 7],
}

impl Storage {
    fn new() -> Self {
        Self {
            raw: [I1F15::ZERO; 256],
            reduced: [I1F15::ZERO; 6],
            scalars: [[0.0; 2]; 7],
        }
    }
}

/// A0X -> A1X -> A3X, A0X -> FAX/FFX/VAX/DAX, (A3X, VAX) -> OPS
fn motion_graph<'a>(storage: &'a mut Storage, pipeline: &mut Pipeline<'a>) -> Motion {
    let [rms, energy, freq, vel, disp, ops, _] = &mut storage.scalars;
    let accel = pipeline
        .add_feature(Feature::new("A0X", 2, 128, FeatureValues::Q15(&mut storage.raw)).unwrap())
        .unwrap();
    let rms = pipeline
        .add_feature(Feature::new("A1X", 2, 1, FeatureValues::Float(rms)).unwrap())
        .unwrap();
    let energy = pipeline
        .add_feature(Feature::new("A3X", 2, 1, FeatureValues::Float(energy)).unwrap())
        .unwrap();
    let fax = pipeline
        .add_feature(Feature::new("FAX", 2, 3, FeatureValues::Q15(&mut storage.reduced)).unwrap())
        .unwrap();
    let freq = pipeline
        .add_feature(Feature::new("FFX", 2, 1, FeatureValues::Float(freq)).unwrap())
        .unwrap();
    let vel = pipeline
        .add_feature(Feature::new("VAX", 2, 1, FeatureValues::Float(vel)).unwrap())
        .unwrap();
    let disp = pipeline
        .add_feature(Feature::new("DAX", 2, 1, FeatureValues::Float(disp)).unwrap())
        .unwrap();
    let ops = pipeline
        .add_feature(Feature::new("OPS", 2, 1, FeatureValues::Float(ops)).unwrap())
        .unwrap();

    let rms_computer = pipeline
        .add_computer(ComputerKind::SignalRms(RmsSettings::default()), &[rms])
        .unwrap();
    pipeline.add_source(rms_computer, accel, 1).unwrap();
    let energy_computer = pipeline
        .add_computer(ComputerKind::SectionSum(SumSettings::default()), &[energy])
        .unwrap();
    pipeline.add_source(energy_computer, rms, 1).unwrap();
    let fft_computer = pipeline
        .add_computer(ComputerKind::Q15Fft(FftSettings::default()), &[fax, freq, vel, disp])
        .unwrap();
    pipeline.add_source(fft_computer, accel, 2).unwrap();
    let state_computer = pipeline
        .add_computer(ComputerKind::OperationState, &[ops])
        .unwrap();
    pipeline.add_source(state_computer, energy, 1).unwrap();
    pipeline.add_source(state_computer, vel, 1).unwrap();
    pipeline.set_operation_state_feature(ops).unwrap();

    Motion {
        accel,
        rms,
        energy,
        freq,
        vel,
        disp,
        ops,
        rms_computer,
        energy_computer,
        fft_computer,
    }
}

fn group_of(pipeline: &mut Pipeline<'_>, name: &str, members: &[FeatureId]) -> GroupId {
    let group = pipeline.add_group(FeatureGroup::new(name, 512).unwrap()).unwrap();
    for &feature in members {
        pipeline.add_feature_to_group(group, feature).unwrap();
    }
    group
}

fn active(pipeline: &Pipeline<'_>, id: FeatureId) -> bool {
    pipeline.feature(id).unwrap().is_active()
}

// =============================================================================
// Activation
// =============================================================================

#[test]
fn test_group_activation_reaches_raw_input() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);
    let group = group_of(&mut pipeline, "MOTSTD", &[m.energy]);

    pipeline.activate_group(group);
    assert!(pipeline.group(group).unwrap().is_active());
    for id in [m.energy, m.rms, m.accel, m.ops, m.vel] {
        assert!(active(&pipeline, id));
    }
    assert!(pipeline.computer(m.rms_computer).unwrap().is_active());
    assert!(pipeline.computer(m.energy_computer).unwrap().is_active());
    // Pulled in through the operation state computer
    assert!(pipeline.computer(m.fft_computer).unwrap().is_active());
    assert!(pipeline.feature(m.energy).unwrap().is_streaming());
    assert!(pipeline.feature(m.ops).unwrap().is_streaming());
    assert!(!pipeline.feature(m.rms).unwrap().is_streaming());
}

#[test]
fn test_empty_group_still_activates_operation_state() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);
    let group = group_of(&mut pipeline, "EMPTY", &[]);

    pipeline.activate_group(group);
    assert!(active(&pipeline, m.ops));
    assert!(pipeline.feature(m.ops).unwrap().is_streaming());
    assert!(active(&pipeline, m.accel));
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_sibling_destination_keeps_computer_alive() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);

    pipeline.activate_feature(m.freq);
    pipeline.activate_feature(m.disp);
    pipeline.deactivate_feature(m.freq);
    assert!(!active(&pipeline, m.freq));
    assert!(pipeline.computer(m.fft_computer).unwrap().is_active());
    assert!(active(&pipeline, m.accel));

    pipeline.deactivate_feature(m.disp);
    assert!(!pipeline.computer(m.fft_computer).unwrap().is_active());
    assert!(!active(&pipeline, m.accel));
}

#[test]
fn test_shared_source_survives_one_reader_leaving() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);

    pipeline.activate_feature(m.energy);
    pipeline.activate_feature(m.vel);
    assert!(!pipeline.is_feature_deactivatable(m.accel));

    pipeline.deactivate_feature(m.energy);
    assert!(!active(&pipeline, m.energy));
    assert!(!active(&pipeline, m.rms));
    assert!(!pipeline.computer(m.rms_computer).unwrap().is_active());
    // Still read by the active FFT computer
    assert!(active(&pipeline, m.accel));
    assert!(!pipeline.is_feature_deactivatable(m.accel));

    pipeline.deactivate_feature(m.vel);
    assert!(!active(&pipeline, m.accel));
    assert!(pipeline.is_feature_deactivatable(m.accel));
}

#[test]
fn test_deactivate_group_keeps_features_of_other_groups() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);
    let first = group_of(&mut pipeline, "MOTSTD", &[m.energy, m.vel]);
    let second = group_of(&mut pipeline, "VELOC", &[m.vel]);

    pipeline.activate_group(first);
    pipeline.activate_group(second);
    pipeline.deactivate_group(first);

    assert!(!pipeline.group(first).unwrap().is_active());
    assert!(!pipeline.feature(m.energy).unwrap().is_streaming());
    assert!(pipeline.feature(m.vel).unwrap().is_streaming());
    assert!(active(&pipeline, m.vel));
    // OPS reads A3X and stays live, so A3X does too
    assert!(active(&pipeline, m.ops));
    assert!(active(&pipeline, m.energy));
}

#[test]
fn test_deactivate_all_features_resets_graph() {
    let mut storage = Storage::new();
    let mut pipeline = Pipeline::new();
    let m = motion_graph(&mut storage, &mut pipeline);
    let group = group_of(&mut pipeline, "MOTSTD", &[m.energy]);

    pipeline.activate_group(group);
    pipeline.deactivate_all_features();
    assert!(pipeline.features().iter().all(|f| !f.is_active()));
    assert!(pipeline.computers().iter().all(|c| !c.is_active()));
    // Group flags are separate
    assert!(pipeline.group(group).unwrap().is_active());
    pipeline.deactivate_all_groups();
    assert!(!pipeline.group(group).unwrap().is_active());
}
