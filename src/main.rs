//! Vibration Node Main Application
//!
//! Entry point for the STM32L433-based vibration sensor firmware.
//! Wires the feature pipeline, then spawns the sampling task and runs the
//! compute / stream / send loop.

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::peripherals::PA0;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use vibration_node::hal::adc::AccelAdc;
use vibration_node::pipeline::{FftSettings, RmsSettings, SumSettings};
use vibration_node::prelude::*;

/// Raw acceleration: 8 sections of 128 samples
const ACCEL_SECTIONS: usize = 8;
const ACCEL_SECTION_SIZE: usize = 128;

/// Sections of raw acceleration per FFT (4 x 128 = 512 samples)
const FFT_WINDOW: usize = 4;

/// Peaks kept in the reduced FFT
const REDUCED_FFT_PEAKS: usize = 5;

/// Main loop period
const LOOP_PERIOD_MS: u64 = 10;

/// Velocity RMS thresholds (mm/s) for NORMAL / WARNING / DANGER
const VELOCITY_THRESHOLDS: [f32; 3] = [0.5, 4.5, 11.2];

/// Acceleration RMS thresholds (g) for NORMAL / WARNING / DANGER
const ACCEL_THRESHOLDS: [f32; 3] = [0.03, 0.5, 1.0];

/// State shared by tasks of the thread-mode executor
///
/// Interrupts stay enabled while a lock is held, so a long FFT pass does
/// not delay ADC or timer interrupts.
type Shared<T> = Mutex<ThreadModeRawMutex, RefCell<T>>;

static PIPELINE: Shared<Pipeline<'static>> = Mutex::new(RefCell::new(Pipeline::new()));
static QUEUE: Shared<SendingQueue> = Mutex::new(RefCell::new(SendingQueue::new()));

static RAW_ACCEL: StaticCell<[I1F15; ACCEL_SECTIONS * ACCEL_SECTION_SIZE]> = StaticCell::new();
static REDUCED_FFT: StaticCell<[I1F15; 2 * 3 * REDUCED_FFT_PEAKS]> = StaticCell::new();
static SCALARS: StaticCell<[[f32; 4]; 6]> = StaticCell::new();

/// Handles the tasks need after wiring
#[derive(Clone, Copy)]
struct Wiring {
    accel: FeatureId,
    group: GroupId,
}

/// Build the standard motion pipeline
///
/// ```text
/// A0X ─SignalRms─> A1X ─SectionSum(rms)─> A3X ─┐
///  └──Q15Fft──> FAX, FFX, VAX, DAX            ├─OperationState─> OPS
///                          └───────────────────┘
/// ```
fn wire(pipeline: &mut Pipeline<'static>) -> PipelineResult<Wiring> {
    let raw = RAW_ACCEL.init([I1F15::ZERO; ACCEL_SECTIONS * ACCEL_SECTION_SIZE]);
    let reduced = REDUCED_FFT.init([I1F15::ZERO; 2 * 3 * REDUCED_FFT_PEAKS]);
    let [rms, energy, freq, vel, disp, ops] = SCALARS.init([[0.0; 4]; 6]);

    let accel = pipeline.add_feature(Feature::new(
        "A0X",
        ACCEL_SECTIONS,
        ACCEL_SECTION_SIZE,
        FeatureValues::Q15(raw),
    )?)?;
    if let Some(feature) = pipeline.feature_mut(accel) {
        feature.set_sampling_rate(ACCEL_SAMPLING_RATE);
        feature.set_resolution(ACCEL_RESOLUTION);
    }

    let accel_rms = pipeline.add_feature(Feature::new("A1X", 4, 1, FeatureValues::Float(rms))?)?;
    let accel_energy = pipeline.add_feature(Feature::new("A3X", 2, 1, FeatureValues::Float(energy))?)?;
    let fft = pipeline.add_feature(Feature::new(
        "FAX",
        2,
        3 * REDUCED_FFT_PEAKS,
        FeatureValues::Q15(reduced),
    )?)?;
    let main_freq = pipeline.add_feature(Feature::new("FFX", 2, 1, FeatureValues::Float(freq))?)?;
    let velocity = pipeline.add_feature(Feature::new("VAX", 2, 1, FeatureValues::Float(vel))?)?;
    let displacement = pipeline.add_feature(Feature::new("DAX", 2, 1, FeatureValues::Float(disp))?)?;
    let op_state = pipeline.add_feature(Feature::new("OPS", 2, 1, FeatureValues::Float(ops))?)?;

    let rms_computer = pipeline.add_computer(
        ComputerKind::SignalRms(RmsSettings {
            calibration_scaling: ACCEL_RMS_SCALING,
            ..RmsSettings::default()
        }),
        &[accel_rms],
    )?;
    pipeline.add_source(rms_computer, accel, 1)?;

    let energy_computer = pipeline.add_computer(
        ComputerKind::SectionSum(SumSettings {
            normalize: true,
            rms_like: true,
        }),
        &[accel_energy],
    )?;
    pipeline.add_source(energy_computer, accel_rms, 4)?;

    let fft_computer = pipeline.add_computer(
        ComputerKind::Q15Fft(FftSettings::default()),
        &[fft, main_freq, velocity, displacement],
    )?;
    pipeline.add_source(fft_computer, accel, FFT_WINDOW)?;

    let state_computer = pipeline.add_computer(ComputerKind::OperationState, &[op_state])?;
    pipeline.add_source(state_computer, accel_energy, 1)?;
    pipeline.add_source(state_computer, velocity, 1)?;
    pipeline.set_operation_state_feature(op_state)?;

    if let Some(feature) = pipeline.feature_mut(accel_energy) {
        feature.set_thresholds(ACCEL_THRESHOLDS);
    }
    if let Some(feature) = pipeline.feature_mut(velocity) {
        feature.set_thresholds(VELOCITY_THRESHOLDS);
    }

    let group = pipeline.add_group(FeatureGroup::new("MOTSTD", DEFAULT_DATA_SEND_PERIOD_MS)?)?;
    for feature in [accel_energy, main_freq, velocity, displacement] {
        pipeline.add_feature_to_group(group, feature)?;
    }

    Ok(Wiring { accel, group })
}

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Vibration node firmware v{}", env!("CARGO_PKG_VERSION"));

    let config = embassy_stm32::Config::default();
    let p = embassy_stm32::init(config);

    info!("Peripherals initialized");

    let wiring = match PIPELINE.lock(|cell| wire(&mut cell.borrow_mut())) {
        Ok(wiring) => wiring,
        Err(e) => {
            warn!("Pipeline wiring failed: {}", e);
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };
    PIPELINE.lock(|cell| cell.borrow_mut().activate_group(wiring.group));
    info!("Pipeline wired, group MOTSTD active");

    let led = Output::new(p.PA5, Level::Low, Speed::Low);
    let adc = AccelAdc::new(p.ADC1);

    spawner.must_spawn(heartbeat_task(led));
    spawner.must_spawn(sampling_task(adc, p.PA0, wiring.accel));

    info!("Tasks spawned, entering main loop");

    let mut ticker = Ticker::every(Duration::from_millis(LOOP_PERIOD_MS));
    loop {
        let now = Instant::now();
        // Millisecond clock wraps after ~49 days, consumers use wrapping_sub
        let now_ms = now.as_millis() as u32;
        let timestamp = now.as_millis() as f64 / 1000.0;

        PIPELINE.lock(|pipeline| {
            QUEUE.lock(|queue| {
                let mut pipeline = pipeline.borrow_mut();
                let mut queue = queue.borrow_mut();
                pipeline.compute_all();
                pipeline.stream_all_groups(timestamp, now_ms, &mut queue);
                queue.maintain(now_ms);
            });
        });

        send_ready_nodes(now_ms);
        ticker.next().await;
    }
}

/// Hand ready nodes to the link
///
/// The RTT link has no acknowledgement channel: delivery is confirmed as
/// soon as the bytes are logged.
fn send_ready_nodes(now_ms: u32) {
    QUEUE.lock(|queue| {
        let mut queue = queue.borrow_mut();
        while let Some(idx) = queue.next_buffer_to_send() {
            queue.attempting_to_send(idx, now_ms);
            if let Some(node) = queue.node(idx) {
                info!("node {}: {=[u8]:a}", idx, node.as_bytes());
            }
            queue.confirm_successful_send(idx);
        }
    });
}

/// Samples the accelerometer axis at the feature's sampling rate
#[embassy_executor::task]
async fn sampling_task(mut adc: AccelAdc<'static>, mut pin: PA0, accel: FeatureId) {
    let period_us = 1_000_000 / u64::from(ACCEL_SAMPLING_RATE);
    let mut ticker = Ticker::every(Duration::from_micros(period_us));
    loop {
        let sample = adc.read(&mut pin).to_q15();
        PIPELINE.lock(|cell| {
            if let Some(feature) = cell.borrow_mut().feature_mut(accel) {
                feature.add_value(sample);
            }
        });
        ticker.next().await;
    }
}

/// Heartbeat task - blinks LED to show system is running
#[embassy_executor::task]
async fn heartbeat_task(mut led: Output<'static>) {
    loop {
        led.set_high();
        Timer::after(Duration::from_millis(100)).await;
        led.set_low();
        Timer::after(Duration::from_millis(900)).await;
    }
}
