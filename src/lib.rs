//! Vibration Node Firmware Library
//!
//! This library provides the real-time data pipeline of an STM32L433-based
//! vibration and condition monitoring sensor node. Sensors push raw samples
//! into section ring buffers, a graph of feature computers derives
//! engineering features (RMS, FFT velocity/displacement, audio dB) and
//! feature groups serialize them into a bounded outbound sending queue.
//!
//! # Architecture
//!
//! The firmware is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TRANSPORT LAYER                           │
//! │  SendingQueue (20 x 700 B)  │  retry / expiry  │  confirm    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    PIPELINE LAYER                            │
//! │  FeatureGroup  │  ActivationGraph  │  FeatureComputer        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  BUFFER / DSP LAYER                          │
//! │  Feature (section ring buffer)  │  FFT  │  statistics        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    RTOS / SCHEDULER                          │
//! │           embassy-rs (async/await executor)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - **No heap**: every buffer is fixed-size (`heapless`, const arrays)
//!   and sample storage is borrowed from statics allocated at startup
//! - **Arena and handles**: features, computers and groups live in one
//!   owned [`pipeline::Pipeline`] and refer to each other by index
//! - **Never block the producer**: runtime operations return `bool` or
//!   apply a corrective transition, only construction returns `Result`
//! - **Functional core, imperative shell**: kernels are pure functions,
//!   the embassy binary owns scheduling and I/O

#![cfg_attr(feature = "embedded", no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export dependencies needed by applications (only in embedded mode)
#[cfg(feature = "embedded")]
pub use embassy_executor;
#[cfg(feature = "embedded")]
pub use embassy_stm32;
#[cfg(feature = "embedded")]
pub use embassy_time;

#[macro_use]
mod macros;

/// Digital Signal Processing
///
/// FFT, spectrum integration and statistics used by the feature computers.
pub mod dsp;

/// Feature Pipeline
///
/// Section ring buffers, feature computers, activation graph and groups.
pub mod pipeline;

/// Outbound Transport
///
/// Fixed-size sending queue with retry and expiry.
pub mod transport;

/// Hardware Abstraction Layer
///
/// Peripheral wrappers feeding sensor samples into the pipeline.
#[cfg(feature = "embedded")]
pub mod hal;

/// Error types for pipeline construction
pub mod error;

/// Shared types used across modules
pub mod types;

/// System configuration and constants
pub mod config;

/// Prelude module for common imports
pub mod prelude {
    //! Convenient re-exports for common types and traits.

    pub use crate::config::*;
    pub use crate::error::{PipelineError, PipelineResult};
    pub use crate::pipeline::{
        ComputerKind, Feature, FeatureGroup, FeatureValues, Pipeline, SampleSlice, SampleValue,
    };
    pub use crate::transport::{NodeState, SendingQueue};
    pub use crate::types::*;

    pub use fixed::types::{I1F15, I1F31};

    // Embassy
    #[cfg(feature = "embedded")]
    pub use embassy_time::{Duration, Instant, Timer};

    // Logging
    #[cfg(feature = "embedded")]
    pub use defmt::{debug, error, info, trace, warn};
}
