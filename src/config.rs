//! System configuration and pipeline constants
//!
//! This module defines compile-time capacities, timeouts and DSP defaults
//! for the sensor node. Every fixed-size structure in the crate is sized
//! from here.

/// Maximum number of features a pipeline can hold
pub const MAX_FEATURES: usize = 60;

/// Maximum number of feature computers a pipeline can hold
pub const MAX_COMPUTERS: usize = 20;

/// Maximum number of feature groups a pipeline can hold
pub const MAX_GROUPS: usize = 10;

/// Maximum number of sections in a feature ring buffer
pub const MAX_SECTION_COUNT: usize = 8;

/// Maximum number of receivers registered on one feature
pub const MAX_RECEIVERS: usize = 5;

/// Maximum number of sources of one computer
pub const MAX_SOURCES: usize = 5;

/// Maximum number of destinations of one computer
pub const MAX_DESTINATIONS: usize = 5;

/// Maximum number of features in one group
pub const MAX_GROUP_FEATURES: usize = 10;

/// Capacity of feature and group names
///
/// Feature names are 3 characters on the wire, group names up to 6.
pub const NAME_CAPACITY: usize = 8;

/// Number of ordered operation state thresholds (IDLE/NORMAL/WARNING/DANGER)
pub const OPERATION_STATE_THRESHOLD_COUNT: usize = 3;

/// Maximum number of values a single compute pass may emit
pub const MAX_STAGED_OUTPUTS: usize = 512;

/// Number of nodes in the outbound sending queue
pub const QUEUE_NODE_COUNT: usize = 20;

/// Size of one sending queue node in bytes
pub const QUEUE_NODE_SIZE: usize = 700;

/// Age after which an unsent node is dropped, or an unconfirmed node is retried
pub const MAX_RETRY_DURATION_MS: u32 = 30_000;

/// Default feature group send period in milliseconds
pub const DEFAULT_DATA_SEND_PERIOD_MS: u32 = 512;

/// Maximum age of a batching node before it is handed to the transport
pub const MAX_BUFFER_DELAY_MS: u32 = 3_000;

/// Free bytes required in a batching node to append another message
pub const MAX_BUFFER_MARGIN: usize = 200;

/// Largest supported FFT length in samples (power of two)
pub const MAX_FFT_SIZE: usize = 512;

/// Default lower band-pass cutoff for FFT integration (Hz)
pub const DEFAULT_LOW_CUT_HZ: u16 = 5;

/// Default upper band-pass cutoff for FFT integration (Hz)
pub const DEFAULT_HIGH_CUT_HZ: u16 = 500;

/// Default minimum acceleration RMS for the node to be considered in motion
pub const DEFAULT_MIN_AGITATION: f32 = 0.03;

/// Target magnitude bit for integrated Q15 spectra
///
/// Integrated bins are rescaled by a power of two so that the largest one
/// lands just under `2^RESCALE_TARGET_BIT`, leaving headroom in `i16`.
pub const RESCALE_TARGET_BIT: i32 = 13;

/// Default acceleration RMS calibration scaling
pub const ACCEL_RMS_SCALING: f32 = 1.0;

/// Default velocity RMS calibration scaling
pub const VELOCITY_RMS_SCALING: f32 = 1.0;

/// Default displacement RMS calibration scaling
pub const DISPLACEMENT_RMS_SCALING: f32 = 1.0;

/// Default audio dB calibration scaling
pub const AUDIO_DB_SCALING: f32 = 1.0;

/// Default audio dB calibration offset
pub const AUDIO_DB_OFFSET: f32 = 0.0;

/// Default accelerometer sampling rate (Hz)
pub const ACCEL_SAMPLING_RATE: u16 = 1_000;

/// Default accelerometer resolution (g per LSB at +/-4g, 16 bit)
pub const ACCEL_RESOLUTION: f32 = 4.0 / 32_768.0;
