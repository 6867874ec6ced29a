//! Hardware Abstraction Layer
//!
//! Thin wrappers over the STM32L433 peripherals the firmware binary feeds
//! into the pipeline. Sensor drivers proper (accelerometer, microphone,
//! temperature) live outside this crate.

pub mod adc;
