//! Section Ring Buffer
//!
//! A [`Feature`] is a named ring buffer split into `section_count` sections
//! of `section_size` samples. A single producer fills it sample by sample;
//! up to [`MAX_RECEIVERS`] receivers read whole sections in place and
//! acknowledge them. Per section:
//!
//! ```text
//!  RECORDING ──(last sample written)──> PUBLISHED (acks cleared)
//!      ^                                    │
//!      └──(every live receiver acknowledged)┘
//! ```
//!
//! A paused receiver (one whose computer is inactive) does not count
//! towards "every receiver"; it is realigned when resumed.
//!
//! `locked` is orthogonal: it protects an ad-hoc read ([`Feature::stream`])
//! and unlocking restores whatever state the section was in.
//!
//! The producer never blocks. If a section is still awaited by a receiver
//! when the producer comes back to it, the section is overwritten and a
//! debug message is logged.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::config::{MAX_RECEIVERS, MAX_SECTION_COUNT, OPERATION_STATE_THRESHOLD_COUNT};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ComputerId, Name, OperationState, ReceiverIdx, SampleFormat};

use super::values::{FeatureValues, Sample, SampleSlice, SampleValue};

/// A consumer registered on a feature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Receiver {
    /// Computer reading the feature, `None` for ad-hoc consumers
    computer: Option<ComputerId>,
    /// Sections consumed per read
    window: usize,
    /// Paused receivers do not hold sections back from the producer
    live: bool,
}

/// Snapshot of a feature's cursors and section flags, for debugging
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCounters {
    /// Producer write cursor
    pub filling_index: usize,
    /// Section being recorded
    pub record_index: usize,
    /// Read cursor (section index) of each registered receiver
    pub compute_index: [usize; MAX_RECEIVERS],
    /// Number of registered receivers
    pub receiver_count: usize,
    /// Bit `s` set when section `s` is published
    pub published: u8,
    /// Bit `s` set when section `s` is locked
    pub locked: u8,
}

/// Named section ring buffer with multi-receiver acknowledgement
pub struct Feature<'a> {
    name: Name,
    section_count: usize,
    section_size: usize,
    total_size: usize,
    values: FeatureValues<'a>,
    filling_index: usize,
    record_index: usize,
    compute_index: [usize; MAX_RECEIVERS],
    published: [bool; MAX_SECTION_COUNT],
    locked: [bool; MAX_SECTION_COUNT],
    acknowledged: [[bool; MAX_RECEIVERS]; MAX_SECTION_COUNT],
    receivers: Vec<Receiver, MAX_RECEIVERS>,
    thresholds: [f32; OPERATION_STATE_THRESHOLD_COUNT],
    op_state_enabled: bool,
    operation_state: OperationState,
    resolution: f32,
    sampling_rate: u16,
    computer: Option<ComputerId>,
    active: bool,
    streaming: bool,
    filled_once: bool,
}

impl<'a> Feature<'a> {
    /// Create a feature over borrowed storage
    ///
    /// Only the first `section_count * section_size` samples of `values`
    /// are used.
    ///
    /// # Errors
    /// `NameTooLong` if the name does not fit, `InvalidGeometry` if the
    /// section count is 0 or above [`MAX_SECTION_COUNT`], the section size
    /// is 0 or the storage is too small.
    pub fn new(
        name: &str,
        section_count: usize,
        section_size: usize,
        values: FeatureValues<'a>,
    ) -> PipelineResult<Self> {
        let name = Name::try_from(name).map_err(|()| PipelineError::NameTooLong)?;
        if section_count == 0 || section_count > MAX_SECTION_COUNT || section_size == 0 {
            pipeline_warn!("{}: invalid section geometry", name.as_str());
            return Err(PipelineError::InvalidGeometry);
        }
        let total_size = section_count * section_size;
        if values.len() < total_size {
            pipeline_warn!("{}: storage holds {} of {} samples", name.as_str(), values.len(), total_size);
            return Err(PipelineError::InvalidGeometry);
        }
        Ok(Self {
            name,
            section_count,
            section_size,
            total_size,
            values,
            filling_index: 0,
            record_index: 0,
            compute_index: [0; MAX_RECEIVERS],
            published: [false; MAX_SECTION_COUNT],
            locked: [false; MAX_SECTION_COUNT],
            acknowledged: [[true; MAX_RECEIVERS]; MAX_SECTION_COUNT],
            receivers: Vec::new(),
            thresholds: [0.0; OPERATION_STATE_THRESHOLD_COUNT],
            op_state_enabled: false,
            operation_state: OperationState::Idle,
            resolution: 1.0,
            sampling_rate: 0,
            computer: None,
            active: false,
            streaming: false,
            filled_once: false,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Feature name
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Number of sections
    #[must_use]
    pub const fn section_count(&self) -> usize {
        self.section_count
    }

    /// Samples per section
    #[must_use]
    pub const fn section_size(&self) -> usize {
        self.section_size
    }

    /// Samples in the whole ring
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.total_size
    }

    /// Storage format of the samples
    #[must_use]
    pub fn format(&self) -> SampleFormat {
        self.values.format()
    }

    /// Producer write cursor
    #[must_use]
    pub const fn filling_index(&self) -> usize {
        self.filling_index
    }

    /// Section currently being recorded
    #[must_use]
    pub const fn record_index(&self) -> usize {
        self.record_index
    }

    /// Read cursor (section index) of a receiver
    #[must_use]
    pub fn compute_index(&self, receiver: ReceiverIdx) -> Option<usize> {
        (receiver.index() < self.receivers.len()).then(|| self.compute_index[receiver.index()])
    }

    /// Whether `section` is published
    #[must_use]
    pub fn is_published(&self, section: usize) -> bool {
        self.published.get(section).copied().unwrap_or(false)
    }

    /// Whether `receiver` acknowledged `section`
    #[must_use]
    pub fn is_acknowledged(&self, section: usize, receiver: ReceiverIdx) -> bool {
        section < self.section_count
            && receiver.index() < self.receivers.len()
            && self.acknowledged[section][receiver.index()]
    }

    /// Number of registered receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// Computers registered as receivers (ad-hoc consumers are skipped)
    pub fn receiver_computers(&self) -> impl Iterator<Item = ComputerId> + '_ {
        self.receivers.iter().filter_map(|r| r.computer)
    }

    /// Computer producing this feature, if any
    #[must_use]
    pub const fn computer(&self) -> Option<ComputerId> {
        self.computer
    }

    pub(crate) fn set_computer(&mut self, computer: ComputerId) {
        self.computer = Some(computer);
    }

    /// Physical units per raw count
    #[must_use]
    pub const fn resolution(&self) -> f32 {
        self.resolution
    }

    /// Set the physical units per raw count
    pub fn set_resolution(&mut self, resolution: f32) {
        self.resolution = resolution;
    }

    /// Sampling rate in Hz
    #[must_use]
    pub const fn sampling_rate(&self) -> u16 {
        self.sampling_rate
    }

    /// Set the sampling rate in Hz
    pub fn set_sampling_rate(&mut self, sampling_rate: u16) {
        self.sampling_rate = sampling_rate;
    }

    /// Whether at least one section was ever published since the last reset
    #[must_use]
    pub const fn filled_once(&self) -> bool {
        self.filled_once
    }

    // ========================================================================
    // Activation and streaming flags
    // ========================================================================

    /// Whether the feature is required by the activation graph
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the feature as required
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Clear the required and streaming flags
    pub fn deactivate(&mut self) {
        self.active = false;
        self.streaming = false;
    }

    /// Whether a group streams this feature directly
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Mark the feature as directly streamed
    pub fn enable_streaming(&mut self) {
        self.streaming = true;
    }

    /// Clear the streaming flag
    pub fn disable_streaming(&mut self) {
        self.streaming = false;
    }

    // ========================================================================
    // Operation state
    // ========================================================================

    /// Set the 3 ordered thresholds and enable operation state tracking
    pub fn set_thresholds(&mut self, thresholds: [f32; OPERATION_STATE_THRESHOLD_COUNT]) {
        self.thresholds = thresholds;
        self.op_state_enabled = true;
    }

    /// Current thresholds
    #[must_use]
    pub const fn thresholds(&self) -> [f32; OPERATION_STATE_THRESHOLD_COUNT] {
        self.thresholds
    }

    /// Enable operation state tracking
    pub fn enable_operation_state(&mut self) {
        self.op_state_enabled = true;
    }

    /// Disable operation state tracking (state reads as `Idle`)
    pub fn disable_operation_state(&mut self) {
        self.op_state_enabled = false;
        self.operation_state = OperationState::Idle;
    }

    /// Whether operation state tracking is enabled
    #[must_use]
    pub const fn is_operation_state_enabled(&self) -> bool {
        self.op_state_enabled
    }

    /// Operation state of the last published section
    #[must_use]
    pub const fn operation_state(&self) -> OperationState {
        self.operation_state
    }

    /// Reclassify the last published section against the thresholds
    ///
    /// The aggregate is `resolution * mean` of the section, which for one
    /// sample sections is the value itself.
    pub fn update_operation_state(&mut self) {
        if !self.op_state_enabled || !self.filled_once {
            self.operation_state = OperationState::Idle;
            return;
        }
        let section = self.last_published_section();
        let mean = crate::dsp::stats::mean(self.section(section).iter_raw());
        self.operation_state = OperationState::classify(mean * self.resolution, &self.thresholds);
    }

    // ========================================================================
    // Producer side
    // ========================================================================

    /// Append a sample, publishing the section when it is complete
    pub fn add_value<T: SampleValue>(&mut self, value: T) {
        self.add_sample(value.into_sample());
    }

    /// Append a format-erased sample
    pub fn add_sample(&mut self, sample: Sample) {
        if self.filling_index % self.section_size == 0 && !self.is_ready_to_record(1) {
            pipeline_debug!(
                "{}: overwriting section {} before all receivers acknowledged it",
                self.name.as_str(),
                self.record_index
            );
        }
        self.values.set(self.filling_index, sample);
        self.increment_filling_index();
    }

    /// Advance the write cursor, publishing a completed section
    pub fn increment_filling_index(&mut self) {
        self.filling_index += 1;
        if self.filling_index >= (self.record_index + 1) * self.section_size {
            let section = self.record_index;
            self.published[section] = true;
            for ack in &mut self.acknowledged[section][..self.receivers.len()] {
                *ack = false;
            }
            self.record_index = (self.record_index + 1) % self.section_count;
            self.filled_once = true;
            self.update_operation_state();
        }
        self.filling_index %= self.total_size;
    }

    /// Whether the next `n` sections can be overwritten
    ///
    /// True iff each is unlocked and acknowledged by every live receiver.
    /// A feature without live receivers is ready whenever unlocked.
    #[must_use]
    pub fn is_ready_to_record(&self, n: usize) -> bool {
        (0..n).all(|k| {
            let section = (self.record_index + k) % self.section_count;
            !self.locked[section] && self.all_acknowledged(section)
        })
    }

    // ========================================================================
    // Receiver side
    // ========================================================================

    /// Register a receiver reading `window` sections at a time
    ///
    /// The receiver starts at the window-aligned section at or before the
    /// section being recorded, with every section marked acknowledged so it
    /// only reads data published from now on.
    ///
    /// # Errors
    /// `InvalidWindow` if `window` is 0 or does not divide the section
    /// count, `CapacityExceeded` if [`MAX_RECEIVERS`] are registered.
    pub fn add_receiver(
        &mut self,
        computer: Option<ComputerId>,
        window: usize,
    ) -> PipelineResult<ReceiverIdx> {
        if window == 0 || self.section_count % window != 0 {
            pipeline_warn!(
                "{}: window of {} does not divide {} sections",
                self.name.as_str(),
                window,
                self.section_count
            );
            return Err(PipelineError::InvalidWindow);
        }
        let idx = self.receivers.len();
        let receiver = Receiver {
            computer,
            window,
            live: true,
        };
        if self.receivers.push(receiver).is_err() {
            pipeline_warn!("{}: receiver capacity exceeded", self.name.as_str());
            return Err(PipelineError::CapacityExceeded);
        }
        self.resync_receiver(idx);
        // `idx < MAX_RECEIVERS`, fits in u8
        Ok(ReceiverIdx(idx as u8))
    }

    /// Stop `receiver` from holding sections back
    ///
    /// Sections only it still awaited are unpublished. Unknown receivers
    /// are ignored.
    pub fn pause_receiver(&mut self, receiver: ReceiverIdx) {
        let r = receiver.index();
        let Some(entry) = self.receivers.get_mut(r) else {
            return;
        };
        if !entry.live {
            return;
        }
        entry.live = false;
        for section in 0..self.section_count {
            if self.published[section] && self.all_acknowledged(section) {
                self.published[section] = false;
            }
        }
    }

    /// Make a paused `receiver` live again
    ///
    /// Like a new receiver, it restarts at the window holding the section
    /// being recorded and only reads data published from now on.
    pub fn resume_receiver(&mut self, receiver: ReceiverIdx) {
        let r = receiver.index();
        let Some(entry) = self.receivers.get_mut(r) else {
            return;
        };
        if entry.live {
            return;
        }
        entry.live = true;
        self.resync_receiver(r);
    }

    /// Whether `receiver` holds sections back from the producer
    #[must_use]
    pub fn is_receiver_live(&self, receiver: ReceiverIdx) -> bool {
        self.receivers.get(receiver.index()).is_some_and(|r| r.live)
    }

    /// Sections per read of a receiver
    #[must_use]
    pub fn receiver_window(&self, receiver: ReceiverIdx) -> Option<usize> {
        self.receivers.get(receiver.index()).map(|r| r.window)
    }

    /// Whether the next `n` sections for `receiver` can be read
    ///
    /// True iff each is unlocked, published and not yet acknowledged by
    /// this receiver.
    #[must_use]
    pub fn is_ready_to_compute(&self, receiver: ReceiverIdx, n: usize) -> bool {
        let r = receiver.index();
        if r >= self.receivers.len() {
            return false;
        }
        let start = self.compute_index[r];
        (0..n).all(|k| {
            let section = (start + k) % self.section_count;
            !self.locked[section] && self.published[section] && !self.acknowledged[section][r]
        })
    }

    /// Acknowledge the receiver's current window
    ///
    /// Sections acknowledged by every live receiver are unpublished. The
    /// read cursor advances by the receiver's window. Unknown receivers
    /// are ignored.
    pub fn acknowledge(&mut self, receiver: ReceiverIdx) {
        let r = receiver.index();
        let Some(n) = self.receivers.get(r).map(|entry| entry.window) else {
            pipeline_debug!("{}: acknowledge from unknown receiver {}", self.name.as_str(), r);
            return;
        };
        let start = self.compute_index[r];
        for k in 0..n {
            let section = (start + k) % self.section_count;
            self.acknowledged[section][r] = true;
            if self.all_acknowledged(section) {
                self.published[section] = false;
            }
        }
        self.compute_index[r] = (start + n) % self.section_count;
    }

    /// View of the receiver's next window, without readiness check
    ///
    /// Returns `None` for an unknown receiver.
    #[must_use]
    pub fn next_samples(&self, receiver: ReceiverIdx) -> Option<SampleSlice<'_>> {
        let r = receiver.index();
        let window = self.receivers.get(r)?.window;
        let start = self.compute_index[r] * self.section_size;
        let end = (start + window * self.section_size).min(self.total_size);
        Some(self.values.slice(start, end))
    }

    /// Typed view of the receiver's next window, without readiness check
    ///
    /// Returns `None` for an unknown receiver or a format mismatch.
    #[must_use]
    pub fn next_values<T: SampleValue>(&self, receiver: ReceiverIdx) -> Option<&[T]> {
        self.next_samples(receiver).and_then(T::view)
    }

    // ========================================================================
    // Ad-hoc reads
    // ========================================================================

    /// Most recently published section
    #[must_use]
    pub const fn last_published_section(&self) -> usize {
        (self.section_count + self.record_index - 1) % self.section_count
    }

    /// View of one section
    ///
    /// # Panics
    /// Panics if `section >= section_count`.
    #[must_use]
    pub fn section(&self, section: usize) -> SampleSlice<'_> {
        let start = section * self.section_size;
        self.values.slice(start, start + self.section_size)
    }

    /// Last raw value of the most recently published section
    #[must_use]
    pub fn latest_value(&self) -> Option<f32> {
        if !self.filled_once {
            return None;
        }
        let section = self.section(self.last_published_section());
        Some(section.raw(section.len() - 1))
    }

    /// Protect `section` against being overwritten
    pub fn lock_section(&mut self, section: usize) {
        if let Some(locked) = self.locked.get_mut(section) {
            *locked = true;
        }
    }

    /// Release a section locked by [`Feature::lock_section`]
    pub fn unlock_section(&mut self, section: usize) {
        if let Some(locked) = self.locked.get_mut(section) {
            *locked = false;
        }
    }

    /// Whether `section` is locked
    #[must_use]
    pub fn is_section_locked(&self, section: usize) -> bool {
        self.locked.get(section).copied().unwrap_or(false)
    }

    /// Serialize the most recently published section as `,v0,v1,...`
    ///
    /// Float samples are written in physical units with 2 decimals,
    /// fixed-point samples as raw counts. The section is locked for the
    /// duration of the write.
    ///
    /// # Errors
    /// Propagates the port's formatting error (the section is unlocked
    /// regardless).
    pub fn stream<W: Write>(&mut self, port: &mut W) -> fmt::Result {
        let section = self.last_published_section();
        self.lock_section(section);
        let result = self.write_section(section, port);
        self.unlock_section(section);
        result
    }

    fn write_section<W: Write>(&self, section: usize, port: &mut W) -> fmt::Result {
        let start = section * self.section_size;
        match self.values.slice(start, start + self.section_size) {
            SampleSlice::Float(values) => {
                for v in values {
                    write!(port, ",{:.2}", v * self.resolution)?;
                }
            }
            SampleSlice::Q15(values) => {
                for v in values {
                    write!(port, ",{}", v.to_bits())?;
                }
            }
            SampleSlice::Q31(values) => {
                for v in values {
                    write!(port, ",{}", v.to_bits())?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Return to the empty state in place
    ///
    /// Samples are zeroed, cursors rewound and every section unpublished,
    /// unlocked and acknowledged. Receivers stay registered.
    pub fn reset(&mut self) {
        self.values.clear();
        self.filling_index = 0;
        self.record_index = 0;
        self.compute_index = [0; MAX_RECEIVERS];
        self.published = [false; MAX_SECTION_COUNT];
        self.locked = [false; MAX_SECTION_COUNT];
        self.acknowledged = [[true; MAX_RECEIVERS]; MAX_SECTION_COUNT];
        self.filled_once = false;
        self.operation_state = OperationState::Idle;
    }

    /// Snapshot of cursors and flags
    #[must_use]
    pub fn counters(&self) -> BufferCounters {
        let mut published = 0u8;
        let mut locked = 0u8;
        for s in 0..self.section_count {
            published |= u8::from(self.published[s]) << s;
            locked |= u8::from(self.locked[s]) << s;
        }
        BufferCounters {
            filling_index: self.filling_index,
            record_index: self.record_index,
            compute_index: self.compute_index,
            receiver_count: self.receivers.len(),
            published,
            locked,
        }
    }

    fn all_acknowledged(&self, section: usize) -> bool {
        self.receivers
            .iter()
            .zip(&self.acknowledged[section])
            .all(|(receiver, &ack)| ack || !receiver.live)
    }

    /// Align receiver `r` on the window being recorded, everything acked
    fn resync_receiver(&mut self, r: usize) {
        let Some(window) = self.receivers.get(r).map(|entry| entry.window) else {
            return;
        };
        self.compute_index[r] = (self.record_index / window) * window;
        for section in &mut self.acknowledged {
            section[r] = true;
        }
    }
}

impl fmt::Debug for Feature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name.as_str())
            .field("format", &self.values.format())
            .field("sections", &self.section_count)
            .field("section_size", &self.section_size)
            .field("active", &self.active)
            .field("counters", &self.counters())
            .finish()
    }
}
