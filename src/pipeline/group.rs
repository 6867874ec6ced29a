//! Feature Groups
//!
//! A [`FeatureGroup`] is a named, ordered set of features streamed
//! together every `data_send_period_ms`. One message is
//!
//! ```text
//! NAME,<timestamp>,<op state digit>,v,v,...,v,v;
//! ```
//!
//! with each member's most recently published section serialized by
//! [`Feature::stream`] in declaration order. The queued flavour batches
//! several messages into one [`SendingQueue`] node, prefixed by the raw
//! node index byte and `:`.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::config::{MAX_BUFFER_DELAY_MS, MAX_BUFFER_MARGIN, MAX_GROUP_FEATURES};
use crate::error::{PipelineError, PipelineResult};
use crate::transport::{NodeState, SendingQueue};
use crate::types::{FeatureId, GroupId, Name, OperationState};

use super::buffer::Feature;
use super::Pipeline;

/// Node index byte and `:` written when a group takes a node
const BATCH_PREFIX_LEN: usize = 2;

/// Queue node currently collecting this group's messages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Batch {
    node: usize,
    started_ms: u32,
}

/// Named set of features streamed together
#[derive(Clone, Debug)]
pub struct FeatureGroup {
    name: Name,
    features: Vec<FeatureId, MAX_GROUP_FEATURES>,
    active: bool,
    data_send_period_ms: u32,
    last_sent_ms: u32,
    batch: Option<Batch>,
}

impl FeatureGroup {
    /// Inactive, empty group
    ///
    /// # Errors
    /// `NameTooLong` if the name does not fit.
    pub fn new(name: &str, data_send_period_ms: u32) -> PipelineResult<Self> {
        Ok(Self {
            name: Name::try_from(name).map_err(|()| PipelineError::NameTooLong)?,
            features: Vec::new(),
            active: false,
            data_send_period_ms,
            last_sent_ms: 0,
            batch: None,
        })
    }

    /// Group name
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Members in declaration order
    #[must_use]
    pub fn features(&self) -> &[FeatureId] {
        &self.features
    }

    /// Whether `feature` is a member
    #[must_use]
    pub fn contains(&self, feature: FeatureId) -> bool {
        self.features.contains(&feature)
    }

    /// Append a member
    ///
    /// # Errors
    /// `CapacityExceeded` if [`MAX_GROUP_FEATURES`] are already members.
    pub fn add_feature(&mut self, feature: FeatureId) -> PipelineResult<()> {
        self.features.push(feature).map_err(|_| {
            pipeline_warn!("group {}: too many features", self.name.as_str());
            PipelineError::CapacityExceeded
        })
    }

    /// Drop every member
    pub fn clear(&mut self) {
        self.features.clear();
    }

    /// Whether the group streams
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Set the streaming flag only (see [`Pipeline::activate_group`])
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Clear the streaming flag only (see [`Pipeline::deactivate_group`])
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Minimum time between two messages
    #[must_use]
    pub const fn data_send_period_ms(&self) -> u32 {
        self.data_send_period_ms
    }

    /// Change the time between two messages
    pub fn set_data_send_period(&mut self, period_ms: u32) {
        self.data_send_period_ms = period_ms;
        pipeline_debug!("group {}: data send period set to {}", self.name.as_str(), period_ms);
    }

    /// True at most once per period, restarting the period when true
    ///
    /// A clock that went backwards (`last > now`) restarts the period.
    pub fn is_data_send_time(&mut self, now_ms: u32) -> bool {
        if self.last_sent_ms > now_ms {
            self.last_sent_ms = now_ms;
            return false;
        }
        if now_ms - self.last_sent_ms > self.data_send_period_ms {
            self.last_sent_ms = now_ms;
            return true;
        }
        false
    }

    /// Write one message directly to `port`
    ///
    /// Nothing is written unless the group is active, non-empty, every
    /// member was filled once and it is send time. Returns whether a
    /// complete message was written.
    pub fn legacy_stream<W: Write>(
        &mut self,
        features: &mut [Feature<'_>],
        operation_state: OperationState,
        timestamp: f64,
        now_ms: u32,
        port: &mut W,
    ) -> bool {
        if !self.is_ready_to_stream(features) || !self.is_data_send_time(now_ms) {
            return false;
        }
        self.write_message(features, operation_state, timestamp, port).is_ok()
    }

    /// Append one message to this group's batching node of `queue`
    ///
    /// Same gating as [`FeatureGroup::legacy_stream`]. The batching node is
    /// handed over (marked ready to send) and a new one taken when it is
    /// older than [`MAX_BUFFER_DELAY_MS`] or has less than
    /// [`MAX_BUFFER_MARGIN`] bytes left. A message that does not fit behind
    /// earlier ones is retried once on a fresh node. Returns whether the
    /// message was queued.
    pub fn stream(
        &mut self,
        features: &mut [Feature<'_>],
        operation_state: OperationState,
        timestamp: f64,
        now_ms: u32,
        queue: &mut SendingQueue,
    ) -> bool {
        if !self.is_ready_to_stream(features) || !self.is_data_send_time(now_ms) {
            return false;
        }
        let mut idx = self.batch_node(queue, now_ms);
        match self.append_message(features, operation_state, timestamp, queue, idx) {
            Ok(()) => return true,
            Err(held) if held > BATCH_PREFIX_LEN => {
                queue.finished_writing(idx, now_ms);
                self.batch = None;
                idx = self.batch_node(queue, now_ms);
                if self
                    .append_message(features, operation_state, timestamp, queue, idx)
                    .is_ok()
                {
                    return true;
                }
            }
            Err(_) => {}
        }
        pipeline_warn!("group {}: message does not fit in queue node {}", self.name.as_str(), idx);
        false
    }

    /// Hand the batching node over to the transport now
    pub fn flush(&mut self, queue: &mut SendingQueue, now_ms: u32) {
        if let Some(batch) = self.batch.take() {
            if Self::owns(queue, batch) {
                queue.finished_writing(batch.node, now_ms);
            }
        }
    }

    fn is_ready_to_stream(&self, features: &[Feature<'_>]) -> bool {
        self.active
            && !self.features.is_empty()
            && self
                .features
                .iter()
                .all(|id| features.get(id.index()).is_some_and(Feature::filled_once))
    }

    // A node reset under us (queue full) no longer belongs to the batch
    fn owns(queue: &SendingQueue, batch: Batch) -> bool {
        queue
            .node(batch.node)
            .is_some_and(|node| node.state() == NodeState::InWriting)
    }

    fn batch_node(&mut self, queue: &mut SendingQueue, now_ms: u32) -> usize {
        if let Some(batch) = self.batch {
            if !Self::owns(queue, batch) {
                self.batch = None;
            }
        }
        if let Some(batch) = self.batch {
            let fresh = now_ms.wrapping_sub(batch.started_ms) <= MAX_BUFFER_DELAY_MS;
            let roomy = queue
                .node(batch.node)
                .is_some_and(|node| node.remaining() >= MAX_BUFFER_MARGIN);
            if fresh && roomy {
                return batch.node;
            }
            queue.finished_writing(batch.node, now_ms);
        }
        let idx = queue.next_buffer_to_write();
        queue.started_writing(idx);
        if let Some(node) = queue.node_mut(idx) {
            // idx < QUEUE_NODE_COUNT, fits in u8
            node.push_byte(idx as u8);
            node.push_byte(b':');
        }
        self.batch = Some(Batch {
            node: idx,
            started_ms: now_ms,
        });
        idx
    }

    /// Write one message at the end of node `idx`
    ///
    /// On failure the node is truncated back and the error carries the
    /// number of bytes it holds.
    fn append_message(
        &self,
        features: &mut [Feature<'_>],
        operation_state: OperationState,
        timestamp: f64,
        queue: &mut SendingQueue,
        idx: usize,
    ) -> Result<(), usize> {
        let Some(node) = queue.node_mut(idx) else {
            return Err(0);
        };
        let mark = node.len();
        if self.write_message(features, operation_state, timestamp, node).is_err() {
            node.truncate(mark);
            return Err(mark);
        }
        Ok(())
    }

    fn write_message<W: Write>(
        &self,
        features: &mut [Feature<'_>],
        operation_state: OperationState,
        timestamp: f64,
        port: &mut W,
    ) -> fmt::Result {
        write!(port, "{},{:.2},{}", self.name, timestamp, operation_state.as_digit())?;
        for id in &self.features {
            if let Some(feature) = features.get_mut(id.index()) {
                feature.stream(port)?;
            }
        }
        port.write_char(';')
    }
}

impl Pipeline<'_> {
    /// Stream group `id` to `port` (see [`FeatureGroup::legacy_stream`])
    ///
    /// The operation state digit is [`Pipeline::device_operation_state`].
    pub fn legacy_stream_group<W: Write>(
        &mut self,
        id: GroupId,
        timestamp: f64,
        now_ms: u32,
        port: &mut W,
    ) -> bool {
        let operation_state = self.device_operation_state();
        match self.groups.get_mut(id.index()) {
            Some(group) => {
                group.legacy_stream(&mut self.features, operation_state, timestamp, now_ms, port)
            }
            None => false,
        }
    }

    /// Queue group `id` (see [`FeatureGroup::stream`])
    pub fn stream_group(
        &mut self,
        id: GroupId,
        timestamp: f64,
        now_ms: u32,
        queue: &mut SendingQueue,
    ) -> bool {
        let operation_state = self.device_operation_state();
        match self.groups.get_mut(id.index()) {
            Some(group) => group.stream(&mut self.features, operation_state, timestamp, now_ms, queue),
            None => false,
        }
    }

    /// Queue every group, returns how many produced a message
    pub fn stream_all_groups(&mut self, timestamp: f64, now_ms: u32, queue: &mut SendingQueue) -> usize {
        let operation_state = self.device_operation_state();
        let features = &mut self.features;
        self.groups
            .iter_mut()
            .filter(|group| group.is_active())
            .map(|group| group.stream(features, operation_state, timestamp, now_ms, queue))
            .filter(|&sent| sent)
            .count()
    }

    /// Hand every group's batching node over to the transport
    pub fn flush_groups(&mut self, queue: &mut SendingQueue, now_ms: u32) {
        for group in &mut self.groups {
            group.flush(queue, now_ms);
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_send_time_once_per_period() {
        let mut group = FeatureGroup::new("HEALTH", 500).unwrap();
        assert!(!group.is_data_send_time(500));
        assert!(group.is_data_send_time(501));
        assert!(!group.is_data_send_time(900));
        assert!(group.is_data_send_time(1002));
    }

    #[test]
    fn test_clock_rollback_restarts_period() {
        let mut group = FeatureGroup::new("HEALTH", 500).unwrap();
        assert!(group.is_data_send_time(10_000));
        assert!(!group.is_data_send_time(100));
        assert!(!group.is_data_send_time(600));
        assert!(group.is_data_send_time(601));
    }

    #[test]
    fn test_membership_capacity() {
        let mut group = FeatureGroup::new("MOTSTD", 512).unwrap();
        for i in 0..MAX_GROUP_FEATURES {
            assert!(group.add_feature(FeatureId(i as u8)).is_ok());
        }
        assert_eq!(
            group.add_feature(FeatureId(50)),
            Err(PipelineError::CapacityExceeded)
        );
        assert!(group.contains(FeatureId(3)));
    }

    #[test]
    fn test_empty_group_never_streams() {
        let mut group = FeatureGroup::new("MOTSTD", 0).unwrap();
        group.activate();
        let mut port: heapless::String<64> = heapless::String::new();
        assert!(!group.legacy_stream(&mut [], OperationState::Idle, 0.0, 10, &mut port));
        assert!(port.is_empty());
    }
}
