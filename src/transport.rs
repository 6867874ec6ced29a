//! Outbound Transport
//!
//! Serialized feature messages leave the node through a bounded queue of
//! fixed-size byte buffers. The wire protocols themselves (BLE, WiFi,
//! Modbus) are external: they poll [`SendingQueue::next_buffer_to_send`]
//! and acknowledge nodes by index.

pub mod queue;

pub use queue::{CharBufferNode, NodeState, SendingQueue};
