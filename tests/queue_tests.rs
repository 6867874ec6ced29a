//! Sending Queue Tests
//!
//! Node lifecycle, overwrite on a full ring, retry and expiry.
//! Run with: cargo test --features std --test queue_tests

use core::fmt::Write;

use vibration_node::config::{MAX_RETRY_DURATION_MS, QUEUE_NODE_COUNT};
use vibration_node::transport::{NodeState, SendingQueue};

/// Take the next node, write `text` and hand it over at `now_ms`
fn queue_message(queue: &mut SendingQueue, text: &str, now_ms: u32) -> usize {
    let idx = queue.next_buffer_to_write();
    queue.started_writing(idx);
    queue.node_mut(idx).unwrap().write_str(text).unwrap();
    queue.finished_writing(idx, now_ms);
    idx
}

fn state(queue: &SendingQueue, idx: usize) -> NodeState {
    queue.node(idx).unwrap().state()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_message_lifecycle() {
    let mut queue = SendingQueue::new();
    let idx = queue.next_buffer_to_write();
    assert_eq!(idx, 0);
    assert_eq!(state(&queue, idx), NodeState::AvailableForWrite);

    queue.started_writing(idx);
    assert_eq!(state(&queue, idx), NodeState::InWriting);
    assert_eq!(queue.next_buffer_to_send(), None);

    queue.node_mut(idx).unwrap().write_str("MOTSTD,1.00,0;").unwrap();
    queue.finished_writing(idx, 100);
    assert_eq!(state(&queue, idx), NodeState::ReadyToSend);
    assert_eq!(queue.node(idx).unwrap().completed_ms(), 100);
    assert_eq!(queue.next_buffer_to_send(), Some(idx));

    queue.attempting_to_send(idx, 150);
    assert_eq!(state(&queue, idx), NodeState::BeingSent);
    assert_eq!(queue.next_buffer_to_send(), None);

    assert!(queue.confirm_successful_send(idx));
    assert_eq!(state(&queue, idx), NodeState::AvailableForWrite);
    assert!(queue.node(idx).unwrap().is_empty());
}

#[test]
fn test_confirmation_only_frees_nodes_being_sent() {
    let mut queue = SendingQueue::new();
    let idx = queue_message(&mut queue, "A;", 0);
    assert!(!queue.confirm_successful_send(idx));
    assert_eq!(state(&queue, idx), NodeState::ReadyToSend);

    let writing = queue.next_buffer_to_write();
    queue.started_writing(writing);
    assert!(!queue.confirm_successful_send(writing));
    assert_eq!(state(&queue, writing), NodeState::InWriting);
}

#[test]
fn test_sends_oldest_first() {
    let mut queue = SendingQueue::new();
    let first = queue_message(&mut queue, "A;", 0);
    let second = queue_message(&mut queue, "B;", 10);
    assert_eq!(queue.next_buffer_to_send(), Some(first));
    queue.attempting_to_send(first, 20);
    assert_eq!(queue.next_buffer_to_send(), Some(second));
}

// =============================================================================
// Full ring
// =============================================================================

#[test]
fn test_full_ring_overwrites_oldest_node() {
    let mut queue = SendingQueue::new();
    let mut handed_out = Vec::new();
    for k in 0..QUEUE_NODE_COUNT {
        handed_out.push(queue_message(&mut queue, "X;", k as u32));
    }
    assert_eq!(handed_out, (0..QUEUE_NODE_COUNT).collect::<Vec<_>>());
    // Head caught up with tail: node 0 was dropped
    assert_eq!(queue.head(), 0);
    assert_eq!(queue.tail(), 1);
    assert_eq!(state(&queue, 0), NodeState::AvailableForWrite);
    assert_eq!(queue.next_buffer_to_send(), Some(1));

    assert_eq!(queue.next_buffer_to_write(), 0);
    assert_eq!(queue.head(), 1);
    // Node 1 is now the one to lose
    assert_eq!(queue.tail(), 2);
    assert_eq!(state(&queue, 1), NodeState::AvailableForWrite);
}

#[test]
fn test_writer_gets_a_clean_node() {
    let mut queue = SendingQueue::new();
    for k in 0..QUEUE_NODE_COUNT {
        queue_message(&mut queue, "stale;", k as u32);
    }
    let idx = queue.next_buffer_to_write();
    let node = queue.node(idx).unwrap();
    assert!(node.is_empty());
    assert_eq!(node.state(), NodeState::AvailableForWrite);
}

// =============================================================================
// Retry and expiry
// =============================================================================

#[test]
fn test_unconfirmed_send_is_retried() {
    let mut queue = SendingQueue::new();
    let idx = queue_message(&mut queue, "A;", 1_000);
    queue.attempting_to_send(idx, 2_000);

    queue.maintain(2_000 + MAX_RETRY_DURATION_MS);
    assert_eq!(state(&queue, idx), NodeState::BeingSent);

    let retry_at = 2_001 + MAX_RETRY_DURATION_MS;
    queue.maintain(retry_at);
    assert_eq!(state(&queue, idx), NodeState::ReadyToSend);
    assert_eq!(queue.node(idx).unwrap().completed_ms(), retry_at);
    assert_eq!(queue.next_buffer_to_send(), Some(idx));
}

#[test]
fn test_unsent_node_expires() {
    let mut queue = SendingQueue::new();
    let idx = queue_message(&mut queue, "A;", 1_000);

    queue.maintain(1_000 + MAX_RETRY_DURATION_MS);
    assert_eq!(state(&queue, idx), NodeState::ReadyToSend);

    queue.maintain(1_001 + MAX_RETRY_DURATION_MS);
    assert_eq!(state(&queue, idx), NodeState::AvailableForWrite);
    assert_eq!(queue.tail(), queue.head());
    assert_eq!(queue.next_buffer_to_send(), None);
}

#[test]
fn test_maintain_handles_clock_wrap() {
    let mut queue = SendingQueue::new();
    let start = u32::MAX - 100;
    let idx = queue_message(&mut queue, "A;", start);

    queue.maintain(500);
    assert_eq!(state(&queue, idx), NodeState::ReadyToSend);
    queue.maintain(start.wrapping_add(MAX_RETRY_DURATION_MS + 1));
    assert_eq!(state(&queue, idx), NodeState::AvailableForWrite);
}

#[test]
fn test_maintain_advances_tail_over_free_nodes() {
    let mut queue = SendingQueue::new();
    let a = queue_message(&mut queue, "A;", 0);
    let b = queue_message(&mut queue, "B;", 0);
    queue.attempting_to_send(a, 0);
    queue.confirm_successful_send(a);
    queue.maintain(10);
    assert_eq!(queue.tail(), b);

    queue.attempting_to_send(b, 10);
    queue.confirm_successful_send(b);
    queue.maintain(20);
    assert_eq!(queue.tail(), queue.head());
}
