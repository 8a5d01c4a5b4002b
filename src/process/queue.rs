//! C8 — the lock-free single-producer/single-consumer event queue that
//! feeds a track's pending UMP list. One allocation at construction
//! (the ring buffer itself); `schedule_events`/`drain_into` never
//! allocate afterward.

use rtrb::RingBuffer;

use crate::process::ump::UmpIter;

/// One UMP (up to 128 bits) tagged with the sample-accurate timestamp it
/// was scheduled at. Stored inline so the queue never allocates per item.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledUmp {
    pub timestamp: u64,
    bytes: [u8; 16],
    len: u8,
}

impl ScheduledUmp {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The UMP group nibble (bits 27:24 of word 0), used by the graph's
    /// per-node group filter.
    pub fn group(&self) -> u8 {
        ((u32::from_be_bytes(self.bytes[0..4].try_into().unwrap()) >> 24) & 0xF) as u8
    }
}

pub struct EventQueueProducer {
    inner: rtrb::Producer<ScheduledUmp>,
}

pub struct EventQueueConsumer {
    inner: rtrb::Consumer<ScheduledUmp>,
}

/// Creates a bound SPSC queue with room for `capacity` UMPs.
pub fn event_queue(capacity: usize) -> (EventQueueProducer, EventQueueConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (EventQueueProducer { inner: producer }, EventQueueConsumer { inner: consumer })
}

impl EventQueueProducer {
    /// Parses `bytes` as a sequence of UMPs (length from the type nibble
    /// of each UMP's first word) and enqueues each tagged with
    /// `timestamp`. Stops the moment the queue is full; returns how many
    /// were actually enqueued. A truncated tail UMP is silently dropped,
    /// same as the framing rule in [`UmpIter`].
    pub fn schedule_events(&mut self, timestamp: u64, bytes: &[u8]) -> usize {
        let mut enqueued = 0;
        for ump in UmpIter::new(bytes) {
            let mut inline = [0u8; 16];
            inline[..ump.len()].copy_from_slice(ump);
            let item = ScheduledUmp { timestamp, bytes: inline, len: ump.len() as u8 };
            if self.inner.push(item).is_err() {
                break;
            }
            enqueued += 1;
        }
        enqueued
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

impl EventQueueConsumer {
    /// Drains everything currently available without blocking, preserving
    /// enqueue order, into the caller's thread-local pending list.
    pub fn drain_into(&mut self, pending: &mut Vec<ScheduledUmp>) {
        while let Ok(item) = self.inner.pop() {
            pending.push(item);
        }
    }

    pub fn try_pop(&mut self) -> Option<ScheduledUmp> {
        self.inner.pop().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midi2_note_on(channel: u8, note: u8, velocity16: u16) -> [u8; 8] {
        let word0 = (0x4u32 << 28) | ((0x9u32) << 20) | ((channel as u32) << 16) | ((note as u32) << 8);
        let word1 = (velocity16 as u32) << 16;
        let mut out = [0u8; 8];
        out[0..4].copy_from_slice(&word0.to_be_bytes());
        out[4..8].copy_from_slice(&word1.to_be_bytes());
        out
    }

    #[test]
    fn schedule_and_drain_preserves_order() {
        let (mut producer, mut consumer) = event_queue(8);
        let a = midi2_note_on(0, 60, 0xF800);
        let b = midi2_note_on(0, 64, 0x6000);
        let mut bytes = a.to_vec();
        bytes.extend_from_slice(&b);

        let enqueued = producer.schedule_events(100, &bytes);
        assert_eq!(enqueued, 2);

        let mut pending = Vec::new();
        consumer.drain_into(&mut pending);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].as_slice(), &a);
        assert_eq!(pending[1].as_slice(), &b);
        assert_eq!(pending[0].timestamp, 100);
    }

    #[test]
    fn schedule_stops_when_capacity_exhausted() {
        let (mut producer, _consumer) = event_queue(1);
        let a = midi2_note_on(0, 60, 0xF800);
        let b = midi2_note_on(0, 64, 0x6000);
        let mut bytes = a.to_vec();
        bytes.extend_from_slice(&b);

        let enqueued = producer.schedule_events(0, &bytes);
        assert_eq!(enqueued, 1);
        assert!(producer.is_full());
    }
}
