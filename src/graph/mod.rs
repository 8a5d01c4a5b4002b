//! C9 — a track's ordered plugin-node chain.
//!
//! Grounded on `AudioPluginTrack.hpp`/`AudioPluginTrackImpl::processAudio`:
//! drain the pending queue, clear outputs, walk nodes filtering each
//! one's event input by UMP group, forward `eventOut` to a caller
//! callback, and `advanceToNextNode` between nodes.

use crate::instance::PluginInstance;
use crate::process::context::AudioProcessContext;
use crate::process::queue::{EventQueueConsumer, ScheduledUmp};
use crate::status::StatusCode;

/// `0xFF` means "any group" — the group filter's wildcard.
pub const ANY_GROUP: u8 = 0xFF;

pub type GroupResolver = Box<dyn Fn(i32) -> u8 + Send + Sync>;
pub type EventOutputCallback = Box<dyn FnMut(i32, &[u8]) + Send>;

/// A plugin instance wrapped with the identity the group resolver and
/// event-output callback address it by.
pub struct Node {
    instance_id: i32,
    instance: Box<dyn PluginInstance>,
}

impl Node {
    pub fn new(instance_id: i32, instance: Box<dyn PluginInstance>) -> Self {
        Self { instance_id, instance }
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn instance(&self) -> &dyn PluginInstance {
        self.instance.as_ref()
    }

    pub fn instance_mut(&mut self) -> &mut dyn PluginInstance {
        self.instance.as_mut()
    }
}

/// An ordered chain of nodes sharing one [`AudioProcessContext`].
pub struct Track {
    nodes: Vec<Node>,
    context: AudioProcessContext,
    queue_consumer: EventQueueConsumer,
    pending_events: Vec<ScheduledUmp>,
    group_resolver: Option<GroupResolver>,
    event_output_callback: Option<EventOutputCallback>,
    bypassed: bool,
    frozen: bool,
}

impl Track {
    pub fn new(context: AudioProcessContext, queue_consumer: EventQueueConsumer) -> Self {
        Self {
            nodes: Vec::new(),
            context,
            queue_consumer,
            pending_events: Vec::new(),
            group_resolver: None,
            event_output_callback: None,
            bypassed: false,
            frozen: false,
        }
    }

    pub fn context(&self) -> &AudioProcessContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AudioProcessContext {
        &mut self.context
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn remove_node(&mut self, instance_id: i32) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.instance_id != instance_id);
        self.nodes.len() != before
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, value: bool) {
        self.bypassed = value;
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_frozen(&mut self, value: bool) {
        self.frozen = value;
    }

    pub fn set_group_resolver(&mut self, resolver: GroupResolver) {
        self.group_resolver = Some(resolver);
    }

    pub fn set_event_output_callback(&mut self, callback: EventOutputCallback) {
        self.event_output_callback = Some(callback);
    }

    /// §4.9's four-step block: drain pending events, clear outputs, run
    /// each node with its group-filtered event input, chain via
    /// `advanceToNextNode`.
    pub fn process_audio(&mut self) -> StatusCode {
        self.queue_consumer.drain_into(&mut self.pending_events);

        self.context.clear_audio_outputs();

        if self.bypassed || self.frozen || self.nodes.is_empty() {
            return StatusCode::Ok;
        }

        let node_count = self.nodes.len();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            let group = self
                .group_resolver
                .as_ref()
                .map(|resolve| resolve(node.instance_id))
                .unwrap_or(ANY_GROUP);

            self.context.event_in_mut().reset();
            fill_event_buffer_for_group(&mut self.pending_events, &mut self.context, group);

            let status = node.instance.process(&mut self.context);
            if !status.is_ok() {
                return status;
            }

            if self.context.event_out().position() > 0 {
                if let Some(callback) = self.event_output_callback.as_mut() {
                    callback(node.instance_id, self.context.event_out().as_slice());
                }
                self.context.event_out_mut().reset();
            }

            if idx + 1 < node_count {
                self.context.advance_to_next_node();
            }
        }

        StatusCode::Ok
    }
}

/// Moves every pending UMP whose group matches (or `group == ANY_GROUP`)
/// into `ctx.eventIn`, up to capacity, removing matched entries from
/// `pending` and preserving relative order among the survivors.
fn fill_event_buffer_for_group(pending: &mut Vec<ScheduledUmp>, context: &mut AudioProcessContext, group: u8) {
    let mut i = 0;
    while i < pending.len() {
        if group != ANY_GROUP && pending[i].group() != group {
            i += 1;
            continue;
        }
        if !context.event_in_mut().push_bytes(pending[i].as_slice()) {
            break;
        }
        pending.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ConfigurationRequest;
    use crate::process::context::TrackContext;
    use crate::process::queue::event_queue;

    struct IdentityInstance;

    impl PluginInstance for IdentityInstance {
        fn configure(&mut self, _request: &ConfigurationRequest) -> StatusCode {
            StatusCode::Ok
        }
        fn start_processing(&mut self) -> StatusCode {
            StatusCode::Ok
        }
        fn stop_processing(&mut self) -> StatusCode {
            StatusCode::Ok
        }
        fn process(&mut self, context: &mut AudioProcessContext) -> StatusCode {
            for bus in 0..context.output_bus_count().min(context.input_bus_count()) {
                for ch in 0..context.channel_count(bus) {
                    context.copy_bus_channel(bus, ch);
                }
            }
            StatusCode::Ok
        }
    }

    #[test]
    fn two_identity_nodes_chain_without_altering_audio() {
        let mut context = AudioProcessContext::new(256, TrackContext::new(48000.0));
        context.configure_main_bus(1, 1, 4);
        context.set_frame_count(4);
        {
            let input = &mut context;
            // Seed the first node's input directly; in a real host this
            // comes from the device's input bus.
            input.output_channel_mut(0, 0).unwrap().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        }
        // Copy the seeded output into what will become the chain's first
        // `audio_in`, same as a device driver priming the first node.
        context.advance_to_next_node();

        let (_producer, consumer) = event_queue(16);
        let mut track = Track::new(context, consumer);
        track.add_node(Node::new(1, Box::new(IdentityInstance)));
        track.add_node(Node::new(2, Box::new(IdentityInstance)));

        let status = track.process_audio();
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(track.context().input_channel(0, 0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn group_filter_only_delivers_matching_events() {
        let mut context = AudioProcessContext::new(256, TrackContext::new(48000.0));
        context.configure_main_bus(0, 0, 1);
        let (mut producer, consumer) = event_queue(16);

        let group0_note_on = {
            let word0 = (0x4u32 << 28) | (60u32 << 8);
            let mut bytes = word0.to_be_bytes().to_vec();
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes
        };
        let group1_note_on = {
            let word0 = (0x4u32 << 28) | (1u32 << 24) | (60u32 << 8);
            let mut bytes = word0.to_be_bytes().to_vec();
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes
        };
        producer.schedule_events(0, &group0_note_on);
        producer.schedule_events(0, &group1_note_on);

        let mut track = Track::new(context, consumer);
        track.add_node(Node::new(7, Box::new(IdentityInstance)));
        track.set_group_resolver(Box::new(|_instance_id| 0));

        track.process_audio();

        // Only the group-0 event should have been delivered and consumed;
        // the group-1 event stays pending for a future block.
        assert_eq!(track.pending_events.len(), 1);
        assert_eq!(track.pending_events[0].group(), 1);
    }
}
