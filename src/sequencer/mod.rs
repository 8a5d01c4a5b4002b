//! C10 — the top-level engine: an ordered set of tracks driven by one
//! master clock.
//!
//! Grounded on `AudioPluginSequencer.cpp`'s device-facing wrapper and on
//! §4.10's operation list; `SequencerEngine` itself is not a standalone
//! header in the source this was distilled from; its shape here is
//! synthesized from that operation list plus the [`crate::graph::Track`]
//! and [`crate::instance::state_machine::InstancingStateMachine`] APIs
//! already built for C9/C6. New-plugin attachment completes off the audio
//! thread (instancing may load a library, run a plugin's constructor,
//! etc.) and hands the finished [`crate::graph::Node`] back through an
//! `mpsc` channel drained at the top of `process_audio`, the same
//! non-blocking handoff idiom as [`crate::process::queue`]'s SPSC queue.

pub mod offline;

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;

use crate::catalog::PluginDescriptor;
use crate::event_loop::EventLoop;
use crate::format::{HostPolicy, PluginFormat};
use crate::graph::{Node, Track};
use crate::instance::state_machine::InstancingStateMachine;
use crate::instance::{ConfigurationRequest, PluginInstance};
use crate::process::context::{AudioProcessContext, TrackContext};
use crate::process::queue::{EventQueueProducer, event_queue};
use crate::status::StatusCode;

/// Sample-accurate transport state shared by every track.
#[derive(Debug, Clone)]
pub struct MasterClock {
    pub sample_rate: f64,
    pub tempo_bpm: f64,
    pub playhead_samples: u64,
    pub is_playing: bool,
    pub loop_enabled: bool,
    pub loop_start_samples: u64,
    pub loop_end_samples: u64,
}

impl MasterClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            tempo_bpm: 120.0,
            playhead_samples: 0,
            is_playing: false,
            loop_enabled: false,
            loop_start_samples: 0,
            loop_end_samples: 0,
        }
    }

    fn advance(&mut self, frames: u64) {
        if !self.is_playing {
            return;
        }
        self.playhead_samples += frames;
        if self.loop_enabled && self.loop_end_samples > self.loop_start_samples
            && self.playhead_samples >= self.loop_end_samples
        {
            self.playhead_samples = self.loop_start_samples;
        }
    }
}

struct TrackEntry {
    track: Track,
    producer: EventQueueProducer,
}

enum PendingInstancing {
    Attached { track_index: usize, instance_id: i32, instance: Box<dyn PluginInstance> },
    Failed { instance_id: i32 },
}

/// Owns the track list, the master clock, and the offline-rendering flag
/// (§4.10). `process_audio` is the only method meant to run on the audio
/// thread.
pub struct SequencerEngine {
    tracks: Vec<TrackEntry>,
    clock: MasterClock,
    default_input_channels: usize,
    default_output_channels: usize,
    buffer_size: usize,
    event_buffer_capacity: usize,
    offline: bool,
    event_loop: Arc<dyn EventLoop>,
    policy: HostPolicy,
    pending_tx: Sender<PendingInstancing>,
    pending_rx: Receiver<PendingInstancing>,
    in_flight: Vec<(i32, Arc<InstancingStateMachine>)>,
    next_instance_id: i32,
}

impl SequencerEngine {
    pub fn new(sample_rate: f64, buffer_size: usize, event_loop: Arc<dyn EventLoop>) -> Self {
        let (pending_tx, pending_rx) = channel();
        Self {
            tracks: Vec::new(),
            clock: MasterClock::new(sample_rate),
            default_input_channels: 2,
            default_output_channels: 2,
            buffer_size,
            event_buffer_capacity: 4096,
            offline: false,
            event_loop,
            policy: HostPolicy::new(),
            pending_tx,
            pending_rx,
            in_flight: Vec::new(),
            next_instance_id: 1,
        }
    }

    pub fn set_default_channels(&mut self, input_channels: usize, output_channels: usize) {
        self.default_input_channels = input_channels;
        self.default_output_channels = output_channels;
    }

    pub fn policy(&self) -> &HostPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut HostPolicy {
        &mut self.policy
    }

    pub fn clock(&self) -> &MasterClock {
        &self.clock
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index).map(|e| &e.track)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index).map(|e| &mut e.track)
    }

    /// Appends a track with no nodes, sized from the engine's default
    /// channel counts and buffer size. Returns its index.
    pub fn add_empty_track(&mut self) -> usize {
        let mut context = AudioProcessContext::new(self.event_buffer_capacity, TrackContext::new(self.clock.sample_rate));
        context.configure_main_bus(self.default_input_channels, self.default_output_channels, self.buffer_size);
        let (producer, consumer) = event_queue(256);
        self.tracks.push(TrackEntry { track: Track::new(context, consumer), producer });
        self.tracks.len() - 1
    }

    pub fn remove_track(&mut self, index: usize) -> bool {
        if index < self.tracks.len() {
            self.tracks.remove(index);
            true
        } else {
            false
        }
    }

    /// Schedules raw UMP bytes onto a track's event queue (C8); returns how
    /// many UMPs were enqueued.
    pub fn schedule_events(&mut self, track_index: usize, timestamp: u64, bytes: &[u8]) -> usize {
        self.tracks
            .get_mut(track_index)
            .map(|entry| entry.producer.schedule_events(timestamp, bytes))
            .unwrap_or(0)
    }

    /// Instantiates `descriptor` through `format` and, on success, appends
    /// it as a new node on `track_index`. Asynchronous: `callback` fires
    /// with the new node's instance id, or an error carried from either
    /// instancing (§7 kind 1) or an invalid `track_index`.
    pub fn add_plugin_to_track(
        &mut self,
        track_index: usize,
        format: Arc<dyn PluginFormat>,
        descriptor: PluginDescriptor,
        callback: impl FnOnce(Result<i32, String>) + Send + 'static,
    ) {
        if track_index >= self.tracks.len() {
            callback(Err(format!("no such track: {track_index}")));
            return;
        }

        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;

        let options = ConfigurationRequest::new(self.clock.sample_rate, self.buffer_size);
        let ui_thread_requirement = self.policy.resolve(
            descriptor.format,
            &descriptor.plugin_id,
            format.default_ui_thread_requirement(),
        );
        let machine = InstancingStateMachine::new(self.event_loop.clone());
        self.in_flight.push((instance_id, machine.clone()));

        let machine_for_callback = machine.clone();
        let tx = self.pending_tx.clone();
        machine.make_alive(format, descriptor, options, ui_thread_requirement, move |result| {
            match result {
                Ok(()) => match machine_for_callback.take_instance() {
                    Some(instance) => {
                        let _ = tx.send(PendingInstancing::Attached { track_index, instance_id, instance });
                        callback(Ok(instance_id));
                    }
                    None => {
                        let _ = tx.send(PendingInstancing::Failed { instance_id });
                        callback(Err("instance unavailable after successful instancing".to_string()));
                    }
                },
                Err(error) => {
                    let _ = tx.send(PendingInstancing::Failed { instance_id });
                    callback(Err(error));
                }
            }
        });
    }

    fn drain_pending_instancing(&mut self) {
        while let Ok(pending) = self.pending_rx.try_recv() {
            match pending {
                PendingInstancing::Attached { track_index, instance_id, instance } => {
                    if let Some(entry) = self.tracks.get_mut(track_index) {
                        entry.track.add_node(Node::new(instance_id, instance));
                    }
                    self.in_flight.retain(|(id, _)| *id != instance_id);
                }
                PendingInstancing::Failed { instance_id } => {
                    self.in_flight.retain(|(id, _)| *id != instance_id);
                }
            }
        }
    }

    pub fn playback_position(&mut self, sample: u64) {
        self.clock.playhead_samples = sample;
    }

    pub fn pause_playback(&mut self) {
        self.clock.is_playing = false;
    }

    pub fn resume_playback(&mut self) {
        self.clock.is_playing = true;
    }

    pub fn offline_rendering(&self) -> bool {
        self.offline
    }

    pub fn set_offline_rendering(&mut self, value: bool) {
        self.offline = value;
    }

    /// Drives every track for one block and sums each track's main output
    /// bus into `device_context`'s main output bus. Advances the master
    /// playhead by `device_context.frame_count()` when playing.
    pub fn process_audio(&mut self, device_context: &mut AudioProcessContext) -> StatusCode {
        self.drain_pending_instancing();

        let frames = device_context.frame_count();
        for entry in &mut self.tracks {
            entry.track.context_mut().set_frame_count(frames);
            entry.track.context_mut().track_mut().playhead_samples = self.clock.playhead_samples;
            entry.track.context_mut().track_mut().tempo_bpm = self.clock.tempo_bpm;
            entry.track.context_mut().track_mut().is_playing = self.clock.is_playing;

            let status = entry.track.process_audio();
            if !status.is_ok() {
                return status;
            }
            sum_track_into_device(&entry.track, device_context);
        }

        self.clock.advance(frames as u64);
        StatusCode::Ok
    }
}

fn sum_track_into_device(track: &Track, device_context: &mut AudioProcessContext) {
    let channels = track.context().output_bus_channel_count(0).min(device_context.output_bus_channel_count(0));
    let frames = device_context.frame_count();
    for ch in 0..channels {
        let Some(src) = track.context().output_channel(0, ch) else { continue };
        let Some(dst) = device_context.output_channel_mut(0, ch) else { continue };
        for (d, s) in dst[..frames].iter_mut().zip(src[..frames].iter()) {
            *d += s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PluginFormatKind;
    use crate::event_loop::ThreadEventLoop;
    use crate::format::{CreateInstanceCallback, ScanConfig, ScanRequiresInstantiation, UiThreadRequirement};
    use std::sync::Mutex;

    struct GainInstance {
        gain: f32,
    }

    impl PluginInstance for GainInstance {
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
                    let frames = context.frame_count();
                    if let Some(out) = context.output_channel_mut(bus, ch) {
                        for sample in out[..frames].iter_mut() {
                            *sample *= self.gain;
                        }
                    }
                }
            }
            StatusCode::Ok
        }
    }

    struct InstantFormat;

    impl PluginFormat for InstantFormat {
        fn name(&self) -> &'static str {
            "synthetic-instant"
        }
        fn kind(&self) -> PluginFormatKind {
            PluginFormatKind::Clap
        }
        fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation {
            ScanRequiresInstantiation::Never
        }
        fn scan(&self, _config: &ScanConfig) -> Vec<PluginDescriptor> {
            Vec::new()
        }
        fn default_ui_thread_requirement(&self) -> UiThreadRequirement {
            UiThreadRequirement::NONE
        }
        fn create_instance(
            &self,
            _descriptor: &PluginDescriptor,
            _options: &ConfigurationRequest,
            callback: CreateInstanceCallback,
        ) {
            callback(Ok(Box::new(GainInstance { gain: 0.5 })));
        }
    }

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor {
            format: PluginFormatKind::Clap,
            plugin_id: "synthetic.gain".into(),
            bundle_path: None,
            display_name: "Synthetic Gain".into(),
            vendor_name: String::new(),
            product_url: String::new(),
        }
    }

    #[test]
    fn add_plugin_to_track_attaches_node_before_next_process_audio() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let mut engine = SequencerEngine::new(48000.0, 8, event_loop);
        engine.set_default_channels(1, 1);
        let track_index = engine.add_empty_track();

        let result = Arc::new(Mutex::new(None));
        let result_setter = result.clone();
        engine.add_plugin_to_track(track_index, Arc::new(InstantFormat), descriptor(), move |r| {
            *result_setter.lock().unwrap() = Some(r);
        });
        assert!(matches!(*result.lock().unwrap(), Some(Ok(_))));

        let mut device_context = AudioProcessContext::new(64, TrackContext::new(48000.0));
        device_context.configure_main_bus(1, 1, 8);
        device_context.set_frame_count(8);
        engine.track_mut(track_index).unwrap().context_mut().set_frame_count(8);
        engine
            .track_mut(track_index)
            .unwrap()
            .context_mut()
            .output_channel_mut(0, 0)
            .unwrap()
            .copy_from_slice(&[2.0; 8]);
        engine.track_mut(track_index).unwrap().context_mut().advance_to_next_node();

        let status = engine.process_audio(&mut device_context);
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(engine.track(track_index).unwrap().nodes().len(), 1);
        assert_eq!(device_context.output_channel(0, 0).unwrap(), &[1.0; 8]);
    }

    #[test]
    fn process_audio_advances_playhead_only_while_playing() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let mut engine = SequencerEngine::new(48000.0, 16, event_loop);
        let mut device_context = AudioProcessContext::new(64, TrackContext::new(48000.0));
        device_context.configure_main_bus(0, 0, 16);
        device_context.set_frame_count(16);

        engine.process_audio(&mut device_context);
        assert_eq!(engine.clock().playhead_samples, 0);

        engine.resume_playback();
        engine.process_audio(&mut device_context);
        assert_eq!(engine.clock().playhead_samples, 16);

        engine.pause_playback();
        engine.process_audio(&mut device_context);
        assert_eq!(engine.clock().playhead_samples, 16);
    }
}
