//! C7 — the zero-allocation per-block audio/event container.
//!
//! Grounded on `processing-context.hpp`'s `EventSequence`, `MasterContext`,
//! `TrackContext`, and `AudioProcessContext`, including
//! `advanceToNextNode`'s exact copy semantics. All allocation happens at
//! setup time (`configure_main_bus`/`add_audio_in`/`add_audio_out`); no
//! method reachable from `process()` allocates.

/// A single planar audio bus: one contiguous allocation, channel `c`'s
/// samples live at `[c * capacity_frames .. (c + 1) * capacity_frames]` —
/// the layout shared verbatim with VST3/AU/LV2/CLAP buffer conventions.
#[derive(Debug, Clone)]
struct Bus {
    channels: usize,
    capacity_frames: usize,
    data: Vec<f32>,
}

impl Bus {
    fn new(channels: usize, capacity_frames: usize) -> Self {
        Self {
            channels,
            capacity_frames,
            data: vec![0.0; channels * capacity_frames],
        }
    }

    fn channel(&self, ch: usize) -> Option<&[f32]> {
        if ch >= self.channels {
            return None;
        }
        let start = ch * self.capacity_frames;
        Some(&self.data[start..start + self.capacity_frames])
    }

    fn channel_mut(&mut self, ch: usize) -> Option<&mut [f32]> {
        if ch >= self.channels {
            return None;
        }
        let start = ch * self.capacity_frames;
        Some(&mut self.data[start..start + self.capacity_frames])
    }

    fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

/// Fixed-capacity byte buffer addressed in UMP-aligned (4-byte) chunks.
/// Invariant: `0 <= position <= capacity` and `position` is always on a
/// word boundary.
#[derive(Debug, Clone)]
pub struct EventSequence {
    buffer: Vec<u8>,
    position: usize,
}

impl EventSequence {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity_bytes],
            position: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Appends raw bytes (already UMP-framed) at the write cursor. Fails
    /// only when capacity would be exceeded, matching
    /// `scheduleEvents`'s "fails only if capacity is exhausted" contract.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.position + bytes.len() > self.buffer.len() {
            return false;
        }
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        true
    }

}

/// Transport/tempo state shared by every node on a track.
#[derive(Debug, Clone)]
pub struct TrackContext {
    pub sample_rate: f64,
    pub tempo_bpm: f64,
    pub time_signature_numerator: u32,
    pub time_signature_denominator: u32,
    pub playhead_samples: u64,
    /// Delta Clockstamp Ticks Per Quarter-note, updated by the UMP
    /// dispatcher's DCTPQ utility message.
    pub dctpq: u32,
    pub is_playing: bool,
}

impl TrackContext {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            tempo_bpm: 120.0,
            time_signature_numerator: 4,
            time_signature_denominator: 4,
            playhead_samples: 0,
            dctpq: 960,
            is_playing: false,
        }
    }
}

/// Owns every input/output audio bus plus the input/output event
/// sequences for one track, reused every block.
pub struct AudioProcessContext {
    input_buses: Vec<Bus>,
    output_buses: Vec<Bus>,
    event_in: EventSequence,
    event_out: EventSequence,
    frame_count: usize,
    track: TrackContext,
}

impl AudioProcessContext {
    pub fn new(event_capacity_bytes: usize, track: TrackContext) -> Self {
        Self {
            input_buses: Vec::new(),
            output_buses: Vec::new(),
            event_in: EventSequence::new(event_capacity_bytes),
            event_out: EventSequence::new(event_capacity_bytes),
            frame_count: 0,
            track,
        }
    }

    /// Sets up bus 0 on each side. Called once, before processing begins.
    pub fn configure_main_bus(&mut self, in_channels: usize, out_channels: usize, capacity_frames: usize) {
        self.input_buses.clear();
        self.output_buses.clear();
        self.input_buses.push(Bus::new(in_channels, capacity_frames));
        self.output_buses.push(Bus::new(out_channels, capacity_frames));
        self.frame_count = capacity_frames;
    }

    pub fn add_audio_in(&mut self, channels: usize, capacity_frames: usize) -> usize {
        self.input_buses.push(Bus::new(channels, capacity_frames));
        self.input_buses.len() - 1
    }

    pub fn add_audio_out(&mut self, channels: usize, capacity_frames: usize) -> usize {
        self.output_buses.push(Bus::new(channels, capacity_frames));
        self.output_buses.len() - 1
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Sets the active window length for this block. `n` must not exceed
    /// the capacity established by `configure_main_bus`/`add_audio_*`.
    pub fn set_frame_count(&mut self, n: usize) {
        debug_assert!(
            self.input_buses.iter().chain(&self.output_buses).all(|b| n <= b.capacity_frames),
            "frame count exceeds bus capacity"
        );
        self.frame_count = n;
    }

    pub fn input_bus_count(&self) -> usize {
        self.input_buses.len()
    }

    pub fn output_bus_count(&self) -> usize {
        self.output_buses.len()
    }

    /// The channel count shared by input bus `bus` and output bus `bus`;
    /// `0` if either side lacks that bus. Plugin drivers use this to
    /// bound their per-channel copy loops.
    pub fn channel_count(&self, bus: usize) -> usize {
        match (self.input_buses.get(bus), self.output_buses.get(bus)) {
            (Some(i), Some(o)) => i.channels.min(o.channels),
            _ => 0,
        }
    }

    pub fn input_channel(&self, bus: usize, ch: usize) -> Option<&[f32]> {
        self.input_buses.get(bus).and_then(|b| b.channel(ch))
    }

    pub fn output_channel(&self, bus: usize, ch: usize) -> Option<&[f32]> {
        self.output_buses.get(bus).and_then(|b| b.channel(ch))
    }

    pub fn output_channel_mut(&mut self, bus: usize, ch: usize) -> Option<&mut [f32]> {
        self.output_buses.get_mut(bus).and_then(|b| b.channel_mut(ch))
    }

    /// Channel count of input bus `bus` on its own, `0` if absent.
    pub fn input_bus_channel_count(&self, bus: usize) -> usize {
        self.input_buses.get(bus).map(|b| b.channels).unwrap_or(0)
    }

    /// Channel count of output bus `bus` on its own, `0` if absent. Unlike
    /// [`AudioProcessContext::channel_count`], this does not clamp against
    /// the matching input bus — a device's output width can legitimately
    /// differ from a track's.
    pub fn output_bus_channel_count(&self, bus: usize) -> usize {
        self.output_buses.get(bus).map(|b| b.channels).unwrap_or(0)
    }

    /// Copies `frame_count()` samples of `input[bus][ch]` into
    /// `output[bus][ch]`. A disjoint-field borrow of `self` (not two
    /// sequential calls into `&self`/`&mut self`) so plugin drivers can
    /// do identity passthrough without holding two context borrows at
    /// once.
    pub fn copy_bus_channel(&mut self, bus: usize, ch: usize) -> bool {
        let AudioProcessContext { input_buses, output_buses, frame_count, .. } = self;
        let (Some(input), Some(output)) = (input_buses.get(bus), output_buses.get_mut(bus)) else {
            return false;
        };
        let (Some(src), Some(dst)) = (input.channel(ch), output.channel_mut(ch)) else {
            return false;
        };
        let n = *frame_count;
        dst[..n].copy_from_slice(&src[..n]);
        true
    }

    /// Zeroes every output bus and resets `eventOut`'s cursor to 0.
    pub fn clear_audio_outputs(&mut self) {
        for bus in &mut self.output_buses {
            bus.clear();
        }
        self.event_out.reset();
    }

    /// Copies `audio_out -> audio_in` bus-by-bus up to the common
    /// channel/frame count, zeroes the new outputs, moves `eventOut`
    /// bytes into `eventIn`, and resets `eventOut`. This is how the
    /// graph chains nodes without allocation.
    pub fn advance_to_next_node(&mut self) {
        let n = self.frame_count;
        for (out_bus, in_bus) in self.output_buses.iter().zip(self.input_buses.iter_mut()) {
            let common_channels = out_bus.channels.min(in_bus.channels);
            for ch in 0..common_channels {
                let frames = n.min(out_bus.capacity_frames).min(in_bus.capacity_frames);
                let src = out_bus.channel(ch).unwrap();
                in_bus.channel_mut(ch).unwrap()[..frames].copy_from_slice(&src[..frames]);
            }
        }
        for bus in &mut self.output_buses {
            bus.clear();
        }
        let AudioProcessContext { event_out, event_in, .. } = self;
        event_in.buffer[..event_out.position].copy_from_slice(&event_out.buffer[..event_out.position]);
        event_in.position = event_out.position;
        event_out.position = 0;
    }

    pub fn event_in(&self) -> &EventSequence {
        &self.event_in
    }

    pub fn event_in_mut(&mut self) -> &mut EventSequence {
        &mut self.event_in
    }

    pub fn event_out(&self) -> &EventSequence {
        &self.event_out
    }

    pub fn event_out_mut(&mut self) -> &mut EventSequence {
        &mut self.event_out
    }

    pub fn track(&self) -> &TrackContext {
        &self.track
    }

    pub fn track_mut(&mut self) -> &mut TrackContext {
        &mut self.track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_to_next_node_copies_and_zeroes() {
        let mut ctx = AudioProcessContext::new(64, TrackContext::new(48000.0));
        ctx.configure_main_bus(1, 1, 4);
        ctx.set_frame_count(4);

        {
            let out = ctx.output_channel_mut(0, 0).unwrap();
            out.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        }
        ctx.event_out_mut().push_bytes(&[0xAA, 0xBB, 0xCC, 0xDD]);

        ctx.advance_to_next_node();

        assert_eq!(ctx.input_channel(0, 0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ctx.output_channel_mut(0, 0).unwrap(), &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ctx.event_in().as_slice(), &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(ctx.event_out().position(), 0);
    }

    #[test]
    fn clear_audio_outputs_zeroes_and_resets_event_cursor() {
        let mut ctx = AudioProcessContext::new(64, TrackContext::new(48000.0));
        ctx.configure_main_bus(1, 2, 4);
        ctx.set_frame_count(4);
        ctx.output_channel_mut(0, 0).unwrap().copy_from_slice(&[9.0; 4]);
        ctx.event_out_mut().push_bytes(&[1, 2, 3, 4]);

        ctx.clear_audio_outputs();

        assert_eq!(ctx.output_channel_mut(0, 0).unwrap(), &[0.0; 4]);
        assert_eq!(ctx.event_out().position(), 0);
    }

    #[test]
    fn event_sequence_rejects_overflow() {
        let mut seq = EventSequence::new(4);
        assert!(seq.push_bytes(&[1, 2, 3, 4]));
        assert!(!seq.push_bytes(&[5]));
        assert_eq!(seq.position(), 4);
    }
}
