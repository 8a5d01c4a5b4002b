//! §4.11 — non-realtime rendering of a sequencer's output straight to a
//! WAV file.
//!
//! Grounded on `OfflineRenderer.cpp`'s six-step algorithm: validate
//! settings, compute the hard stop sample, snapshot and mutate the
//! engine's transport, open a writer, loop blocks (cancellation check,
//! `processAudio`, peak-scan silence accumulator, write, progress
//! callback), then restore the transport and remove a partial file on
//! cancellation or error.

use std::path::PathBuf;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::SequencerEngine;
use crate::process::context::{AudioProcessContext, TrackContext};

#[derive(Debug, Clone)]
pub struct OfflineRenderSettings {
    pub output_path: PathBuf,
    pub start_sample: u64,
    pub duration_samples: u64,
    pub buffer_size: usize,
    pub channel_count: usize,
    /// How long a trailing run of near-silent blocks must last before
    /// rendering stops early. `0.0` disables the check.
    pub silence_hold_seconds: f64,
    /// Peak amplitude, in dB, below which a block counts toward the
    /// silence-hold early-stop accumulator.
    pub threshold_db: f64,
    /// Capacity, in bytes, of the UMP buffer backing the renderer's
    /// per-block `AudioProcessContext`.
    pub ump_buffer_size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct OfflineRenderProgress {
    pub rendered_samples: u64,
    pub total_samples: u64,
}

pub type OfflineProgressCallback = Box<dyn FnMut(OfflineRenderProgress) + Send>;
/// Polled once per block; returning `true` stops the render early with
/// `canceled = true`.
pub type OfflineCancelPredicate = Box<dyn FnMut() -> bool + Send>;

#[derive(Debug, Clone)]
pub struct OfflineRenderResult {
    pub success: bool,
    pub canceled: bool,
    pub rendered_seconds: f64,
    pub error_message: Option<String>,
}

/// Renders `settings.duration_samples` of `engine`'s output to
/// `settings.output_path`, restoring the engine's transport state
/// (playhead, play/pause, offline flag) before returning regardless of
/// outcome.
pub fn render_offline(
    engine: &mut SequencerEngine,
    settings: OfflineRenderSettings,
    mut progress: Option<OfflineProgressCallback>,
    mut cancel: Option<OfflineCancelPredicate>,
) -> OfflineRenderResult {
    if settings.duration_samples == 0 || settings.channel_count == 0 || settings.buffer_size == 0 {
        return OfflineRenderResult {
            success: false,
            canceled: false,
            rendered_seconds: 0.0,
            error_message: Some("invalid render settings".to_string()),
        };
    }

    let hard_stop = settings.start_sample.saturating_add(settings.duration_samples);

    let snapshot_playhead = engine.clock.playhead_samples;
    let snapshot_is_playing = engine.clock.is_playing;
    let snapshot_offline = engine.offline;

    engine.offline = true;
    engine.clock.is_playing = true;
    engine.clock.playhead_samples = settings.start_sample;

    let result = render_blocks(engine, &settings, hard_stop, &mut progress, &mut cancel);

    engine.clock.playhead_samples = snapshot_playhead;
    engine.clock.is_playing = snapshot_is_playing;
    engine.offline = snapshot_offline;

    result
}

fn render_blocks(
    engine: &mut SequencerEngine,
    settings: &OfflineRenderSettings,
    hard_stop: u64,
    progress: &mut Option<OfflineProgressCallback>,
    cancel: &mut Option<OfflineCancelPredicate>,
) -> OfflineRenderResult {
    let spec = WavSpec {
        channels: settings.channel_count as u16,
        sample_rate: engine.clock.sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = match WavWriter::create(&settings.output_path, spec) {
        Ok(writer) => writer,
        Err(error) => {
            return OfflineRenderResult {
                success: false,
                canceled: false,
                rendered_seconds: 0.0,
                error_message: Some(format!("failed to open output file: {error}")),
            };
        }
    };

    let mut device_context =
        AudioProcessContext::new(settings.ump_buffer_size, TrackContext::new(engine.clock.sample_rate));
    device_context.configure_main_bus(0, settings.channel_count, settings.buffer_size);

    let silence_threshold = 10f32.powf((settings.threshold_db / 20.0) as f32);
    let silence_hold_samples = (settings.silence_hold_seconds * engine.clock.sample_rate).max(0.0) as u64;
    let mut silent_run_samples: u64 = 0;
    let mut rendered: u64 = 0;
    let mut canceled = false;
    let mut error_message = None;

    while engine.clock.playhead_samples < hard_stop {
        if let Some(predicate) = cancel.as_mut() {
            if predicate() {
                canceled = true;
                break;
            }
        }

        let frames = (hard_stop - engine.clock.playhead_samples).min(settings.buffer_size as u64) as usize;
        device_context.set_frame_count(frames);
        device_context.clear_audio_outputs();

        let status = engine.process_audio(&mut device_context);
        if !status.is_ok() {
            error_message = Some(format!("processAudio returned {status}"));
            break;
        }

        let mut block_peak = 0.0f32;
        for frame in 0..frames {
            for ch in 0..settings.channel_count {
                let sample = device_context.output_channel(0, ch).map(|c| c[frame]).unwrap_or(0.0);
                block_peak = block_peak.max(sample.abs());
                if writer.write_sample(sample).is_err() {
                    error_message = Some("failed to write samples to output file".to_string());
                }
            }
        }
        if error_message.is_some() {
            break;
        }

        rendered += frames as u64;

        if silence_hold_samples > 0 {
            if block_peak < silence_threshold {
                silent_run_samples += frames as u64;
                if silent_run_samples >= silence_hold_samples {
                    break;
                }
            } else {
                silent_run_samples = 0;
            }
        }

        if let Some(callback) = progress.as_mut() {
            callback(OfflineRenderProgress { rendered_samples: rendered, total_samples: settings.duration_samples });
        }
    }

    let rendered_seconds = rendered as f64 / engine.clock.sample_rate;
    let success = error_message.is_none() && !canceled;

    if success {
        if let Err(error) = writer.finalize() {
            return OfflineRenderResult {
                success: false,
                canceled: false,
                rendered_seconds,
                error_message: Some(format!("failed to finalize output file: {error}")),
            };
        }
    } else {
        let _ = writer.finalize();
        let _ = std::fs::remove_file(&settings.output_path);
    }

    OfflineRenderResult { success, canceled, rendered_seconds, error_message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::ThreadEventLoop;
    use std::sync::{Arc, Mutex};

    #[test]
    fn completes_and_writes_expected_sample_count() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let mut engine = SequencerEngine::new(8000.0, 4, event_loop);
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("render.wav");

        let settings = OfflineRenderSettings {
            output_path: output_path.clone(),
            start_sample: 0,
            duration_samples: 16,
            buffer_size: 4,
            channel_count: 1,
            silence_hold_seconds: 0.0,
            threshold_db: -80.0,
            ump_buffer_size: 64,
        };

        let result = render_offline(&mut engine, settings, None, None);

        assert!(result.success);
        assert!(!result.canceled);
        assert_eq!(result.rendered_seconds, 16.0 / 8000.0);

        let reader = hound::WavReader::open(&output_path).unwrap();
        assert_eq!(reader.duration(), 16);
    }

    #[test]
    fn cancellation_removes_partial_file_and_reports_canceled() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let mut engine = SequencerEngine::new(48000.0, 4, event_loop);
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("render.wav");

        let settings = OfflineRenderSettings {
            output_path: output_path.clone(),
            start_sample: 0,
            duration_samples: 48000 * 10,
            buffer_size: 4,
            channel_count: 1,
            silence_hold_seconds: 0.0,
            threshold_db: -80.0,
            ump_buffer_size: 64,
        };

        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        let cancel: OfflineCancelPredicate = Box::new(move || {
            let mut n = calls_clone.lock().unwrap();
            *n += 1;
            *n > 3
        });

        let result = render_offline(&mut engine, settings, None, Some(cancel));

        assert!(result.canceled);
        assert!(!result.success);
        assert!(result.rendered_seconds < 10.0);
        assert!(!output_path.exists());
    }

    #[test]
    fn restores_transport_state_after_rendering() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let mut engine = SequencerEngine::new(8000.0, 4, event_loop);
        engine.playback_position(1234);
        engine.pause_playback();
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("render.wav");

        let settings = OfflineRenderSettings {
            output_path,
            start_sample: 0,
            duration_samples: 8,
            buffer_size: 4,
            channel_count: 1,
            silence_hold_seconds: 0.0,
            threshold_db: -80.0,
            ump_buffer_size: 64,
        };
        render_offline(&mut engine, settings, None, None);

        assert_eq!(engine.clock().playhead_samples, 1234);
        assert!(!engine.clock().is_playing);
        assert!(!engine.offline_rendering());
    }
}
