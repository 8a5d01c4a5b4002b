//! C5 — the live-plugin handle and its five capability facets.
//!
//! Grounded on `plugin-instance.hpp` and the sibling `plugin-{parameter,
//! presets,states,ui,audio-buses}.hpp` headers. Per §9's "capability
//! facets → trait objects" note, the facets are accessor methods returning
//! `Option<&dyn Trait>` rather than base classes.

pub mod state_machine;

use crate::process::context::AudioProcessContext;
use crate::status::StatusCode;

/// Sample format a plugin is configured to process in. This crate's format
/// backends are all Float32-based (see DESIGN.md Open Question decisions);
/// `Float64` is accepted by the type but rejected by every `configure()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDataType {
    Float32,
    Float64,
}

/// Immutable once passed to [`PluginInstance::configure`].
#[derive(Debug, Clone)]
pub struct ConfigurationRequest {
    pub sample_rate: f64,
    pub buffer_size_in_samples: usize,
    pub offline_mode: bool,
    pub data_type: SampleDataType,
    pub main_input_channels: Option<usize>,
    pub main_output_channels: Option<usize>,
}

impl ConfigurationRequest {
    pub fn new(sample_rate: f64, buffer_size_in_samples: usize) -> Self {
        Self {
            sample_rate,
            buffer_size_in_samples,
            offline_mode: false,
            data_type: SampleDataType::Float32,
            main_input_channels: None,
            main_output_channels: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    Main,
    Aux,
}

#[derive(Debug, Clone)]
pub struct AudioBusDefinition {
    pub name: String,
    pub role: BusRole,
    /// Supported channel counts; empty means unconstrained.
    pub supported_layouts: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct AudioBusConfiguration {
    pub enabled: bool,
    pub channel_count: usize,
}

/// State persistence context, mirroring the original's `StateContextType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateContextType {
    Remember,
    Copyable,
    Preset,
    Project,
}

#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
}

#[derive(Debug, Clone)]
pub struct PresetInfo {
    pub index: u32,
    pub name: String,
    /// Whether `index` is guaranteed to keep referring to the same preset
    /// across plugin reloads (false for e.g. a filesystem-ordered list).
    pub stable: bool,
}

/// `AudioBuses` facet: bus topology is fixed once an instance is created.
pub trait AudioBuses {
    fn input_buses(&self) -> &[AudioBusDefinition];
    fn output_buses(&self) -> &[AudioBusDefinition];
    fn has_event_inputs(&self) -> bool;
    fn has_event_outputs(&self) -> bool;
    /// -1 (via `None`) if there is no main bus on that side.
    fn main_input_bus_index(&self) -> Option<usize>;
    fn main_output_bus_index(&self) -> Option<usize>;
}

/// `Parameters` facet. `note` is `None` for the channel-wide parameter and
/// `Some(note_number)` for per-note addressing; per-note support is
/// optional per format (see DESIGN.md).
pub trait Parameters {
    fn access_requires_main_thread(&self) -> bool;
    fn parameters(&self) -> &[ParameterInfo];
    fn set_parameter(
        &mut self,
        note: Option<u8>,
        index: u32,
        value: f64,
        timestamp: u64,
    ) -> StatusCode;
    fn get_parameter(&self, note: Option<u8>, index: u32) -> Result<f64, StatusCode>;
}

/// `State` facet.
pub trait State {
    fn get_state(
        &self,
        part_id: Option<u32>,
        context: StateContextType,
        include_ui: bool,
    ) -> Result<Vec<u8>, StatusCode>;
    fn set_state(
        &mut self,
        buffer: &[u8],
        part_id: Option<u32>,
        context: StateContextType,
        include_ui: bool,
    ) -> StatusCode;
}

/// `Presets` facet.
pub trait Presets {
    fn preset_count(&self) -> usize;
    fn preset(&self, index: u32) -> Option<PresetInfo>;
    fn load_preset(&mut self, index: u32) -> StatusCode;
}

pub type ResizeHandler = Box<dyn FnMut(u32, u32) + Send>;

/// `UI` facet — embedding is delegated to the host's windowing layer
/// (an external collaborator); this facet only drives the plugin's side
/// of that protocol.
pub trait Ui {
    fn create(
        &mut self,
        floating: bool,
        parent_handle: Option<usize>,
        resize_handler: ResizeHandler,
    ) -> StatusCode;
    fn destroy(&mut self) -> StatusCode;
    fn show(&mut self) -> StatusCode;
    fn hide(&mut self) -> StatusCode;
    fn get_size(&self) -> Option<(u32, u32)>;
    fn set_size(&mut self, width: u32, height: u32) -> StatusCode;
    fn suggest_size(&self) -> Option<(u32, u32)>;
    fn set_scale(&mut self, scale: f64) -> StatusCode;
    fn can_resize(&self) -> bool;
}

/// A live handle to a plugin, obtained through [`crate::format::PluginFormat::create_instance`]
/// and driven by [`state_machine::InstancingStateMachine`].
///
/// `process` is the only method safe to call from the audio thread; it
/// must not be called outside the `[start_processing … stop_processing]`
/// window.
pub trait PluginInstance: Send {
    fn configure(&mut self, request: &ConfigurationRequest) -> StatusCode;
    fn start_processing(&mut self) -> StatusCode;
    fn stop_processing(&mut self) -> StatusCode;
    fn process(&mut self, context: &mut AudioProcessContext) -> StatusCode;

    fn audio_buses(&self) -> Option<&dyn AudioBuses> {
        None
    }
    fn parameters(&mut self) -> Option<&mut dyn Parameters> {
        None
    }
    fn state(&mut self) -> Option<&mut dyn State> {
        None
    }
    fn presets(&mut self) -> Option<&mut dyn Presets> {
        None
    }
    fn ui(&mut self) -> Option<&mut dyn Ui> {
        None
    }
}
