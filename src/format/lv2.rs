//! LV2 format driver.
//!
//! Grounded on the LV2 hosting backend this crate's native-loading idiom
//! follows: a `lilv::World` walk of installed TTL manifests for discovery
//! (no library load), and `lilv::plugin::Plugin::instantiate` +
//! `connect_port_mut` for hosting.

use lilv::World;

use crate::catalog::{PluginDescriptor, PluginFormatKind};
use crate::format::{
    CreateInstanceCallback, DefaultExtensibility, Extensibility, PluginFormat, ScanConfig,
    ScanRequiresInstantiation, UiThreadRequirement,
};
use crate::instance::{
    AudioBusDefinition, AudioBuses, BusRole, ConfigurationRequest, PluginInstance, SampleDataType,
};
use crate::process::context::AudioProcessContext;
use crate::status::StatusCode;

const PROVIDED_FEATURES: &[&str] = &["http://lv2plug.in/ns/ext/urid#map"];

pub struct Lv2Format;

impl Lv2Format {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Lv2Format {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginFormat for Lv2Format {
    fn name(&self) -> &'static str {
        "LV2"
    }

    fn kind(&self) -> PluginFormatKind {
        PluginFormatKind::Lv2
    }

    fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation {
        ScanRequiresInstantiation::Never
    }

    fn scan(&self, _config: &ScanConfig) -> Vec<PluginDescriptor> {
        let world = World::with_load_all();
        let input_class = world.new_uri("http://lv2plug.in/ns/lv2core#InputPort");
        let output_class = world.new_uri("http://lv2plug.in/ns/lv2core#OutputPort");
        let audio_class = world.new_uri("http://lv2plug.in/ns/lv2core#AudioPort");

        let mut out = Vec::new();
        for plugin in world.plugins().iter() {
            if !plugin.verify() {
                continue;
            }
            let Some(uri) = plugin.uri().as_uri().map(str::to_string) else { continue };
            let Some(name) = plugin.name().as_str().map(str::to_string) else { continue };
            let author = plugin.author_name().and_then(|n| n.as_str().map(String::from));

            let required_features: Vec<String> = plugin
                .required_features()
                .iter()
                .filter_map(|n| n.as_uri().map(String::from))
                .collect();
            let compatible = required_features
                .iter()
                .all(|req| PROVIDED_FEATURES.iter().any(|p| p == req));
            if !compatible {
                log::debug!("LV2: {uri} requires unsupported features, excluding");
                continue;
            }

            let _ = (&input_class, &output_class, &audio_class);
            out.push(PluginDescriptor {
                format: PluginFormatKind::Lv2,
                plugin_id: uri,
                bundle_path: None,
                display_name: name,
                vendor_name: author.unwrap_or_default(),
                product_url: String::new(),
            });
        }
        out.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
        log::info!("LV2: found {} plugins", out.len());
        out
    }

    fn default_ui_thread_requirement(&self) -> UiThreadRequirement {
        UiThreadRequirement::NONE
    }

    fn extensibility(&self) -> Option<&dyn Extensibility> {
        Some(&DefaultExtensibility)
    }

    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        options: &ConfigurationRequest,
        callback: CreateInstanceCallback,
    ) {
        let descriptor = descriptor.clone();
        let sample_rate = options.sample_rate;
        std::thread::spawn(move || {
            let result = Lv2PluginInstance::new(&descriptor, sample_rate)
                .map(|inst| Box::new(inst) as Box<dyn PluginInstance>)
                .ok_or_else(|| format!("failed to instantiate LV2 plugin {}", descriptor.plugin_id));
            callback(result);
        });
    }
}

/// Owns the `lilv::World` alongside the active instance: dropping the
/// world before the instance causes use-after-free in the plugin's
/// `run()`/`deactivate()`, so both live in the same struct.
pub struct Lv2PluginInstance {
    _world: World,
    instance: lilv::instance::ActiveInstance,
    audio_input_ports: Vec<u32>,
    audio_output_ports: Vec<u32>,
    /// Port index of each control port, parallel to `control_values`.
    control_port_indices: Vec<u32>,
    /// Connected via `connect_port_mut` once at construction; the `Vec`
    /// never reallocates afterward so the pointers stay valid.
    control_values: Vec<f32>,
    bus_defs_in: Vec<AudioBusDefinition>,
    bus_defs_out: Vec<AudioBusDefinition>,
    processing: bool,
}

unsafe impl Send for Lv2PluginInstance {}

impl Lv2PluginInstance {
    fn new(descriptor: &PluginDescriptor, sample_rate: f64) -> Option<Self> {
        let world = World::with_load_all();
        let uri = world.new_uri(&descriptor.plugin_id);
        let plugin = world.plugins().iter().find(|p| p.uri().as_uri() == uri.as_uri())?;

        let port_ranges = plugin.port_ranges_float();
        let mut audio_input_ports = Vec::new();
        let mut audio_output_ports = Vec::new();
        let mut control_port_indices = Vec::new();
        let mut control_values = Vec::new();

        let input_class = world.new_uri("http://lv2plug.in/ns/lv2core#InputPort");
        let output_class = world.new_uri("http://lv2plug.in/ns/lv2core#OutputPort");
        let audio_class = world.new_uri("http://lv2plug.in/ns/lv2core#AudioPort");
        let control_class = world.new_uri("http://lv2plug.in/ns/lv2core#ControlPort");

        for (i, range) in port_ranges.iter().enumerate() {
            let Some(port) = plugin.port_by_index(i) else { continue };
            let is_audio = port.is_a(&audio_class);
            let is_control = port.is_a(&control_class);
            if is_audio && port.is_a(&input_class) {
                audio_input_ports.push(i as u32);
            } else if is_audio && port.is_a(&output_class) {
                audio_output_ports.push(i as u32);
            } else if is_control {
                control_port_indices.push(i as u32);
                control_values.push(range.default);
            }
        }

        // Safety: instantiate requires valid feature list lifetime for as
        // long as the instance is alive; no extra features beyond the
        // defaults lilv supplies are requested here.
        let instance = unsafe { plugin.instantiate(sample_rate, &[]) }?;
        let mut instance = unsafe { instance.activate() };

        // The Vecs above are fully built and won't reallocate, so these
        // pointers stay valid for the instance's lifetime.
        for (&port_idx, value) in control_port_indices.iter().zip(control_values.iter_mut()) {
            unsafe {
                instance.instance_mut().connect_port_mut(port_idx, value as *mut f32);
            }
        }

        Some(Self {
            _world: world,
            instance,
            audio_input_ports,
            audio_output_ports,
            control_port_indices,
            control_values,
            bus_defs_in: vec![AudioBusDefinition {
                name: "Main In".into(),
                role: BusRole::Main,
                supported_layouts: Vec::new(),
            }],
            bus_defs_out: vec![AudioBusDefinition {
                name: "Main Out".into(),
                role: BusRole::Main,
                supported_layouts: Vec::new(),
            }],
            processing: false,
        })
    }
}

impl PluginInstance for Lv2PluginInstance {
    fn configure(&mut self, request: &ConfigurationRequest) -> StatusCode {
        if request.data_type == SampleDataType::Float64 {
            return StatusCode::UnsupportedChannelLayoutRequested;
        }
        StatusCode::Ok
    }

    fn start_processing(&mut self) -> StatusCode {
        self.processing = true;
        StatusCode::Ok
    }

    fn stop_processing(&mut self) -> StatusCode {
        self.processing = false;
        StatusCode::Ok
    }

    fn process(&mut self, context: &mut AudioProcessContext) -> StatusCode {
        if !self.processing {
            return StatusCode::AlreadyInvalidState;
        }
        let frames = context.frame_count();
        unsafe {
            for (i, &port_idx) in self.audio_input_ports.iter().enumerate() {
                if let Some(channel) = context.input_channel(0, i) {
                    self.instance.instance_mut().connect_port(port_idx, channel.as_ptr());
                }
            }
            for (i, &port_idx) in self.audio_output_ports.iter().enumerate() {
                if let Some(channel) = context.output_channel_mut(0, i) {
                    self.instance.instance_mut().connect_port_mut(port_idx, channel.as_mut_ptr());
                }
            }
            self.instance.run(frames);
        }
        StatusCode::Ok
    }

    fn audio_buses(&self) -> Option<&dyn AudioBuses> {
        Some(self)
    }
}

impl AudioBuses for Lv2PluginInstance {
    fn input_buses(&self) -> &[AudioBusDefinition] {
        &self.bus_defs_in
    }
    fn output_buses(&self) -> &[AudioBusDefinition] {
        &self.bus_defs_out
    }
    fn has_event_inputs(&self) -> bool {
        true
    }
    fn has_event_outputs(&self) -> bool {
        true
    }
    fn main_input_bus_index(&self) -> Option<usize> {
        if !self.audio_input_ports.is_empty() { Some(0) } else { None }
    }
    fn main_output_bus_index(&self) -> Option<usize> {
        Some(0)
    }
}
