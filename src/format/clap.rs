//! CLAP format driver.
//!
//! Grounded on the CLAP hosting backend this crate's native-loading idiom
//! follows: `dlopen` + `clap_entry` + the plugin factory for discovery, and
//! the factory's `create_plugin` + audio-port/param extension queries for
//! instantiation.

use std::ffi::{CStr, CString, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

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

const SEARCH_DIRS: &[&str] = &[
    "~/.clap",
    "/usr/lib/clap",
    "/usr/local/lib/clap",
    "/usr/lib64/clap",
    "/usr/local/lib64/clap",
];

pub struct ClapFormat;

impl ClapFormat {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClapFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginFormat for ClapFormat {
    fn name(&self) -> &'static str {
        "CLAP"
    }

    fn kind(&self) -> PluginFormatKind {
        PluginFormatKind::Clap
    }

    fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation {
        ScanRequiresInstantiation::ToReadMetadataOnly
    }

    fn scan(&self, config: &ScanConfig) -> Vec<PluginDescriptor> {
        let mut out = Vec::new();
        for dir in search_dirs(config) {
            if dir.is_dir() {
                log::info!("CLAP: scanning {}", dir.display());
                scan_directory(&dir, &mut out);
            }
        }
        out.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
        log::info!("CLAP: found {} plugins", out.len());
        out
    }

    fn default_ui_thread_requirement(&self) -> UiThreadRequirement {
        UiThreadRequirement::ALL_NON_AUDIO
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
            let result = unsafe { ClapPluginInstance::new(&descriptor, sample_rate) }
                .map(|inst| Box::new(inst) as Box<dyn PluginInstance>)
                .ok_or_else(|| format!("failed to instantiate CLAP plugin {}", descriptor.plugin_id));
            callback(result);
        });
    }
}

fn search_dirs(config: &ScanConfig) -> Vec<PathBuf> {
    let home = std::env::var("HOME").unwrap_or_default();
    let mut dirs: Vec<PathBuf> = SEARCH_DIRS
        .iter()
        .map(|d| {
            if let Some(rest) = d.strip_prefix('~') {
                PathBuf::from(format!("{home}{rest}"))
            } else {
                PathBuf::from(d)
            }
        })
        .collect();
    dirs.extend(config.extra_search_paths.iter().cloned());
    dirs
}

fn scan_directory(dir: &Path, out: &mut Vec<PluginDescriptor>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("CLAP: cannot read {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, out);
        } else if path.extension().is_some_and(|e| e == "clap") {
            scan_file(&path, out);
        }
    }
}

fn scan_file(path: &Path, out: &mut Vec<PluginDescriptor>) {
    let Some(path_str) = path.to_str() else { return };
    let Ok(c_path) = CString::new(path_str) else { return };

    unsafe {
        let lib = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
        if lib.is_null() {
            log::debug!("CLAP: dlopen failed for {path_str}");
            return;
        }
        let entry_ptr = libc::dlsym(lib, c"clap_entry".as_ptr());
        if entry_ptr.is_null() {
            log::debug!("CLAP: no clap_entry in {path_str}");
            libc::dlclose(lib);
            return;
        }
        let entry = &*(entry_ptr as *const clap_sys::entry::clap_plugin_entry);
        if entry.clap_version.major < 1 {
            libc::dlclose(lib);
            return;
        }
        let Some(init_fn) = entry.init else {
            libc::dlclose(lib);
            return;
        };
        if !init_fn(c_path.as_ptr()) {
            log::warn!("CLAP: init() returned false for {path_str}");
            libc::dlclose(lib);
            return;
        }

        let Some(get_factory) = entry.get_factory else {
            finish(entry, lib);
            return;
        };
        let factory_ptr =
            get_factory(clap_sys::factory::plugin_factory::CLAP_PLUGIN_FACTORY_ID.as_ptr());
        if factory_ptr.is_null() {
            finish(entry, lib);
            return;
        }
        let factory =
            &*(factory_ptr as *const clap_sys::factory::plugin_factory::clap_plugin_factory);

        let count = factory.get_plugin_count.map(|f| f(factory)).unwrap_or(0);
        for i in 0..count {
            let Some(desc_ptr) = factory.get_plugin_descriptor.map(|f| f(factory, i)) else {
                continue;
            };
            if desc_ptr.is_null() {
                continue;
            }
            let desc = &*desc_ptr;
            if desc.id.is_null() {
                continue;
            }
            let id = CStr::from_ptr(desc.id).to_str().unwrap_or("").to_string();
            let name = if desc.name.is_null() {
                id.clone()
            } else {
                CStr::from_ptr(desc.name).to_str().unwrap_or(&id).to_string()
            };
            let vendor = if desc.vendor.is_null() {
                String::new()
            } else {
                CStr::from_ptr(desc.vendor).to_str().unwrap_or("").to_string()
            };
            let url = if desc.url.is_null() {
                String::new()
            } else {
                CStr::from_ptr(desc.url).to_str().unwrap_or("").to_string()
            };

            out.push(PluginDescriptor {
                format: PluginFormatKind::Clap,
                plugin_id: id,
                bundle_path: Some(path.to_path_buf()),
                display_name: name,
                vendor_name: vendor,
                product_url: url,
            });
        }

        finish(entry, lib);
    }
}

unsafe fn finish(entry: &clap_sys::entry::clap_plugin_entry, lib: *mut c_void) {
    unsafe {
        if let Some(deinit) = entry.deinit {
            deinit();
        }
        libc::dlclose(lib);
    }
}

struct ClapLibrary {
    _handle: *mut c_void,
    entry: *const clap_sys::entry::clap_plugin_entry,
}
unsafe impl Send for ClapLibrary {}
unsafe impl Sync for ClapLibrary {}

impl Drop for ClapLibrary {
    fn drop(&mut self) {
        unsafe {
            if let Some(deinit) = (*self.entry).deinit {
                deinit();
            }
        }
    }
}

struct AudioPortDesc {
    channel_count: usize,
}

pub struct ClapPluginInstance {
    plugin: *const clap_sys::plugin::clap_plugin,
    _library: Arc<ClapLibrary>,
    _host_box: Box<clap_sys::host::clap_host>,

    input_ports: Vec<AudioPortDesc>,
    output_ports: Vec<AudioPortDesc>,
    input_channels: usize,
    output_channels: usize,
    bus_defs_in: Vec<AudioBusDefinition>,
    bus_defs_out: Vec<AudioBusDefinition>,

    activated: bool,
    processing: bool,
}

unsafe impl Send for ClapPluginInstance {}

struct InputEventsData<'a> {
    events: &'a [clap_sys::events::clap_event_param_value],
}

unsafe extern "C" fn input_events_size(list: *const clap_sys::events::clap_input_events) -> u32 {
    unsafe {
        let data = &*((*list).ctx as *const InputEventsData);
        data.events.len() as u32
    }
}

unsafe extern "C" fn input_events_get(
    list: *const clap_sys::events::clap_input_events,
    index: u32,
) -> *const clap_sys::events::clap_event_header {
    unsafe {
        let data = &*((*list).ctx as *const InputEventsData);
        if (index as usize) < data.events.len() {
            &data.events[index as usize].header as *const clap_sys::events::clap_event_header
        } else {
            std::ptr::null()
        }
    }
}

unsafe extern "C" fn output_events_try_push(
    _list: *const clap_sys::events::clap_output_events,
    _event: *const clap_sys::events::clap_event_header,
) -> bool {
    true
}

unsafe extern "C" fn host_get_extension(
    _host: *const clap_sys::host::clap_host,
    _extension_id: *const std::ffi::c_char,
) -> *const c_void {
    std::ptr::null()
}
unsafe extern "C" fn host_request_restart(_host: *const clap_sys::host::clap_host) {}
unsafe extern "C" fn host_request_process(_host: *const clap_sys::host::clap_host) {}
unsafe extern "C" fn host_request_callback(_host: *const clap_sys::host::clap_host) {}

impl ClapPluginInstance {
    unsafe fn new(descriptor: &PluginDescriptor, sample_rate: f64) -> Option<Self> {
        unsafe {
            let path = descriptor.bundle_path.as_ref()?;
            let c_path = CString::new(path.to_str()?).ok()?;

            let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if handle.is_null() {
                log::error!("CLAP: dlopen failed for {}", path.display());
                return None;
            }
            let entry_ptr = libc::dlsym(handle, c"clap_entry".as_ptr());
            if entry_ptr.is_null() {
                return None;
            }
            let entry = entry_ptr as *const clap_sys::entry::clap_plugin_entry;
            let entry_ref = &*entry;
            if let Some(init_fn) = entry_ref.init {
                if !init_fn(c_path.as_ptr()) {
                    return None;
                }
            }
            let library = Arc::new(ClapLibrary { _handle: handle, entry });

            let factory_ptr = entry_ref.get_factory?(
                clap_sys::factory::plugin_factory::CLAP_PLUGIN_FACTORY_ID.as_ptr(),
            );
            if factory_ptr.is_null() {
                return None;
            }
            let factory =
                &*(factory_ptr as *const clap_sys::factory::plugin_factory::clap_plugin_factory);

            let host_box = Box::new(clap_sys::host::clap_host {
                clap_version: clap_sys::version::clap_version { major: 1, minor: 2, revision: 2 },
                host_data: std::ptr::null_mut(),
                name: c"remidy-host".as_ptr(),
                vendor: c"remidy-host".as_ptr(),
                url: c"".as_ptr(),
                version: c"0.1.0".as_ptr(),
                get_extension: Some(host_get_extension),
                request_restart: Some(host_request_restart),
                request_process: Some(host_request_process),
                request_callback: Some(host_request_callback),
            });

            let c_id = CString::new(descriptor.plugin_id.clone()).ok()?;
            let plugin_ptr = factory.create_plugin?(&*factory, &*host_box, c_id.as_ptr());
            if plugin_ptr.is_null() {
                log::error!("CLAP: create_plugin failed for {}", descriptor.plugin_id);
                return None;
            }
            let plugin_ref = &*plugin_ptr;
            if let Some(init_fn) = plugin_ref.init {
                if !init_fn(plugin_ptr) {
                    if let Some(destroy) = plugin_ref.destroy {
                        destroy(plugin_ptr);
                    }
                    return None;
                }
            }

            let mut input_ports = Vec::new();
            let mut output_ports = Vec::new();
            let mut input_channels = 0usize;
            let mut output_channels = 0usize;

            if let Some(get_ext) = plugin_ref.get_extension {
                let ext = get_ext(plugin_ptr, clap_sys::ext::audio_ports::CLAP_EXT_AUDIO_PORTS.as_ptr());
                if !ext.is_null() {
                    let ports = &*(ext as *const clap_sys::ext::audio_ports::clap_plugin_audio_ports);
                    if let Some(count_fn) = ports.count {
                        for (is_input, channels, ports_vec) in [
                            (true, &mut input_channels, &mut input_ports),
                            (false, &mut output_channels, &mut output_ports),
                        ] {
                            let n = count_fn(plugin_ptr, is_input);
                            for idx in 0..n {
                                let mut info: clap_sys::ext::audio_ports::clap_audio_port_info =
                                    std::mem::zeroed();
                                if let Some(get_fn) = ports.get {
                                    if get_fn(plugin_ptr, idx, is_input, &mut info) {
                                        let ch = info.channel_count as usize;
                                        *channels += ch;
                                        ports_vec.push(AudioPortDesc { channel_count: ch });
                                    }
                                }
                            }
                        }
                    }
                }
            }

            let activated = plugin_ref
                .activate
                .map(|f| f(plugin_ptr, sample_rate, 1, 8192))
                .unwrap_or(true);
            if !activated {
                log::error!("CLAP: activate failed for {}", descriptor.plugin_id);
                return None;
            }

            Some(Self {
                plugin: plugin_ptr,
                _library: library,
                _host_box: host_box,
                input_ports,
                output_ports,
                input_channels,
                output_channels,
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
                activated,
                processing: false,
            })
        }
    }
}

impl PluginInstance for ClapPluginInstance {
    fn configure(&mut self, request: &ConfigurationRequest) -> StatusCode {
        if request.data_type == SampleDataType::Float64 {
            return StatusCode::UnsupportedChannelLayoutRequested;
        }
        StatusCode::Ok
    }

    fn start_processing(&mut self) -> StatusCode {
        unsafe {
            let plugin_ref = &*self.plugin;
            self.processing = plugin_ref.start_processing.map(|f| f(self.plugin)).unwrap_or(true);
        }
        if self.processing { StatusCode::Ok } else { StatusCode::FailedToStartProcessing }
    }

    fn stop_processing(&mut self) -> StatusCode {
        unsafe {
            let plugin_ref = &*self.plugin;
            if let Some(stop) = plugin_ref.stop_processing {
                stop(self.plugin);
            }
        }
        self.processing = false;
        StatusCode::Ok
    }

    fn process(&mut self, context: &mut AudioProcessContext) -> StatusCode {
        if !self.processing {
            return StatusCode::AlreadyInvalidState;
        }
        let frames = context.frame_count();

        let mut in_channel_ptrs: Vec<*mut f32> = (0..context.input_bus_channel_count(0))
            .map(|ch| {
                context
                    .input_channel(0, ch)
                    .map(|c| c.as_ptr() as *mut f32)
                    .unwrap_or(std::ptr::null_mut())
            })
            .collect();
        let mut out_channel_ptrs: Vec<*mut f32> = (0..context.output_bus_channel_count(0))
            .map(|ch| {
                context
                    .output_channel_mut(0, ch)
                    .map(|c| c.as_mut_ptr())
                    .unwrap_or(std::ptr::null_mut())
            })
            .collect();

        let in_audio_bufs = if in_channel_ptrs.is_empty() {
            Vec::new()
        } else {
            vec![clap_sys::audio_buffer::clap_audio_buffer {
                data32: in_channel_ptrs.as_mut_ptr(),
                data64: std::ptr::null_mut(),
                channel_count: in_channel_ptrs.len() as u32,
                latency: 0,
                constant_mask: 0,
            }]
        };
        let mut out_audio_bufs = if out_channel_ptrs.is_empty() {
            Vec::new()
        } else {
            vec![clap_sys::audio_buffer::clap_audio_buffer {
                data32: out_channel_ptrs.as_mut_ptr(),
                data64: std::ptr::null_mut(),
                channel_count: out_channel_ptrs.len() as u32,
                latency: 0,
                constant_mask: 0,
            }]
        };

        let no_events: &[clap_sys::events::clap_event_param_value] = &[];
        let in_events_data = InputEventsData { events: no_events };
        let in_events = clap_sys::events::clap_input_events {
            ctx: &in_events_data as *const InputEventsData as *mut c_void,
            size: Some(input_events_size),
            get: Some(input_events_get),
        };
        let out_events = clap_sys::events::clap_output_events {
            ctx: std::ptr::null_mut(),
            try_push: Some(output_events_try_push),
        };

        let process = clap_sys::process::clap_process {
            steady_time: -1,
            frames_count: frames as u32,
            transport: std::ptr::null(),
            audio_inputs: if in_audio_bufs.is_empty() { std::ptr::null() } else { in_audio_bufs.as_ptr() },
            audio_outputs: if out_audio_bufs.is_empty() {
                std::ptr::null_mut()
            } else {
                out_audio_bufs.as_mut_ptr()
            },
            audio_inputs_count: in_audio_bufs.len() as u32,
            audio_outputs_count: out_audio_bufs.len() as u32,
            in_events: &in_events,
            out_events: &out_events,
        };

        unsafe {
            let plugin_ref = &*self.plugin;
            let Some(process_fn) = plugin_ref.process else {
                return StatusCode::FailedToProcess;
            };
            // `clap_process_status`: 0 is CLAP_PROCESS_ERROR, every other value
            // signals some flavor of success/continue.
            if process_fn(self.plugin, &process) == 0 {
                return StatusCode::FailedToProcess;
            }
        }
        StatusCode::Ok
    }

    fn audio_buses(&self) -> Option<&dyn AudioBuses> {
        Some(self)
    }
}

impl AudioBuses for ClapPluginInstance {
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
        if self.input_channels > 0 { Some(0) } else { None }
    }
    fn main_output_bus_index(&self) -> Option<usize> {
        Some(0)
    }
}

impl Drop for ClapPluginInstance {
    fn drop(&mut self) {
        unsafe {
            let plugin_ref = &*self.plugin;
            if self.processing {
                if let Some(stop) = plugin_ref.stop_processing {
                    stop(self.plugin);
                }
            }
            if self.activated {
                if let Some(deactivate) = plugin_ref.deactivate {
                    deactivate(self.plugin);
                }
            }
            if let Some(destroy) = plugin_ref.destroy {
                destroy(self.plugin);
            }
        }
    }
}
