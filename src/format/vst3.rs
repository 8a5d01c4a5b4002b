//! VST3 format driver.
//!
//! Grounded on the VST3 hosting backend this crate's native-loading idiom
//! follows: bundle discovery by walking well-known search directories,
//! `dlopen` + `ModuleEntry` + `GetPluginFactory` to reach the COM factory,
//! and `IComponent`/`IAudioProcessor` for instantiation and processing.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use vst3::Steinberg::IBStream_::IStreamSeekMode_::*;

use crate::catalog::{PluginDescriptor, PluginFormatKind};
use crate::format::{
    CreateInstanceCallback, DefaultExtensibility, Extensibility, PluginFormat, ScanConfig,
    ScanRequiresInstantiation, UiThreadRequirement,
};
use crate::instance::{
    AudioBusDefinition, AudioBuses, BusRole, ConfigurationRequest, Parameters, PluginInstance,
    SampleDataType, State, StateContextType,
};
use crate::instance::ParameterInfo as HostParameterInfo;
use crate::process::context::AudioProcessContext;
use crate::status::StatusCode;

const SEARCH_DIRS: &[&str] = &[
    "~/.vst3",
    "/usr/lib/vst3",
    "/usr/local/lib/vst3",
    "/usr/lib64/vst3",
    "/usr/local/lib64/vst3",
];

pub struct Vst3Format;

impl Vst3Format {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Vst3Format {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginFormat for Vst3Format {
    fn name(&self) -> &'static str {
        "VST3"
    }

    fn kind(&self) -> PluginFormatKind {
        PluginFormatKind::Vst3
    }

    fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation {
        // A bundle may need loading if `moduleinfo.json` is absent; we do
        // not attempt to read that cache file here, so conservatively
        // report instantiation-free metadata reads only.
        ScanRequiresInstantiation::ToReadMetadataOnly
    }

    fn scan(&self, config: &ScanConfig) -> Vec<PluginDescriptor> {
        let mut out = Vec::new();
        for dir in search_dirs(config) {
            if dir.is_dir() {
                log::info!("VST3: scanning {}", dir.display());
                scan_directory(&dir, &mut out);
            }
        }
        out.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
        log::info!("VST3: found {} plugins", out.len());
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
        _options: &ConfigurationRequest,
        callback: CreateInstanceCallback,
    ) {
        let descriptor = descriptor.clone();
        std::thread::spawn(move || {
            let result = unsafe { Vst3PluginInstance::new(&descriptor) }
                .map(|inst| Box::new(inst) as Box<dyn PluginInstance>)
                .ok_or_else(|| format!("failed to instantiate VST3 plugin {}", descriptor.plugin_id));
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
            log::debug!("VST3: cannot read {}: {e}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.extension().is_some_and(|e| e == "vst3") {
            scan_bundle(&path, out);
        } else {
            scan_directory(&path, out);
        }
    }
}

/// `<name>.vst3/Contents/<arch>/<name>.so`
fn find_bundle_binary(bundle_path: &Path) -> Option<PathBuf> {
    const ARCHES: &[&str] = &["x86_64-linux", "i386-linux", "aarch64-linux", "armv7l-linux"];
    for arch in ARCHES {
        let dir = bundle_path.join("Contents").join(arch);
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.extension().is_some_and(|e| e == "so") {
                    return Some(p);
                }
            }
        }
    }
    std::fs::read_dir(bundle_path).ok().and_then(|entries| {
        entries
            .flatten()
            .map(|e| e.path())
            .find(|p| p.extension().is_some_and(|e| e == "so"))
    })
}

fn scan_bundle(bundle_path: &Path, out: &mut Vec<PluginDescriptor>) {
    let Some(so_path) = find_bundle_binary(bundle_path) else {
        log::debug!("VST3: no .so in {}", bundle_path.display());
        return;
    };
    let Some(so_str) = so_path.to_str() else { return };
    let Ok(c_path) = CString::new(so_str) else { return };

    log::info!("VST3: loading bundle {}", bundle_path.display());

    unsafe {
        let lib = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
        if lib.is_null() {
            log::debug!("VST3: dlopen failed for {so_str}");
            return;
        }

        if let Some(entry_sym) = dlsym_opt(lib, c"ModuleEntry") {
            let module_entry: unsafe extern "system" fn(*mut std::ffi::c_void) -> bool =
                std::mem::transmute(entry_sym);
            if !module_entry(lib) {
                log::debug!("VST3: ModuleEntry returned false for {so_str}");
                libc::dlclose(lib);
                return;
            }
        }

        let Some(get_factory_sym) = dlsym_opt(lib, c"GetPluginFactory") else {
            call_module_exit(lib);
            libc::dlclose(lib);
            return;
        };
        let get_factory: unsafe extern "system" fn() -> *mut IPluginFactory =
            std::mem::transmute(get_factory_sym);
        let factory_raw = get_factory();
        if factory_raw.is_null() {
            call_module_exit(lib);
            libc::dlclose(lib);
            return;
        }
        let Some(factory) = vst3::ComPtr::<IPluginFactory>::from_raw(factory_raw) else {
            call_module_exit(lib);
            libc::dlclose(lib);
            return;
        };
        let factory2: Option<vst3::ComPtr<IPluginFactory2>> = factory.cast();

        let count = factory.countClasses();
        for i in 0..count {
            let mut info: PClassInfo = std::mem::zeroed();
            if factory.getClassInfo(i, &mut info) != kResultOk {
                continue;
            }
            if read_cstr(&info.category) != "Audio Module Class" {
                continue;
            }

            let name = read_cstr(&info.name);
            let id = tuid_to_hex(&info.cid);

            let mut vendor = String::new();
            if let Some(ref f2) = factory2 {
                let mut info2: PClassInfo2 = std::mem::zeroed();
                if f2.getClassInfo2(i, &mut info2) == kResultOk {
                    vendor = read_cstr(&info2.vendor);
                }
            }

            out.push(PluginDescriptor {
                format: PluginFormatKind::Vst3,
                plugin_id: id,
                bundle_path: Some(bundle_path.to_path_buf()),
                display_name: name,
                vendor_name: vendor,
                product_url: String::new(),
            });
        }

        drop(factory2);
        drop(factory);
        call_module_exit(lib);
        // Intentionally does not dlclose: descriptor strings may be backed
        // by storage inside the shared object.
    }
}

unsafe fn dlsym_opt(lib: *mut std::ffi::c_void, name: &std::ffi::CStr) -> Option<*mut std::ffi::c_void> {
    unsafe {
        let sym = libc::dlsym(lib, name.as_ptr());
        if sym.is_null() { None } else { Some(sym) }
    }
}

unsafe fn call_module_exit(lib: *mut std::ffi::c_void) {
    unsafe {
        if let Some(sym) = dlsym_opt(lib, c"ModuleExit") {
            let module_exit: unsafe extern "system" fn() -> bool = std::mem::transmute(sym);
            module_exit();
        }
    }
}

fn tuid_to_hex(tuid: &[std::ffi::c_char; 16]) -> String {
    tuid.iter().map(|&b| format!("{:02X}", b as u8)).collect()
}

fn hex_to_tuid(hex: &str) -> Option<[std::ffi::c_char; 16]> {
    if hex.len() != 32 {
        return None;
    }
    let mut tuid = [0i8; 16];
    for i in 0..16 {
        tuid[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()? as i8;
    }
    Some(tuid)
}

fn read_cstr(buf: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| "?".to_string())
}

/// Reads a null-terminated UTF-16 string from a `String128`.
fn read_string128(buf: &[u16]) -> String {
    let chars: Vec<u16> = buf.iter().take_while(|&&c| c != 0).copied().collect();
    String::from_utf16(&chars).unwrap_or_else(|_| "?".to_string())
}

struct Vst3Library {
    _handle: *mut std::ffi::c_void,
}
unsafe impl Send for Vst3Library {}
unsafe impl Sync for Vst3Library {}

/// A live VST3 plugin instance: `IComponent` + `IAudioProcessor` wired
/// together, driven entirely off the process/configure/start/stop
/// contract — no COM parameter-queue plumbing is needed since the
/// [`crate::instance::Parameters`] facet here goes through
/// `IEditController::setParamNormalized`/`getParamNormalized` directly
/// under the instance's `&mut self` borrow rather than a lock-free
/// inline queue.
pub struct Vst3PluginInstance {
    component: vst3::ComPtr<IComponent>,
    processor: vst3::ComPtr<IAudioProcessor>,
    controller: Option<vst3::ComPtr<IEditController>>,
    _library: Arc<Vst3Library>,

    input_channels: usize,
    output_channels: usize,
    bus_defs_in: Vec<AudioBusDefinition>,
    bus_defs_out: Vec<AudioBusDefinition>,

    /// Parallel to `parameter_info`: the VST3 `ParamID` each entry
    /// addresses via `IEditController`.
    parameter_ids: Vec<ParamID>,
    parameter_info: Vec<HostParameterInfo>,

    active: bool,
    processing: bool,
}

impl Vst3PluginInstance {
    unsafe fn new(descriptor: &PluginDescriptor) -> Option<Self> {
        unsafe {
            let bundle_path = descriptor.bundle_path.as_ref()?;
            let so_path = find_bundle_binary(bundle_path)?;
            let c_path = CString::new(so_path.to_str()?).ok()?;

            let lib = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if lib.is_null() {
                log::error!("VST3: dlopen failed for {}", so_path.display());
                return None;
            }
            if let Some(sym) = dlsym_opt(lib, c"ModuleEntry") {
                let module_entry: unsafe extern "system" fn(*mut std::ffi::c_void) -> bool =
                    std::mem::transmute(sym);
                if !module_entry(lib) {
                    log::error!("VST3: ModuleEntry failed for {}", so_path.display());
                    return None;
                }
            }
            let library = Arc::new(Vst3Library { _handle: lib });

            let get_factory_sym = dlsym_opt(lib, c"GetPluginFactory")?;
            let get_factory: unsafe extern "system" fn() -> *mut IPluginFactory =
                std::mem::transmute(get_factory_sym);
            let factory = vst3::ComPtr::<IPluginFactory>::from_raw(get_factory())?;

            let cid = hex_to_tuid(&descriptor.plugin_id)?;
            let mut component_ptr: *mut std::ffi::c_void = std::ptr::null_mut();
            let rc = factory.createInstance(
                cid.as_ptr() as *const i8,
                IComponent::IID.as_ptr() as *const i8,
                &mut component_ptr,
            );
            if rc != kResultOk || component_ptr.is_null() {
                log::error!("VST3: createInstance failed for {}", descriptor.plugin_id);
                return None;
            }
            let component = vst3::ComPtr::<IComponent>::from_raw(component_ptr as *mut IComponent)?;
            if component.initialize(std::ptr::null_mut()) != kResultOk {
                log::error!("VST3: IComponent::initialize failed for {}", descriptor.plugin_id);
                return None;
            }
            let processor: vst3::ComPtr<IAudioProcessor> = component.cast()?;
            let controller: Option<vst3::ComPtr<IEditController>> = component.cast();

            let input_channels = component.getBusCount(MediaTypes_::kAudio as i32, BusDirections_::kInput as i32) as usize;
            let output_channels = component.getBusCount(MediaTypes_::kAudio as i32, BusDirections_::kOutput as i32) as usize;

            let mut parameter_ids = Vec::new();
            let mut parameter_info = Vec::new();
            if let Some(ref ctrl) = controller {
                let count = ctrl.getParameterCount();
                for i in 0..count {
                    let mut info: ParameterInfo = std::mem::zeroed();
                    if ctrl.getParameterInfo(i, &mut info) == kResultOk {
                        parameter_ids.push(info.id);
                        parameter_info.push(HostParameterInfo {
                            index: i as u32,
                            id: info.id.to_string(),
                            name: read_string128(&info.title),
                            default_value: info.defaultNormalizedValue,
                            min_value: 0.0,
                            max_value: 1.0,
                        });
                    }
                }
            }

            Some(Self {
                component,
                processor,
                controller,
                _library: library,
                parameter_ids,
                parameter_info,
                input_channels: input_channels.max(0),
                output_channels: output_channels.max(2),
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
                active: false,
                processing: false,
            })
        }
    }
}

unsafe impl Send for Vst3PluginInstance {}

impl PluginInstance for Vst3PluginInstance {
    fn configure(&mut self, request: &ConfigurationRequest) -> StatusCode {
        if request.data_type == SampleDataType::Float64 {
            return StatusCode::UnsupportedChannelLayoutRequested;
        }
        unsafe {
            let mut setup = ProcessSetup {
                processMode: if request.offline_mode {
                    ProcessModes_::kOffline as i32
                } else {
                    ProcessModes_::kRealtime as i32
                },
                symbolicSampleSize: SymbolicSampleSizes_::kSample32 as i32,
                maxSamplesPerBlock: request.buffer_size_in_samples as i32,
                sampleRate: request.sample_rate,
            };
            if self.processor.setupProcessing(&mut setup) != kResultOk {
                return StatusCode::FailedToConfigure;
            }
            if self.component.setActive(1) != kResultOk {
                return StatusCode::FailedToConfigure;
            }
        }
        self.active = true;
        StatusCode::Ok
    }

    fn start_processing(&mut self) -> StatusCode {
        if !self.active {
            return StatusCode::AlreadyInvalidState;
        }
        let rc = unsafe { self.processor.setProcessing(1) };
        self.processing = rc == kResultOk;
        if self.processing { StatusCode::Ok } else { StatusCode::FailedToStartProcessing }
    }

    fn stop_processing(&mut self) -> StatusCode {
        if !self.processing {
            return StatusCode::Ok;
        }
        let rc = unsafe { self.processor.setProcessing(0) };
        self.processing = false;
        if rc == kResultOk { StatusCode::Ok } else { StatusCode::FailedToStopProcessing }
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

        unsafe {
            let mut in_bus: AudioBusBuffers = std::mem::zeroed();
            in_bus.numChannels = in_channel_ptrs.len() as i32;
            in_bus.__field0.channelBuffers32 = in_channel_ptrs.as_mut_ptr();
            let mut out_bus: AudioBusBuffers = std::mem::zeroed();
            out_bus.numChannels = out_channel_ptrs.len() as i32;
            out_bus.__field0.channelBuffers32 = out_channel_ptrs.as_mut_ptr();

            let mut in_buses = [in_bus];
            let mut out_buses = [out_bus];

            let mut process_data: ProcessData = std::mem::zeroed();
            process_data.processMode = ProcessModes_::kRealtime as i32;
            process_data.symbolicSampleSize = SymbolicSampleSizes_::kSample32 as i32;
            process_data.numSamples = frames as i32;
            process_data.numInputs = if in_channel_ptrs.is_empty() { 0 } else { 1 };
            process_data.numOutputs = if out_channel_ptrs.is_empty() { 0 } else { 1 };
            process_data.inputs =
                if in_channel_ptrs.is_empty() { std::ptr::null_mut() } else { in_buses.as_mut_ptr() };
            process_data.outputs =
                if out_channel_ptrs.is_empty() { std::ptr::null_mut() } else { out_buses.as_mut_ptr() };
            process_data.inputParameterChanges = std::ptr::null_mut();
            process_data.outputParameterChanges = std::ptr::null_mut();
            process_data.inputEvents = std::ptr::null_mut();
            process_data.outputEvents = std::ptr::null_mut();
            process_data.processContext = std::ptr::null_mut();

            if self.processor.process(&mut process_data) != kResultOk {
                return StatusCode::FailedToProcess;
            }
        }
        StatusCode::Ok
    }

    fn audio_buses(&self) -> Option<&dyn AudioBuses> {
        Some(self)
    }

    fn parameters(&mut self) -> Option<&mut dyn Parameters> {
        if self.controller.is_some() { Some(self) } else { None }
    }

    fn state(&mut self) -> Option<&mut dyn State> {
        Some(self)
    }
}

impl State for Vst3PluginInstance {
    /// Concatenates `IComponent::getState()` with `IEditController::getState()`
    /// behind a 4-byte LE length header so `set_state` can split them back
    /// apart; `part_id`/`context`/`include_ui` have no VST3 counterpart
    /// (the format has one undifferentiated processor+controller state)
    /// and are accepted but ignored.
    fn get_state(&self, _part_id: Option<u32>, _context: StateContextType, _include_ui: bool) -> Result<Vec<u8>, StatusCode> {
        unsafe {
            let comp_stream = new_memory_stream();
            let comp_data = if self.component.getState(comp_stream as *mut IBStream) == kResultOk {
                (*comp_stream).data.clone()
            } else {
                Vec::new()
            };
            release_memory_stream(comp_stream);

            let ctrl_data = if let Some(ref controller) = self.controller {
                let ctrl_stream = new_memory_stream();
                let data = if controller.getState(ctrl_stream as *mut IBStream) == kResultOk {
                    (*ctrl_stream).data.clone()
                } else {
                    Vec::new()
                };
                release_memory_stream(ctrl_stream);
                data
            } else {
                Vec::new()
            };

            let mut blob = Vec::with_capacity(4 + comp_data.len() + ctrl_data.len());
            blob.extend_from_slice(&(comp_data.len() as u32).to_le_bytes());
            blob.extend_from_slice(&comp_data);
            blob.extend_from_slice(&ctrl_data);
            Ok(blob)
        }
    }

    fn set_state(&mut self, buffer: &[u8], _part_id: Option<u32>, _context: StateContextType, _include_ui: bool) -> StatusCode {
        if buffer.len() < 4 {
            return StatusCode::InvalidStateData;
        }
        let comp_len = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if buffer.len() < 4 + comp_len {
            return StatusCode::InvalidStateData;
        }
        let comp_data = &buffer[4..4 + comp_len];
        let ctrl_data = &buffer[4 + comp_len..];

        unsafe {
            if !comp_data.is_empty() {
                let stream = new_memory_stream_from_data(comp_data.to_vec());
                let ok = self.component.setState(stream as *mut IBStream) == kResultOk;
                if let Some(ref controller) = self.controller {
                    (*stream).pos = 0;
                    let _ = controller.setComponentState(stream as *mut IBStream);
                }
                release_memory_stream(stream);
                if !ok {
                    return StatusCode::InvalidStateData;
                }
            }
            if !ctrl_data.is_empty() {
                if let Some(ref controller) = self.controller {
                    let stream = new_memory_stream_from_data(ctrl_data.to_vec());
                    let ok = controller.setState(stream as *mut IBStream) == kResultOk;
                    release_memory_stream(stream);
                    if !ok {
                        return StatusCode::InvalidStateData;
                    }
                }
            }
        }
        StatusCode::Ok
    }
}

/// Minimal in-process `IBStream` backed by a growable `Vec<u8>`, used to
/// shuttle `getState`/`setState` byte blobs through the COM interface VST3
/// requires instead of a plain buffer.
#[repr(C)]
struct MemoryStream {
    vtbl: *const IBStreamVtbl,
    ref_count: AtomicU32,
    data: Vec<u8>,
    pos: usize,
}

unsafe impl Send for MemoryStream {}

static MEMORY_STREAM_VTBL: IBStreamVtbl = IBStreamVtbl {
    base: FUnknownVtbl { queryInterface: ms_query_interface, addRef: ms_add_ref, release: ms_release },
    read: ms_read,
    write: ms_write,
    seek: ms_seek,
    tell: ms_tell,
};

unsafe extern "system" fn ms_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe {
        if iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let iid_ref = &*iid;
        if *iid_ref == FUnknown_iid || *iid_ref == IBStream_iid {
            ms_add_ref(this);
            *obj = this as *mut c_void;
            return kResultOk;
        }
        *obj = std::ptr::null_mut();
        kNoInterface
    }
}

unsafe extern "system" fn ms_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ms = this as *mut MemoryStream;
        (*ms).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn ms_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ms = this as *mut MemoryStream;
        let old = (*ms).ref_count.fetch_sub(1, Ordering::Relaxed);
        if old == 1 {
            drop(Box::from_raw(ms));
            return 0;
        }
        old - 1
    }
}

unsafe extern "system" fn ms_read(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_read: *mut int32,
) -> tresult {
    unsafe {
        let ms = this as *mut MemoryStream;
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let available = (*ms).data.len().saturating_sub((*ms).pos);
        let to_read = (num_bytes as usize).min(available);
        if to_read > 0 {
            std::ptr::copy_nonoverlapping((*ms).data.as_ptr().add((*ms).pos), buffer as *mut u8, to_read);
            (*ms).pos += to_read;
        }
        if !num_bytes_read.is_null() {
            *num_bytes_read = to_read as int32;
        }
        kResultOk
    }
}

unsafe extern "system" fn ms_write(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_written: *mut int32,
) -> tresult {
    unsafe {
        let ms = this as *mut MemoryStream;
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let n = num_bytes as usize;
        let end = (*ms).pos + n;
        if end > (*ms).data.len() {
            (*ms).data.resize(end, 0);
        }
        std::ptr::copy_nonoverlapping(buffer as *const u8, (*ms).data.as_mut_ptr().add((*ms).pos), n);
        (*ms).pos += n;
        if !num_bytes_written.is_null() {
            *num_bytes_written = n as int32;
        }
        kResultOk
    }
}

unsafe extern "system" fn ms_seek(this: *mut IBStream, pos: int64, mode: int32, result: *mut int64) -> tresult {
    unsafe {
        let ms = this as *mut MemoryStream;
        let new_pos: i64 = match mode {
            m if m == kIBSeekSet as int32 => pos,
            m if m == kIBSeekCur as int32 => (*ms).pos as i64 + pos,
            m if m == kIBSeekEnd as int32 => (*ms).data.len() as i64 + pos,
            _ => return kInvalidArgument,
        };
        if new_pos < 0 {
            return kInvalidArgument;
        }
        (*ms).pos = new_pos as usize;
        if !result.is_null() {
            *result = new_pos;
        }
        kResultOk
    }
}

unsafe extern "system" fn ms_tell(this: *mut IBStream, pos: *mut int64) -> tresult {
    unsafe {
        if !pos.is_null() {
            *pos = (*(this as *mut MemoryStream)).pos as int64;
        }
        kResultOk
    }
}

fn new_memory_stream() -> *mut MemoryStream {
    Box::into_raw(Box::new(MemoryStream {
        vtbl: &MEMORY_STREAM_VTBL,
        ref_count: AtomicU32::new(1),
        data: Vec::new(),
        pos: 0,
    }))
}

fn new_memory_stream_from_data(data: Vec<u8>) -> *mut MemoryStream {
    Box::into_raw(Box::new(MemoryStream {
        vtbl: &MEMORY_STREAM_VTBL,
        ref_count: AtomicU32::new(1),
        data,
        pos: 0,
    }))
}

/// # Safety
/// `ms` must be a valid pointer from `new_memory_stream`/`new_memory_stream_from_data`.
unsafe fn release_memory_stream(ms: *mut MemoryStream) {
    if !ms.is_null() {
        unsafe {
            ms_release(ms as *mut FUnknown);
        }
    }
}

impl Parameters for Vst3PluginInstance {
    fn access_requires_main_thread(&self) -> bool {
        true
    }

    fn parameters(&self) -> &[HostParameterInfo] {
        &self.parameter_info
    }

    fn set_parameter(&mut self, _note: Option<u8>, index: u32, value: f64, _timestamp: u64) -> StatusCode {
        let (Some(controller), Some(&id)) = (self.controller.as_ref(), self.parameter_ids.get(index as usize))
        else {
            return StatusCode::InvalidParameterOperation;
        };
        let rc = unsafe { controller.setParamNormalized(id, value) };
        if rc == kResultOk { StatusCode::Ok } else { StatusCode::InvalidParameterOperation }
    }

    fn get_parameter(&self, _note: Option<u8>, index: u32) -> Result<f64, StatusCode> {
        let (Some(controller), Some(&id)) = (self.controller.as_ref(), self.parameter_ids.get(index as usize))
        else {
            return Err(StatusCode::InvalidParameterOperation);
        };
        Ok(unsafe { controller.getParamNormalized(id) })
    }
}

impl AudioBuses for Vst3PluginInstance {
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
        false
    }
    fn main_input_bus_index(&self) -> Option<usize> {
        if self.input_channels > 0 { Some(0) } else { None }
    }
    fn main_output_bus_index(&self) -> Option<usize> {
        Some(0)
    }
}

impl Drop for Vst3PluginInstance {
    fn drop(&mut self) {
        unsafe {
            if self.processing {
                self.processor.setProcessing(0);
            }
            if self.active {
                self.component.setActive(0);
            }
            self.component.terminate();
        }
    }
}
