//! C3/C4 — per-format scanning and instantiation.
//!
//! Grounded on `plugin-format.hpp` and `plugin-instance.hpp`'s
//! `PluginUIThreadRequirement` for the [`PluginFormat`] trait and the
//! [`UiThreadRequirement`] flag set.

pub mod au;
pub mod clap;
pub mod lv2;
pub mod vst3;

use std::collections::HashMap;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::catalog::{PluginDescriptor, PluginFormatKind};
use crate::instance::{ConfigurationRequest, PluginInstance};

bitflags! {
    /// Which of a plugin's non-audio operations must be invoked on the UI
    /// thread. Per-format defaults exist; [`HostPolicy`] may override them
    /// per descriptor for known-problematic plugins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UiThreadRequirement: u8 {
        const NONE               = 0;
        const INSTANCE_CONTROL    = 0b0001;
        const PARAMETERS          = 0b0010;
        const STATE               = 0b0100;
        const ALL_NON_AUDIO       = Self::INSTANCE_CONTROL.bits()
                                   | Self::PARAMETERS.bits()
                                   | Self::STATE.bits();
    }
}

/// Per-format override search paths, mirroring
/// `FileBasedPluginScanning::addSearchPath` in the original.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub extra_search_paths: Vec<PathBuf>,
    /// Prefer a loaded catalog cache over a fresh scan for scanners whose
    /// `scan_requires_instantiation()` is not `Never` (see §4.3). Left to
    /// the external CLI collaborator to act on; carried here only as a
    /// hint the scanner itself may read.
    pub prefer_cache_for_slow_scanners: bool,
}

impl ScanConfig {
    pub fn new() -> Self {
        Self {
            extra_search_paths: Vec::new(),
            prefer_cache_for_slow_scanners: true,
        }
    }
}

/// Caller-overridable map from `(format, pluginId)` to a
/// [`UiThreadRequirement`] override (§4.4, §9 "known-bad plugins").
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    overrides: HashMap<(PluginFormatKind, String), UiThreadRequirement>,
}

impl HostPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_override(
        &mut self,
        format: PluginFormatKind,
        plugin_id: impl Into<String>,
        requirement: UiThreadRequirement,
    ) {
        self.overrides.insert((format, plugin_id.into()), requirement);
    }

    pub fn resolve(
        &self,
        format: PluginFormatKind,
        plugin_id: &str,
        default: UiThreadRequirement,
    ) -> UiThreadRequirement {
        self.overrides
            .get(&(format, plugin_id.to_string()))
            .copied()
            .unwrap_or(default)
    }
}

/// Named channel-layout description a format can report for a bus
/// alongside `AudioBusDefinition`'s plain channel count — the "port
/// extensibility" facet. Grounded on `AudioChannelLayout`'s predefined
/// `mono()`/`stereo()` statics: two universally-recognized named
/// layouts every format can report even when it has no native concept
/// of named layouts of its own (VST3's `SpeakerArrangement` is bits,
/// not names).
pub trait Extensibility: Send + Sync {
    fn named_channel_layouts(&self) -> &'static [(&'static str, usize)];
}

const PREDEFINED_CHANNEL_LAYOUTS: &[(&str, usize)] = &[("Mono", 1), ("Stereo", 2)];

/// Default extensibility facet: the two predefined layouts and nothing
/// format-specific.
pub struct DefaultExtensibility;

impl Extensibility for DefaultExtensibility {
    fn named_channel_layouts(&self) -> &'static [(&'static str, usize)] {
        PREDEFINED_CHANNEL_LAYOUTS
    }
}

/// Whether scanning a format requires loading the library / instantiating
/// a plugin at all (§4.3) — determines whether a scanner is "slow".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRequiresInstantiation {
    Never,
    ToReadMetadataOnly,
    Always,
}

/// Result delivered to a [`PluginFormat::create_instance`] callback:
/// either an owned, not-yet-configured instance, or a free-form error
/// message (§7 kind 1 — the async instancing transport-error stratum).
pub type CreateInstanceCallback =
    Box<dyn FnOnce(Result<Box<dyn PluginInstance>, String>) + Send>;

/// A single hosted plugin format (VST3, AU, LV2, or CLAP).
pub trait PluginFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> PluginFormatKind;

    /// Whether this format's scanner must load a library or instantiate a
    /// plugin to produce catalog entries (§4.3).
    fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation;

    /// Enumerates every plugin this format can see, given search-path
    /// overrides. Never instantiates more than `scan_requires_instantiation`
    /// allows.
    fn scan(&self, config: &ScanConfig) -> Vec<PluginDescriptor>;

    /// Default UI-thread policy for plugins of this format; may be
    /// overridden per descriptor via [`HostPolicy`].
    fn default_ui_thread_requirement(&self) -> UiThreadRequirement;

    /// Format-level extension point beyond name/scanner/UI-thread-policy/
    /// createInstance (§4.4). `None` for a format with nothing beyond
    /// `AudioBusDefinition`'s plain channel counts.
    fn extensibility(&self) -> Option<&dyn Extensibility> {
        None
    }

    /// Asynchronous: returns immediately, completing on an
    /// implementation-chosen thread which invokes `callback` exactly once.
    fn create_instance(
        &self,
        descriptor: &PluginDescriptor,
        options: &ConfigurationRequest,
        callback: CreateInstanceCallback,
    );
}
