//! AudioUnit format driver (§4.13 supplement).
//!
//! The original's `AudioPluginFormatAU.cpp` enumerates components from the
//! OS registry via `AudioComponentFindNext` over a wildcard
//! `AudioComponentDescription`, with no library load and no instantiation
//! during scanning. This crate mirrors that shape with `objc2-audio-toolbox`,
//! compiled only on macOS; every other target gets a format that exists in
//! the registry (so consumers don't have to special-case AU away) but scans
//! empty and fails instantiation with [`StatusCode::NotImplemented`].

use crate::catalog::{PluginDescriptor, PluginFormatKind};
use crate::format::{
    CreateInstanceCallback, DefaultExtensibility, Extensibility, PluginFormat, ScanConfig,
    ScanRequiresInstantiation, UiThreadRequirement,
};
use crate::instance::ConfigurationRequest;
use crate::status::StatusCode;

pub struct AuFormat;

impl AuFormat {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AuFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginFormat for AuFormat {
    fn name(&self) -> &'static str {
        "AudioUnit"
    }

    fn kind(&self) -> PluginFormatKind {
        PluginFormatKind::Au
    }

    fn scan_requires_instantiation(&self) -> ScanRequiresInstantiation {
        ScanRequiresInstantiation::Never
    }

    fn scan(&self, config: &ScanConfig) -> Vec<PluginDescriptor> {
        macos::scan(config)
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
        macos::create_instance(descriptor, options, callback)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use objc2_audio_toolbox::{
        AudioComponent, AudioComponentDescription, kAudioUnitType_Effect,
        kAudioUnitType_MusicDevice,
    };
    use objc2_core_foundation::CFString;

    const HOST_RELEVANT_TYPES: &[u32] = &[kAudioUnitType_Effect, kAudioUnitType_MusicDevice];

    pub fn scan(_config: &ScanConfig) -> Vec<PluginDescriptor> {
        let mut out = Vec::new();
        for &component_type in HOST_RELEVANT_TYPES {
            let wildcard = AudioComponentDescription {
                componentType: component_type,
                componentSubType: 0,
                componentManufacturer: 0,
                componentFlags: 0,
                componentFlagsMask: 0,
            };

            let mut component: Option<AudioComponent> = None;
            loop {
                let next = unsafe { AudioComponent::next(component.as_deref(), &wildcard) };
                let Some(found) = next else { break };

                if let Some(descriptor) = describe(&found) {
                    out.push(descriptor);
                }
                component = Some(found);
            }
        }
        out.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
        log::info!("AU: found {} components", out.len());
        out
    }

    fn describe(component: &AudioComponent) -> Option<PluginDescriptor> {
        let mut name_cf: Option<objc2::rc::Retained<CFString>> = None;
        unsafe { component.copy_name(&mut name_cf) };
        let name = name_cf.map(|s| s.to_string()).unwrap_or_else(|| "Unknown AU".into());

        let desc = unsafe { component.description() }.ok()?;
        let id = format!(
            "{}-{}-{}",
            fourcc_to_string(desc.componentType),
            fourcc_to_string(desc.componentSubType),
            fourcc_to_string(desc.componentManufacturer)
        );

        Some(PluginDescriptor {
            format: PluginFormatKind::Au,
            plugin_id: id,
            bundle_path: None,
            display_name: name,
            vendor_name: fourcc_to_string(desc.componentManufacturer),
            product_url: String::new(),
        })
    }

    fn fourcc_to_string(code: u32) -> String {
        String::from_utf8_lossy(&code.to_be_bytes()).trim().to_string()
    }

    pub fn create_instance(
        descriptor: &PluginDescriptor,
        _options: &ConfigurationRequest,
        callback: CreateInstanceCallback,
    ) {
        // Full AudioComponentInstanceNew + kAudioUnitProperty_* wiring is
        // out of scope until a real host binary exercises it; the scanner
        // above is the complete, testable surface for now.
        let id = descriptor.plugin_id.clone();
        callback(Err(format!("AU instantiation of {id} is not yet wired to AudioComponentInstanceNew")));
    }
}

#[cfg(not(target_os = "macos"))]
mod macos {
    use super::*;

    pub fn scan(_config: &ScanConfig) -> Vec<PluginDescriptor> {
        Vec::new()
    }

    pub fn create_instance(
        descriptor: &PluginDescriptor,
        _options: &ConfigurationRequest,
        callback: CreateInstanceCallback,
    ) {
        log::warn!(
            "AU format is not available on this platform; cannot instantiate {}",
            descriptor.plugin_id
        );
        callback(Err(format!(
            "{}: AudioUnit hosting is only available on macOS",
            StatusCode::NotImplemented
        )));
    }
}
