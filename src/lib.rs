//! Cross-platform audio plugin hosting runtime: a catalog and loader for
//! VST3/AudioUnit/LV2/CLAP bundles, a format-agnostic instancing
//! lifecycle, a zero-allocation audio/event processing context, and a
//! track-graph sequencer with offline rendering.

pub mod bundle;
pub mod catalog;
pub mod error;
pub mod event_loop;
pub mod format;
pub mod graph;
pub mod instance;
pub mod process;
pub mod sequencer;
pub mod status;

pub use bundle::{BundleHandle, BundlePool, RetentionPolicy};
pub use catalog::{Catalog, PluginDescriptor, PluginFormatKind};
pub use error::HostError;
pub use event_loop::{EventLoop, ThreadEventLoop};
pub use format::{HostPolicy, PluginFormat, ScanConfig, UiThreadRequirement};
pub use graph::{Node, Track};
pub use instance::state_machine::{InstancingState, InstancingStateMachine};
pub use instance::{ConfigurationRequest, PluginInstance};
pub use sequencer::{MasterClock, SequencerEngine};
pub use status::StatusCode;

/// Initializes the `log`/`env_logger` backend once per process. Hosts
/// embedding this crate alongside their own logging setup may skip this
/// and install their own `log::Log` implementation instead.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
