//! C6 — drives a plugin instance through Created → Preparing → Ready →
//! Terminating → Terminated, with `Error` as a sink state reachable from
//! `Preparing` or `Ready`. Grounded on `instancing-state.hpp`'s
//! `PluginInstancingState` and the `makeAlive`/`withInstance` pair.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::PluginDescriptor;
use crate::event_loop::EventLoop;
use crate::format::{PluginFormat, UiThreadRequirement};
use crate::instance::{ConfigurationRequest, PluginInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstancingState {
    Created = 0,
    Preparing = 1,
    Ready = 2,
    Error = 3,
    Terminating = 4,
    Terminated = 5,
}

impl InstancingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Preparing,
            2 => Self::Ready,
            3 => Self::Error,
            4 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

/// Owns a plugin instance across its instancing lifecycle. Always held
/// behind an `Arc` since `makeAlive`'s completion runs on whatever thread
/// the format driver chooses, potentially long after the caller who
/// invoked `makeAlive` has moved on.
pub struct InstancingStateMachine {
    state: AtomicU8,
    instance: Mutex<Option<Box<dyn PluginInstance>>>,
    event_loop: Arc<dyn EventLoop>,
    ui_thread_requirement: Mutex<UiThreadRequirement>,
}

impl InstancingStateMachine {
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(InstancingState::Created as u8),
            instance: Mutex::new(None),
            event_loop,
            ui_thread_requirement: Mutex::new(UiThreadRequirement::NONE),
        })
    }

    pub fn instancing_state(&self) -> InstancingState {
        InstancingState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: InstancingState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Runs `fn(instance)` iff state is `Ready`; no-ops otherwise.
    pub fn with_instance(&self, f: impl FnOnce(&mut dyn PluginInstance)) {
        if self.instancing_state() != InstancingState::Ready {
            return;
        }
        if let Some(instance) = self.instance.lock().unwrap().as_mut() {
            f(instance.as_mut());
        }
    }

    /// Takes ownership of the instance out of a `Ready` machine, handing
    /// its remaining lifecycle (stop, drop, UI-thread hop) to the caller.
    /// After this call `Drop` on this machine has nothing left to stop.
    /// Used to move a freshly instanced plugin into a [`crate::graph::Node`].
    pub fn take_instance(&self) -> Option<Box<dyn PluginInstance>> {
        if self.instancing_state() != InstancingState::Ready {
            return None;
        }
        self.instance.lock().unwrap().take()
    }

    /// Drives `Created -> Preparing -> ... -> Ready|Error`, per §4.6's
    /// seven-step transition. `callback` fires exactly once, with an
    /// empty error string on success.
    pub fn make_alive(
        self: &Arc<Self>,
        format: Arc<dyn PluginFormat>,
        descriptor: PluginDescriptor,
        options: ConfigurationRequest,
        ui_thread_requirement: UiThreadRequirement,
        callback: impl FnOnce(Result<(), String>) + Send + 'static,
    ) {
        *self.ui_thread_requirement.lock().unwrap() = ui_thread_requirement;
        self.set_state(InstancingState::Preparing);

        let machine = self.clone();
        let start_instancing = move || {
            let finish_options = options.clone();
            format.create_instance(
                &descriptor,
                &options,
                Box::new(move |result| {
                    machine.finish_instancing(result, finish_options, Box::new(callback));
                }),
            );
        };

        if ui_thread_requirement.contains(UiThreadRequirement::INSTANCE_CONTROL) {
            self.event_loop.run_task_on_main_thread(Box::new(start_instancing));
        } else {
            start_instancing();
        }
    }

    fn finish_instancing(
        self: &Arc<Self>,
        result: Result<Box<dyn PluginInstance>, String>,
        options: ConfigurationRequest,
        callback: Box<dyn FnOnce(Result<(), String>) + Send>,
    ) {
        let mut instance = match result {
            Ok(instance) => instance,
            Err(error) => {
                self.set_state(InstancingState::Error);
                callback(Err(error));
                return;
            }
        };

        // Step 4: best-effort OS thread name for diagnostic correlation.
        // std has no API to rename an already-running thread, so this is
        // a log line rather than a real rename.
        log::debug!("instancing plugin on thread {:?}", std::thread::current().id());

        let configure_status = instance.configure(&options);
        if !configure_status.is_ok() {
            self.set_state(InstancingState::Error);
            callback(Err(format!("configure() returned {configure_status}")));
            return;
        }

        let start_status = instance.start_processing();
        if !start_status.is_ok() {
            self.set_state(InstancingState::Error);
            callback(Err(format!("startProcessing() returned {start_status}")));
            return;
        }

        *self.instance.lock().unwrap() = Some(instance);
        self.set_state(InstancingState::Ready);
        callback(Ok(()));
    }
}

impl Drop for InstancingStateMachine {
    fn drop(&mut self) {
        match self.instancing_state() {
            InstancingState::Preparing => {
                log::warn!("destroying instance while still Preparing; treating as abandoned");
                self.set_state(InstancingState::Error);
            }
            InstancingState::Ready => {
                self.set_state(InstancingState::Terminating);
                if let Some(mut instance) = self.instance.lock().unwrap().take() {
                    let requires_ui_thread =
                        self.ui_thread_requirement.lock().unwrap().contains(UiThreadRequirement::INSTANCE_CONTROL);
                    let status = instance.stop_processing();
                    if !status.is_ok() {
                        log::warn!("stopProcessing() returned {status} during destruction");
                    }
                    if requires_ui_thread && self.event_loop.running_on_main_thread() {
                        drop(instance);
                    } else if requires_ui_thread {
                        self.event_loop.run_task_on_main_thread(Box::new(move || drop(instance)));
                    } else {
                        drop(instance);
                    }
                }
                self.set_state(InstancingState::Terminated);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PluginFormatKind;
    use crate::event_loop::ThreadEventLoop;
    use crate::format::{CreateInstanceCallback, ScanConfig, ScanRequiresInstantiation};
    use crate::process::context::AudioProcessContext;
    use crate::status::StatusCode;
    use std::sync::atomic::AtomicBool;

    struct AlwaysErrorsFormat;

    impl PluginFormat for AlwaysErrorsFormat {
        fn name(&self) -> &'static str {
            "synthetic-error"
        }
        fn kind(&self) -> PluginFormatKind {
            PluginFormatKind::Vst3
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
            callback(Err("synthetic failure".to_string()));
        }
    }

    struct StubInstance {
        stopped: Arc<Mutex<bool>>,
    }

    impl PluginInstance for StubInstance {
        fn configure(&mut self, _request: &ConfigurationRequest) -> StatusCode {
            StatusCode::Ok
        }
        fn start_processing(&mut self) -> StatusCode {
            StatusCode::Ok
        }
        fn stop_processing(&mut self) -> StatusCode {
            *self.stopped.lock().unwrap() = true;
            StatusCode::Ok
        }
        fn process(&mut self, _context: &mut AudioProcessContext) -> StatusCode {
            StatusCode::Ok
        }
    }

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor {
            format: PluginFormatKind::Vst3,
            plugin_id: "synthetic".into(),
            bundle_path: None,
            display_name: "Synthetic".into(),
            vendor_name: String::new(),
            product_url: String::new(),
        }
    }

    #[test]
    fn create_instance_error_moves_to_error_state() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let machine = InstancingStateMachine::new(event_loop);
        let received_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let received_error_setter = received_error.clone();

        machine.make_alive(
            Arc::new(AlwaysErrorsFormat),
            descriptor(),
            ConfigurationRequest::new(48000.0, 512),
            UiThreadRequirement::NONE,
            move |result| {
                *received_error_setter.lock().unwrap() = result.err();
            },
        );

        assert_eq!(machine.instancing_state(), InstancingState::Error);
        assert_eq!(received_error.lock().unwrap().as_deref(), Some("synthetic failure"));
    }

    #[test]
    fn destruction_from_error_does_not_call_stop_processing() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let machine = InstancingStateMachine::new(event_loop);
        machine.make_alive(
            Arc::new(AlwaysErrorsFormat),
            descriptor(),
            ConfigurationRequest::new(48000.0, 512),
            UiThreadRequirement::NONE,
            |_| {},
        );
        assert_eq!(machine.instancing_state(), InstancingState::Error);
        drop(machine);
        // No instance was ever stored, so there is nothing to assert on
        // directly; the absence of a panic/deadlock in Drop is the test.
    }

    struct AlwaysSucceedsFormat {
        stopped: Arc<Mutex<bool>>,
    }

    impl PluginFormat for AlwaysSucceedsFormat {
        fn name(&self) -> &'static str {
            "synthetic-ok"
        }
        fn kind(&self) -> PluginFormatKind {
            PluginFormatKind::Vst3
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
            callback(Ok(Box::new(StubInstance { stopped: self.stopped.clone() })));
        }
    }

    #[test]
    fn successful_instancing_reaches_ready_then_terminated_on_drop() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let machine = InstancingStateMachine::new(event_loop);
        let stopped = Arc::new(Mutex::new(false));
        let succeeded = Arc::new(AtomicBool::new(false));
        let succeeded_setter = succeeded.clone();

        machine.make_alive(
            Arc::new(AlwaysSucceedsFormat { stopped: stopped.clone() }),
            descriptor(),
            ConfigurationRequest::new(48000.0, 512),
            UiThreadRequirement::NONE,
            move |result| {
                succeeded_setter.store(result.is_ok(), Ordering::SeqCst);
            },
        );

        assert_eq!(machine.instancing_state(), InstancingState::Ready);
        assert!(succeeded.load(Ordering::SeqCst));
        assert!(!*stopped.lock().unwrap());

        drop(machine);
        assert!(*stopped.lock().unwrap());
    }

    #[test]
    fn with_instance_noops_outside_ready_state() {
        let event_loop = Arc::new(ThreadEventLoop::new());
        let machine = InstancingStateMachine::new(event_loop);
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        machine.with_instance(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });
        assert!(!called.load(Ordering::SeqCst));
    }
}
